//! Command resolution
//!
//! Turns a [`Command`] plus caller-supplied input values into a
//! [`ResolvedCommand`]:
//!
//! 1. Order inputs so every parent resolves before its children
//!    ([`resolution_order`]); missing parents and cycles fail here.
//! 2. Derive each input's value: default, then override, then `^...^`
//!    expansion, then the type resolver from the [`TypeRegistry`].
//! 3. Build the placeholder maps and substitute the command line,
//!    environment, ports, mounts and outputs.
//! 4. Resolve host paths for input-backed mounts.
//!
//! Resolution is synchronous and does no I/O beyond the injected site lookup.

pub mod types;

use crate::command::Command;
use crate::errors::ResolutionError;
use crate::mount;
use crate::path_expr::Filter;
use crate::resolved::{ResolvedCommand, ResolvedInput, ResolvedMount, ResolvedOutput};
use crate::site::{NoSiteLookup, SiteLookup};
use crate::template::{self, SubstitutionReport};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub use types::{InputContext, InputTypeResolver, TypeRegistry};

use crate::command::CommandInput;

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Indices of `inputs` ordered so that parents precede children.
///
/// Inputs with no ordering constraint between them keep declaration order.
/// Each input has at most one parent, so the depth-first walk from an input
/// is a chain; meeting a node still marked `Visiting` closes a cycle, which
/// is reported with its full path (`a -> b -> a`).
pub fn resolution_order(inputs: &[CommandInput]) -> Result<Vec<usize>, ResolutionError> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        index.entry(input.name.as_str()).or_insert(i);
    }

    for input in inputs {
        if let Some(parent) = input.parent.as_deref() {
            if !index.contains_key(parent) {
                return Err(ResolutionError::ParentNotFound {
                    input: input.name.clone(),
                    parent: parent.to_string(),
                });
            }
        }
    }

    let mut marks = vec![Mark::Unvisited; inputs.len()];
    let mut order = Vec::with_capacity(inputs.len());

    for start in 0..inputs.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }

        let mut chain: Vec<usize> = Vec::new();
        let mut current = Some(start);
        while let Some(idx) = current {
            match marks[idx] {
                Mark::Done => break,
                Mark::Visiting => {
                    let cycle_start = chain.iter().position(|&c| c == idx).unwrap_or(0);
                    let mut path: Vec<String> = chain[cycle_start..]
                        .iter()
                        .map(|&c| inputs[c].name.clone())
                        .collect();
                    path.push(inputs[idx].name.clone());
                    return Err(ResolutionError::CircularParent { path });
                }
                Mark::Unvisited => {
                    marks[idx] = Mark::Visiting;
                    chain.push(idx);
                    current = inputs[idx]
                        .parent
                        .as_deref()
                        .and_then(|p| index.get(p).copied());
                }
            }
        }

        for &idx in chain.iter().rev() {
            marks[idx] = Mark::Done;
            order.push(idx);
        }
    }

    Ok(order)
}

/// Resolves commands against a site
pub struct CommandResolver {
    lookup: Arc<dyn SiteLookup>,
    registry: TypeRegistry,
}

impl Default for CommandResolver {
    fn default() -> Self {
        Self::new(Arc::new(NoSiteLookup))
    }
}

impl CommandResolver {
    pub fn new(lookup: Arc<dyn SiteLookup>) -> Self {
        Self {
            lookup,
            registry: TypeRegistry::default(),
        }
    }

    /// Use a custom type registry
    pub fn with_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Resolve every input; the result is in declaration order
    #[instrument(skip_all, fields(command = %command.name))]
    pub fn resolve_inputs(
        &self,
        command: &Command,
        values: &HashMap<String, String>,
    ) -> Result<IndexMap<String, ResolvedInput>, ResolutionError> {
        for name in values.keys() {
            if command.input(name).is_none() {
                warn!(input = %name, "Ignoring value for undeclared input");
            }
        }

        let order = resolution_order(&command.inputs)?;
        let document = command.to_json();
        let mut resolved: IndexMap<String, ResolvedInput> = IndexMap::with_capacity(order.len());

        for idx in order {
            let input = &command.inputs[idx];
            let value = self.resolve_one(input, values, &document, &resolved)?;
            if value.is_none() && input.required {
                return Err(ResolutionError::RequiredInput {
                    input: input.name.clone(),
                });
            }

            let entry = ResolvedInput {
                name: input.name.clone(),
                input_type: input.input_type,
                value,
                parent: input.parent.clone(),
                sensitive: input.sensitive,
            };
            debug!(input = %entry.name, value = %entry.display_value(), "Resolved input");
            resolved.insert(input.name.clone(), entry);
        }

        Ok(command
            .inputs
            .iter()
            .filter_map(|i| resolved.get(&i.name).map(|r| (i.name.clone(), r.clone())))
            .collect())
    }

    fn resolve_one(
        &self,
        input: &CommandInput,
        values: &HashMap<String, String>,
        document: &Value,
        resolved: &IndexMap<String, ResolvedInput>,
    ) -> Result<Option<String>, ResolutionError> {
        let raw = values
            .get(&input.name)
            .cloned()
            .or_else(|| input.default_value.clone());
        let candidate = raw
            .map(|v| template::expand_path_substrings(&v, document))
            .transpose()?;

        let matcher = input
            .matcher
            .as_deref()
            .map(|m| template::expand_path_substrings(m, document).and_then(|m| Filter::parse(&m)))
            .transpose()?;

        let parent = input.parent.as_deref().and_then(|p| resolved.get(p));

        let resolver = self
            .registry
            .get(input.input_type)
            .ok_or_else(|| ResolutionError::Input {
                input: input.name.clone(),
                message: format!("no resolver registered for type {}", input.input_type),
            })?;

        let ctx = InputContext {
            input,
            value: candidate,
            parent,
            matcher: matcher.as_ref(),
            lookup: self.lookup.as_ref(),
        };
        resolver.resolve(&ctx)
    }

    /// Resolve a command into a launchable specification
    #[instrument(skip_all, fields(command = %command.name))]
    pub fn resolve(
        &self,
        command: &Command,
        values: &HashMap<String, String>,
    ) -> Result<ResolvedCommand, ResolutionError> {
        let inputs = self.resolve_inputs(command, values)?;
        let document = command.to_json();
        let placeholders = Placeholders::build(command, &inputs);
        let mut report = SubstitutionReport::new();

        let command_line = template::substitute(
            &template::expand_path_substrings(&command.command_line, &document)?,
            &placeholders.command_line,
            &mut report,
        );

        let environment = template::substitute_map(
            &expand_map(&command.environment_variables, &document)?,
            &placeholders.values,
            true,
            &mut report,
        );

        let ports = template::substitute_map(
            &expand_map(&command.ports, &document)?,
            &placeholders.values,
            true,
            &mut report,
        );

        let working_directory = command
            .working_directory
            .as_deref()
            .map(|w| {
                template::expand_path_substrings(w, &document)
                    .map(|w| template::substitute(&w, &placeholders.values, &mut report))
            })
            .transpose()?;

        let mut mounts = Vec::with_capacity(command.mounts.len());
        for declared in &command.mounts {
            let host_path = match declared.source_input {
                Some(_) => Some(mount::resolve_host_path(declared, &inputs)?),
                None => None,
            };
            mounts.push(ResolvedMount {
                name: declared.name.clone(),
                container_path: template::substitute(&declared.path, &placeholders.values, &mut report),
                writable: declared.writable,
                host_path,
                engine_host_path: None,
                source_input: declared.source_input.clone(),
            });
        }

        let outputs = command
            .outputs
            .iter()
            .map(|output| ResolvedOutput {
                name: output.name.clone(),
                mount: output.mount.clone(),
                path: output
                    .path
                    .as_deref()
                    .map(|p| template::substitute(p, &placeholders.values, &mut report)),
                glob: output.glob.clone(),
                required: output.required,
            })
            .collect();

        debug!(replaced = ?report.replaced, "Substituted templates");
        info!(
            inputs = inputs.len(),
            mounts = mounts.len(),
            "Resolved command {}",
            command.name
        );

        Ok(ResolvedCommand {
            command_id: command.id,
            command_name: command.name.clone(),
            image: command.image.clone(),
            working_directory,
            command_line,
            environment,
            ports,
            mounts,
            inputs: inputs.into_values().collect(),
            outputs,
            reserve_memory: command.reserve_memory,
            limit_memory: command.limit_memory,
            limit_cpu: command.limit_cpu,
        })
    }
}

fn expand_map(
    templates: &IndexMap<String, String>,
    document: &Value,
) -> Result<IndexMap<String, String>, ResolutionError> {
    templates
        .iter()
        .map(|(k, v)| Ok((k.clone(), template::expand_path_substrings(v, document)?)))
        .collect()
}

/// Placeholder maps built from inputs with a replacement key
struct Placeholders {
    /// Token to plain value, for environment, ports, mounts and outputs
    values: IndexMap<String, String>,
    /// Token to flag-decorated value, for the command line
    command_line: IndexMap<String, String>,
}

impl Placeholders {
    fn build(command: &Command, inputs: &IndexMap<String, ResolvedInput>) -> Self {
        let mut values = IndexMap::new();
        let mut command_line = IndexMap::new();

        for input in &command.inputs {
            let Some(key) = input.replacement_key.as_deref() else {
                continue;
            };
            let value = inputs
                .get(&input.name)
                .and_then(|r| r.value.clone())
                .unwrap_or_default();

            let decorated = match input.command_line_flag.as_deref() {
                Some(flag) if !value.is_empty() => format!(
                    "{}{}{}",
                    flag,
                    input.command_line_separator.as_deref().unwrap_or(" "),
                    value
                ),
                _ => value.clone(),
            };

            values.insert(key.to_string(), value);
            command_line.insert(key.to_string(), decorated);
        }

        Self {
            values,
            command_line,
        }
    }
}
