//! Per-type input value derivation
//!
//! Each [`InputType`] has one [`InputTypeResolver`]; the [`TypeRegistry`]
//! maps type tags to implementations. Supporting a new type means adding an
//! implementation and registering it.

use crate::command::{CommandInput, InputType};
use crate::errors::ResolutionError;
use crate::path_expr::{value_to_string, Filter, PathExpr};
use crate::resolved::ResolvedInput;
use crate::site::SiteLookup;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Everything a type resolver may look at
pub struct InputContext<'a> {
    pub input: &'a CommandInput,
    /// Candidate value: the override if one was given, else the default
    pub value: Option<String>,
    /// The resolved parent, when the input declares one
    pub parent: Option<&'a ResolvedInput>,
    pub matcher: Option<&'a Filter>,
    pub lookup: &'a dyn SiteLookup,
}

impl InputContext<'_> {
    fn error(&self, message: impl Into<String>) -> ResolutionError {
        ResolutionError::Input {
            input: self.input.name.clone(),
            message: message.into(),
        }
    }

    /// Null for optional inputs, an error for required ones
    fn soft_failure(&self, message: String) -> Result<Option<String>, ResolutionError> {
        if self.input.required {
            Err(self.error(message))
        } else {
            warn!(input = %self.input.name, "{}; leaving optional input unset", message);
            Ok(None)
        }
    }

    fn parse_json(&self, what: &str, text: &str) -> Result<Value, ResolutionError> {
        serde_json::from_str(text)
            .map_err(|e| self.error(format!("{} is not valid JSON: {}", what, e)))
    }

    /// The parent's value as JSON; `None` when the parent resolved to null
    fn parent_document(&self) -> Result<Option<Value>, ResolutionError> {
        match self.parent.and_then(|p| p.value.as_deref()) {
            Some(text) => {
                let name = self.parent.map(|p| p.name.as_str()).unwrap_or_default();
                self.parse_json(&format!("value of parent \"{}\"", name), text)
                    .map(Some)
            }
            None => Ok(None),
        }
    }
}

/// Derives the final value of one input type
pub trait InputTypeResolver: Send + Sync {
    fn resolve(&self, ctx: &InputContext<'_>) -> Result<Option<String>, ResolutionError>;
}

/// Lookup table from type tag to resolver
pub struct TypeRegistry {
    resolvers: HashMap<InputType, Box<dyn InputTypeResolver>>,
}

impl TypeRegistry {
    /// A registry with no resolvers
    pub fn empty() -> Self {
        Self {
            resolvers: HashMap::new(),
        }
    }

    /// Replace the resolver used for a type
    pub fn register(&mut self, input_type: InputType, resolver: Box<dyn InputTypeResolver>) {
        self.resolvers.insert(input_type, resolver);
    }

    pub fn get(&self, input_type: InputType) -> Option<&dyn InputTypeResolver> {
        self.resolvers.get(&input_type).map(|r| r.as_ref())
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(InputType::String, Box::new(StringResolver));
        registry.register(InputType::Boolean, Box::new(BooleanResolver));
        registry.register(InputType::Number, Box::new(NumberResolver));
        registry.register(InputType::File, Box::new(FileResolver));
        registry.register(InputType::Resource, Box::new(ResourceResolver));
        registry.register(InputType::Config, Box::new(ConfigResolver));
        for (object_type, collection) in [
            (InputType::Project, None),
            (InputType::Subject, Some("$.subjects")),
            (InputType::Session, Some("$.sessions")),
            (InputType::Scan, Some("$.scans")),
            (InputType::Assessor, Some("$.assessors")),
        ] {
            registry.register(
                object_type,
                Box::new(SiteObjectResolver {
                    object_type,
                    default_collection: collection,
                }),
            );
        }
        registry
    }
}

/// Evaluate `expression` and, when it selects a single list, return the
/// list's elements so `$.scans` and `$.scans[*]` behave alike
fn candidates(document: &Value, expression: &str) -> Result<Vec<Value>, ResolutionError> {
    let mut found = PathExpr::parse(expression)?.evaluate(document);
    if found.len() == 1 {
        if let Value::Array(items) = &mut found[0] {
            return Ok(std::mem::take(items));
        }
    }
    Ok(found)
}

fn id_or_label(value: &str) -> Filter {
    Filter::field_equals("id", value).or(Filter::field_equals("label", value))
}

fn first_property(document: &Value, expression: &str) -> Result<Option<String>, ResolutionError> {
    Ok(PathExpr::parse(expression)?
        .evaluate(document)
        .first()
        .map(value_to_string))
}

/// Plain strings; with a parent and `parent-property`, the property value wins
pub struct StringResolver;

impl InputTypeResolver for StringResolver {
    fn resolve(&self, ctx: &InputContext<'_>) -> Result<Option<String>, ResolutionError> {
        if let Some(property) = ctx.input.parent_property.as_deref() {
            if let Some(document) = ctx.parent_document()? {
                if let Some(found) = first_property(&document, property)? {
                    return Ok(Some(found));
                }
            }
        }
        Ok(ctx.value.clone())
    }
}

pub struct BooleanResolver;

impl InputTypeResolver for BooleanResolver {
    fn resolve(&self, ctx: &InputContext<'_>) -> Result<Option<String>, ResolutionError> {
        let Some(raw) = ctx.value.as_deref() else {
            return Ok(None);
        };
        let flag = match raw.trim().to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            _ => return ctx.soft_failure(format!("\"{}\" is not a boolean", raw)),
        };
        let mapped = if flag {
            ctx.input.true_value.clone()
        } else {
            ctx.input.false_value.clone()
        };
        Ok(Some(mapped.unwrap_or_else(|| flag.to_string())))
    }
}

pub struct NumberResolver;

impl InputTypeResolver for NumberResolver {
    fn resolve(&self, ctx: &InputContext<'_>) -> Result<Option<String>, ResolutionError> {
        let Some(raw) = ctx.value.as_deref() else {
            return Ok(None);
        };
        match raw.trim().parse::<f64>() {
            Ok(_) => Ok(Some(raw.trim().to_string())),
            Err(_) => ctx.soft_failure(format!("\"{}\" is not a number", raw)),
        }
    }
}

/// Files live inside a parent (usually a resource) under `files`
pub struct FileResolver;

impl InputTypeResolver for FileResolver {
    fn resolve(&self, ctx: &InputContext<'_>) -> Result<Option<String>, ResolutionError> {
        if ctx.input.parent.is_none() {
            return Err(ctx.error("inputs of type file must declare a parent"));
        }
        let Some(document) = ctx.parent_document()? else {
            return Ok(None);
        };

        let expression = ctx.input.parent_property.as_deref().unwrap_or("$.files");
        let mut found = candidates(&document, expression)?;
        if let Some(name) = ctx.value.as_deref() {
            found = Filter::field_equals("name", name).retain(found);
        }
        if let Some(matcher) = ctx.matcher {
            found = matcher.retain(found);
        }
        Ok(found.first().map(value_to_string))
    }
}

/// Resources are picked out of a parent's `resources`, or passed inline
pub struct ResourceResolver;

impl InputTypeResolver for ResourceResolver {
    fn resolve(&self, ctx: &InputContext<'_>) -> Result<Option<String>, ResolutionError> {
        if ctx.input.parent.is_none() {
            return Ok(ctx.value.clone());
        }
        let Some(document) = ctx.parent_document()? else {
            return Ok(None);
        };

        let expression = ctx
            .input
            .parent_property
            .as_deref()
            .unwrap_or("$.resources");
        let mut found = candidates(&document, expression)?;
        if let Some(value) = ctx.value.as_deref() {
            found = id_or_label(value).retain(found);
        }
        if let Some(matcher) = ctx.matcher {
            found = matcher.retain(found);
        }
        Ok(found.first().map(value_to_string))
    }
}

/// Configuration values: a parent property, or the value as given
pub struct ConfigResolver;

impl InputTypeResolver for ConfigResolver {
    fn resolve(&self, ctx: &InputContext<'_>) -> Result<Option<String>, ResolutionError> {
        if let (Some(property), Some(document)) =
            (ctx.input.parent_property.as_deref(), ctx.parent_document()?)
        {
            return first_property(&document, property);
        }
        Ok(ctx.value.clone())
    }
}

/// Projects, subjects, sessions, scans and assessors
pub struct SiteObjectResolver {
    pub object_type: InputType,
    /// Where children of this type live inside their parent
    pub default_collection: Option<&'static str>,
}

impl SiteObjectResolver {
    fn from_value(&self, ctx: &InputContext<'_>, raw: &str) -> Result<Option<Value>, ResolutionError> {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            return ctx.parse_json("value", trimmed).map(Some);
        }
        if trimmed.starts_with('[') {
            let list = ctx.parse_json("value", trimmed)?;
            let mut items = match list {
                Value::Array(items) => items,
                _ => return Ok(None),
            };
            if items.len() > 1 {
                warn!(
                    input = %ctx.input.name,
                    count = items.len(),
                    "Received a list of {} objects; iteration is not supported, using the first",
                    self.object_type
                );
            }
            return Ok(if items.is_empty() {
                None
            } else {
                Some(items.swap_remove(0))
            });
        }

        match ctx.lookup.lookup(self.object_type, trimmed) {
            Ok(Some(found)) => Ok(Some(found)),
            Ok(None) => Err(ctx.error(format!(
                "no {} with identifier \"{}\" could be found",
                self.object_type, trimmed
            ))),
            Err(e) => Err(ctx.error(format!(
                "lookup of {} \"{}\" failed: {:#}",
                self.object_type, trimmed, e
            ))),
        }
    }
}

impl InputTypeResolver for SiteObjectResolver {
    fn resolve(&self, ctx: &InputContext<'_>) -> Result<Option<String>, ResolutionError> {
        if ctx.input.parent.is_none() {
            let Some(raw) = ctx.value.as_deref() else {
                return Ok(None);
            };
            let Some(object) = self.from_value(ctx, raw)? else {
                return Ok(None);
            };
            if let Some(matcher) = ctx.matcher {
                if !matcher.matches(&object) {
                    return Err(ctx.error(format!(
                        "{} does not satisfy matcher \"{}\"",
                        self.object_type,
                        matcher.as_str()
                    )));
                }
            }
            return Ok(Some(value_to_string(&object)));
        }

        let Some(document) = ctx.parent_document()? else {
            return Ok(None);
        };
        let expression = ctx
            .input
            .parent_property
            .as_deref()
            .or(self.default_collection)
            .ok_or_else(|| {
                ctx.error(format!(
                    "a {} cannot be found inside a parent without a parent-property",
                    self.object_type
                ))
            })?;

        let mut found = candidates(&document, expression)?;
        if let Some(value) = ctx.value.as_deref() {
            found = id_or_label(value).retain(found);
        }
        if let Some(matcher) = ctx.matcher {
            found = matcher.retain(found);
            if found.is_empty() {
                return Err(ctx.error(format!(
                    "no {} in parent \"{}\" satisfies matcher \"{}\"",
                    self.object_type,
                    ctx.parent.map(|p| p.name.as_str()).unwrap_or_default(),
                    matcher.as_str()
                )));
            }
        }
        if found.len() > 1 {
            debug!(
                input = %ctx.input.name,
                count = found.len(),
                "Several candidates matched; using the first"
            );
        }
        Ok(found.first().map(value_to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{NoSiteLookup, StaticSiteLookup};
    use serde_json::json;

    fn parent(name: &str, input_type: InputType, value: Value) -> ResolvedInput {
        ResolvedInput {
            name: name.to_string(),
            input_type,
            value: Some(value.to_string()),
            parent: None,
            sensitive: false,
        }
    }

    fn run(
        input: &CommandInput,
        value: Option<&str>,
        parent: Option<&ResolvedInput>,
        matcher: Option<&Filter>,
        lookup: &dyn SiteLookup,
    ) -> Result<Option<String>, ResolutionError> {
        let registry = TypeRegistry::default();
        let ctx = InputContext {
            input,
            value: value.map(str::to_string),
            parent,
            matcher,
            lookup,
        };
        registry
            .get(input.input_type)
            .expect("every type registered")
            .resolve(&ctx)
    }

    #[test]
    fn test_boolean_true_false_values() {
        let mut input = CommandInput::new("flag", InputType::Boolean);
        input.true_value = Some("--on".to_string());
        assert_eq!(
            run(&input, Some("TRUE"), None, None, &NoSiteLookup).unwrap(),
            Some("--on".to_string())
        );
        assert_eq!(
            run(&input, Some("false"), None, None, &NoSiteLookup).unwrap(),
            Some("false".to_string())
        );
    }

    #[test]
    fn test_boolean_and_number_failures_respect_required() {
        let mut input = CommandInput::new("flag", InputType::Boolean);
        assert_eq!(run(&input, Some("maybe"), None, None, &NoSiteLookup).unwrap(), None);
        input.required = true;
        assert!(run(&input, Some("maybe"), None, None, &NoSiteLookup).is_err());

        let mut number = CommandInput::new("n", InputType::Number);
        assert_eq!(
            run(&number, Some(" 2.5 "), None, None, &NoSiteLookup).unwrap(),
            Some("2.5".to_string())
        );
        assert_eq!(run(&number, Some("two"), None, None, &NoSiteLookup).unwrap(), None);
        number.required = true;
        assert!(run(&number, Some("two"), None, None, &NoSiteLookup).is_err());
    }

    #[test]
    fn test_file_requires_parent() {
        let input = CommandInput::new("f", InputType::File);
        let err = run(&input, Some("a.dcm"), None, None, &NoSiteLookup).unwrap_err();
        assert!(err.to_string().contains("must declare a parent"));
    }

    #[test]
    fn test_file_selected_from_parent_by_name() {
        let resource = parent(
            "resource",
            InputType::Resource,
            json!({"label": "DICOM", "files": [{"name": "a.dcm"}, {"name": "b.dcm"}]}),
        );
        let mut input = CommandInput::new("f", InputType::File);
        input.parent = Some("resource".to_string());

        let value = run(&input, Some("b.dcm"), Some(&resource), None, &NoSiteLookup).unwrap();
        assert_eq!(value, Some(json!({"name": "b.dcm"}).to_string()));

        let first = run(&input, None, Some(&resource), None, &NoSiteLookup).unwrap();
        assert_eq!(first, Some(json!({"name": "a.dcm"}).to_string()));
    }

    #[test]
    fn test_site_object_inline_list_and_lookup() {
        let input = CommandInput::new("session", InputType::Session);

        let inline = run(&input, Some(r#"{"id": "E1"}"#), None, None, &NoSiteLookup).unwrap();
        assert_eq!(inline, Some(r#"{"id":"E1"}"#.to_string()));

        let listed = run(&input, Some(r#"[{"id": "E1"}, {"id": "E2"}]"#), None, None, &NoSiteLookup)
            .unwrap();
        assert_eq!(listed, Some(r#"{"id":"E1"}"#.to_string()));

        let lookup = StaticSiteLookup::new().with_object(InputType::Session, "E9", json!({"id": "E9"}));
        let looked_up = run(&input, Some("E9"), None, None, &lookup).unwrap();
        assert_eq!(looked_up, Some(r#"{"id":"E9"}"#.to_string()));

        let missing = run(&input, Some("E404"), None, None, &lookup).unwrap_err();
        assert!(missing.to_string().contains("E404"));
    }

    #[test]
    fn test_site_object_child_by_id_or_label() {
        let session = parent(
            "session",
            InputType::Session,
            json!({"scans": [{"id": "1", "label": "t1_mprage"}, {"id": "2", "label": "bold"}]}),
        );
        let mut input = CommandInput::new("scan", InputType::Scan);
        input.parent = Some("session".to_string());

        let by_label = run(&input, Some("bold"), Some(&session), None, &NoSiteLookup).unwrap();
        assert_eq!(by_label, Some(json!({"id": "2", "label": "bold"}).to_string()));

        let none = run(&input, Some("9"), Some(&session), None, &NoSiteLookup).unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn test_project_child_needs_parent_property() {
        let subject = parent("subject", InputType::Subject, json!({"project": {"id": "P"}}));
        let mut input = CommandInput::new("project", InputType::Project);
        input.parent = Some("subject".to_string());
        assert!(run(&input, None, Some(&subject), None, &NoSiteLookup).is_err());

        input.parent_property = Some("$.project".to_string());
        let found = run(&input, None, Some(&subject), None, &NoSiteLookup).unwrap();
        assert_eq!(found, Some(json!({"id": "P"}).to_string()));
    }

    #[test]
    fn test_string_parent_property() {
        let session = parent("session", InputType::Session, json!({"label": "sess-01"}));
        let mut input = CommandInput::new("label", InputType::String);
        input.parent = Some("session".to_string());
        input.parent_property = Some("label".to_string());
        assert_eq!(
            run(&input, Some("ignored"), Some(&session), None, &NoSiteLookup).unwrap(),
            Some("sess-01".to_string())
        );
    }

    #[test]
    fn test_registry_replacement() {
        struct Shout;
        impl InputTypeResolver for Shout {
            fn resolve(&self, ctx: &InputContext<'_>) -> Result<Option<String>, ResolutionError> {
                Ok(ctx.value.as_ref().map(|v| v.to_uppercase()))
            }
        }

        let mut registry = TypeRegistry::default();
        registry.register(InputType::String, Box::new(Shout));
        let input = CommandInput::new("s", InputType::String);
        let ctx = InputContext {
            input: &input,
            value: Some("hi".to_string()),
            parent: None,
            matcher: None,
            lookup: &NoSiteLookup,
        };
        let value = registry.get(InputType::String).unwrap().resolve(&ctx).unwrap();
        assert_eq!(value, Some("HI".to_string()));
        assert!(TypeRegistry::empty().get(InputType::String).is_none());
    }
}
