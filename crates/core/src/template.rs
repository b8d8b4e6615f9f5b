//! Template substitution
//!
//! Placeholders are literal tokens (conventionally `#NAME#`) replaced in
//! declaration order. Tokens with no value are left verbatim: an unmatched
//! placeholder is not an error here, callers validate upstream.
//!
//! A second form, `^expression^`, embeds a path expression evaluated against
//! the command definition itself, e.g.
//! `^$.inputs[?(@.name == 'session')].description^`.

use crate::errors::ResolutionError;
use crate::path_expr::{self, PathExpr};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

static PATH_SUBSTRING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\^([^\^]+)\^").expect("Valid regex pattern"));

/// Which tokens were replaced during a substitution pass (tokens only, never values)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubstitutionReport {
    pub replaced: Vec<String>,
}

impl SubstitutionReport {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, token: &str) {
        if !self.replaced.iter().any(|t| t == token) {
            self.replaced.push(token.to_string());
        }
    }
}

/// Replace every occurrence of each token in `template`
pub fn substitute(
    template: &str,
    values: &IndexMap<String, String>,
    report: &mut SubstitutionReport,
) -> String {
    let mut result = template.to_string();
    for (token, value) in values {
        if token.is_empty() || !result.contains(token.as_str()) {
            continue;
        }
        result = result.replace(token.as_str(), value);
        report.record(token);
    }
    result
}

/// Substitute every value of a template map, and the keys too when
/// `substitute_keys` is set (environment variable names may be templated)
pub fn substitute_map(
    templates: &IndexMap<String, String>,
    values: &IndexMap<String, String>,
    substitute_keys: bool,
    report: &mut SubstitutionReport,
) -> IndexMap<String, String> {
    templates
        .iter()
        .map(|(key, template)| {
            let key = if substitute_keys {
                substitute(key, values, report)
            } else {
                key.clone()
            };
            (key, substitute(template, values, report))
        })
        .collect()
}

/// Expand `^expression^` substrings against `document`.
///
/// No match expands to the empty string; more than one match is an error.
pub fn expand_path_substrings(template: &str, document: &Value) -> Result<String, ResolutionError> {
    if !template.contains('^') {
        return Ok(template.to_string());
    }

    let mut result = String::with_capacity(template.len());
    let mut last = 0;
    for captures in PATH_SUBSTRING.captures_iter(template) {
        let (Some(whole), Some(expr)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let expression = expr.as_str().trim();
        if !(expression.starts_with('$') || expression.starts_with('@')) {
            // not a path, e.g. a regex anchor
            continue;
        }
        let matches = PathExpr::parse(expression)?.evaluate(document);
        let replacement = match matches.len() {
            0 => {
                debug!(expression, "Path expression substring matched nothing");
                String::new()
            }
            1 => path_expr::value_to_string(&matches[0]),
            count => {
                return Err(ResolutionError::MultiplePathResults {
                    expression: expression.to_string(),
                    count,
                })
            }
        };
        result.push_str(&template[last..whole.start()]);
        result.push_str(&replacement);
        last = whole.end();
    }
    result.push_str(&template[last..]);
    Ok(result)
}
