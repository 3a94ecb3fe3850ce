//! Variable resolution and mock injection.
//!
//! Route variables are resolved from positional path captures (`${n}`) or
//! from lookups into the generated mock (`.path`). Request body variables
//! reference a route variable by name and write its value into the mock body
//! at the JSON path they are named after.
//!
//! Every stage accumulates errors and carries on; the rewritten body is
//! best-effort.

use crate::config::{TrafficControlPath, Variable, VariableValue};
use crate::json_path::{JsonPath, JsonPathError};
use crate::matcher::PathTemplate;
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::OnceLock;
use tracing::debug;

/// Non-fatal error raised while resolving variables.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolutionError {
    #[error("variable {name:?}: `{token}` must hold a non-negative integer index, please do not put strings in the array")]
    InvalidPositionalIndex { name: String, token: String },
    #[error("variable {name:?}: request path `{path}` does not match route template `{template}`")]
    PathMismatch {
        name: String,
        path: String,
        template: String,
    },
    #[error("variable {name:?}: capture index {index} is out of range, `{template}` binds {available} placeholder(s)")]
    CaptureOutOfRange {
        name: String,
        index: usize,
        template: String,
        available: usize,
    },
    #[error("route template `{template}` is invalid: {reason}")]
    InvalidTemplate { template: String, reason: String },
    #[error("variable {name:?}: failed to inject mock variable, nothing found at `{path}`")]
    MockLookupMiss { name: String, path: String },
    #[error("variable {name:?}: invalid JSON path `{path}`: {source}")]
    InvalidJsonPath {
        name: String,
        path: String,
        #[source]
        source: JsonPathError,
    },
    #[error("request body variable {name:?} did not provide a mockable field, names must start with '.'")]
    NotMockable { name: String },
    #[error("request body variable {name:?}: {source}")]
    Mutation {
        name: String,
        #[source]
        source: JsonPathError,
    },
    #[error("generated mock is empty, nothing to resolve against")]
    EmptyMock,
    #[error("generated mock is not valid JSON: {reason}")]
    MalformedMock { reason: String },
}

/// Result of running the pipeline over one generated mock.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Mock body to send
    pub body: Vec<u8>,
    /// Errors in the order they were raised
    pub errors: Vec<ResolutionError>,
    /// Route variables after resolution
    pub variables: Vec<Variable>,
    /// Request body variables after reference propagation
    pub request_body_variables: Vec<Variable>,
}

fn positional_token() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\$\{([^}]*)\}").expect("static pattern"))
}

/// Resolve a `${n}` reference against the live request path.
///
/// Values that are already resolved, or hold no `${...}` token, are left alone.
pub fn inject_path_params(
    template: &PathTemplate,
    request_path: &str,
    variable: &mut Variable,
) -> Result<(), ResolutionError> {
    let Some(expr) = variable.value.as_expression() else {
        return Ok(());
    };
    let Some(caps) = positional_token().captures(expr) else {
        return Ok(());
    };

    let token = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
    let index = caps
        .get(1)
        .and_then(|m| m.as_str().trim().parse::<usize>().ok())
        .ok_or_else(|| ResolutionError::InvalidPositionalIndex {
            name: variable.name.clone(),
            token: token.to_string(),
        })?;

    let captured = template.capture(request_path);
    if captured.is_empty() {
        return Err(ResolutionError::PathMismatch {
            name: variable.name.clone(),
            path: request_path.to_string(),
            template: template.as_str().to_string(),
        });
    }

    let value = captured
        .get(index)
        .ok_or_else(|| ResolutionError::CaptureOutOfRange {
            name: variable.name.clone(),
            index,
            template: template.as_str().to_string(),
            available: captured.len(),
        })?;

    variable.value = VariableValue::Resolved(Value::String(value.clone()));
    Ok(())
}

/// Resolve a `.path` reference against the generated mock.
///
/// Only named variables whose value is text starting with `.` are looked up,
/// including text a positional capture just produced. On a hit the matched
/// fragment replaces the value.
pub fn inject_mock_value(variable: &mut Variable, mock: &Value) -> Result<(), ResolutionError> {
    if !needs_mock_lookup(variable) {
        return Ok(());
    }
    let Some(expr) = variable.value.as_text() else {
        return Ok(());
    };

    let path = JsonPath::parse(expr).map_err(|source| ResolutionError::InvalidJsonPath {
        name: variable.name.clone(),
        path: expr.to_string(),
        source,
    })?;

    match path.get(mock) {
        Some(found) => {
            variable.value = VariableValue::Resolved(found.clone());
            Ok(())
        }
        None => Err(ResolutionError::MockLookupMiss {
            name: variable.name.clone(),
            path: expr.to_string(),
        }),
    }
}

fn needs_mock_lookup(variable: &Variable) -> bool {
    !variable.name.is_empty()
        && variable
            .value
            .as_text()
            .is_some_and(|text| text.starts_with('.'))
}

/// Replace each request body variable's name reference with the value of the
/// first variable carrying that name. One hop only; unmatched references stay.
pub fn propagate_references<'v>(
    request_body_variables: &mut [Variable],
    variables: impl IntoIterator<Item = &'v Variable> + Clone,
) {
    for rb_variable in request_body_variables.iter_mut() {
        let Some(reference) = rb_variable.value.as_expression() else {
            continue;
        };
        let source = variables
            .clone()
            .into_iter()
            .find(|v| !v.name.is_empty() && v.name == reference);
        if let Some(source) = source {
            rb_variable.value = source.value.clone();
        }
    }
}

/// Write a request body variable's value into the mock at the path it names.
pub fn write_into_mock(variable: &Variable, mock: &mut Value) -> Result<(), ResolutionError> {
    if !variable.is_mockable_field() {
        return Err(ResolutionError::NotMockable {
            name: variable.name.clone(),
        });
    }

    let path = JsonPath::parse(&variable.name).map_err(|source| ResolutionError::InvalidJsonPath {
        name: variable.name.clone(),
        path: variable.name.clone(),
        source,
    })?;

    path.set(mock, variable.value.to_json())
        .map_err(|source| ResolutionError::Mutation {
            name: variable.name.clone(),
            source,
        })
}

// Parsed mock body; a parse failure is reported once, on first use.
struct MockDocument {
    value: Option<Value>,
    error: Option<ResolutionError>,
}

impl MockDocument {
    fn parse(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self {
                value: None,
                error: Some(ResolutionError::EmptyMock),
            };
        }
        match serde_json::from_slice(bytes) {
            Ok(value) => Self {
                value: Some(value),
                error: None,
            },
            Err(e) => Self {
                value: None,
                error: Some(ResolutionError::MalformedMock {
                    reason: e.to_string(),
                }),
            },
        }
    }

    fn value_mut(&mut self, errors: &mut Vec<ResolutionError>) -> Option<&mut Value> {
        if let Some(error) = self.error.take() {
            errors.push(error);
        }
        self.value.as_mut()
    }
}

/// Runs the resolution pipeline for one matched route.
pub struct VariableResolver<'a> {
    route: &'a TrafficControlPath,
    routes: &'a [TrafficControlPath],
    template: Option<&'a PathTemplate>,
    selector: Option<&'a str>,
}

impl<'a> VariableResolver<'a> {
    /// `routes` is the full override list; it supplies reference targets
    /// beyond the matched route.
    pub fn new(route: &'a TrafficControlPath, routes: &'a [TrafficControlPath]) -> Self {
        Self {
            route,
            routes,
            template: None,
            selector: None,
        }
    }

    /// Use an already compiled template for the route instead of compiling
    /// it on every resolution.
    pub fn with_template(mut self, template: Option<&'a PathTemplate>) -> Self {
        self.template = template;
        self
    }

    /// Restrict writes to request body variables referencing `selector`.
    /// An empty selector applies every request body variable.
    pub fn with_selector(mut self, selector: Option<&'a str>) -> Self {
        self.selector = selector.filter(|s| !s.is_empty());
        self
    }

    /// Resolve variables and rewrite the generated mock.
    pub fn resolve(&self, request_path: &str, mock: &[u8]) -> Resolution {
        let mut errors = Vec::new();
        let mut document = MockDocument::parse(mock);
        let mut variables = self.route.variables.clone();

        // positional captures
        let template = match self.template {
            Some(template) => Ok(Cow::Borrowed(template)),
            None => PathTemplate::compile(&self.route.path).map(Cow::Owned),
        };
        match template {
            Ok(template) => {
                for variable in variables.iter_mut() {
                    if let Err(e) = inject_path_params(&template, request_path, variable) {
                        errors.push(e);
                    }
                }
            }
            Err(e) => errors.push(ResolutionError::InvalidTemplate {
                template: self.route.path.clone(),
                reason: e.to_string(),
            }),
        }

        // mock lookups
        if variables.iter().any(needs_mock_lookup) {
            if let Some(doc) = document.value_mut(&mut errors) {
                for variable in variables.iter_mut() {
                    if let Err(e) = inject_mock_value(variable, doc) {
                        errors.push(e);
                    }
                }
            }
        }

        // reference propagation
        let mut request_body_variables = self.route.request_body_variables.clone();
        let references: Vec<Option<String>> = request_body_variables
            .iter()
            .map(|v| v.value.as_expression().map(str::to_string))
            .collect();
        let others = self
            .routes
            .iter()
            .filter(|r| r.path != self.route.path)
            .flat_map(|r| r.variables.iter());
        propagate_references(&mut request_body_variables, variables.iter().chain(others));

        // mock mutation
        let mut written = false;
        let selected: Vec<&Variable> = request_body_variables
            .iter()
            .zip(&references)
            .filter(|(_, reference)| match self.selector {
                Some(selector) => reference.as_deref() == Some(selector),
                None => true,
            })
            .map(|(variable, _)| variable)
            .collect();

        if !selected.is_empty() {
            if let Some(doc) = document.value_mut(&mut errors) {
                for variable in selected {
                    match write_into_mock(variable, doc) {
                        Ok(()) => written = true,
                        Err(e) => errors.push(e),
                    }
                }
            }
        }

        let body = match document.value.as_ref().filter(|_| written) {
            Some(doc) => match serde_json::to_vec(doc) {
                Ok(bytes) => bytes,
                Err(e) => {
                    errors.push(ResolutionError::MalformedMock {
                        reason: e.to_string(),
                    });
                    mock.to_vec()
                }
            },
            None => mock.to_vec(),
        };

        debug!(
            route = %self.route.path,
            written,
            errors = errors.len(),
            "Resolved traffic control variables"
        );

        Resolution {
            body,
            errors,
            variables,
            request_body_variables,
        }
    }
}
