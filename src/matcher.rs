//! Path template matching.
//!
//! Converts templated routes such as `/a/{id}/b/{id2}/c` into a positional
//! capture matcher and into a single-segment glob for coarse route lookup.

use crate::config::{DelayConfig, PathDelay, TrafficControlPath};
use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use tracing::warn;

/// Errors raised while compiling a path template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("unterminated placeholder in template `{0}`")]
    Unterminated(String),
    #[error("invalid capture pattern for template `{template}`: {source}")]
    Regex {
        template: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid glob for template `{template}`: {source}")]
    Glob {
        template: String,
        #[source]
        source: globset::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplateSegment {
    Literal(String),
    Param(String),
}

/// A compiled path template.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    template: String,
    segments: Vec<TemplateSegment>,
    regex: Regex,
}

impl PathTemplate {
    /// Parse a template and compile its capture pattern.
    pub fn compile(template: &str) -> Result<Self, TemplateError> {
        let segments = parse_segments(template)?;

        let mut pattern = String::from("^");
        for segment in &segments {
            match segment {
                TemplateSegment::Literal(lit) => pattern.push_str(&regex::escape(lit)),
                TemplateSegment::Param(_) => pattern.push_str("([^/]+)"),
            }
        }
        pattern.push_str("/?$");

        let regex = Regex::new(&pattern).map_err(|source| TemplateError::Regex {
            template: template.to_string(),
            source,
        })?;

        Ok(Self {
            template: template.to_string(),
            segments,
            regex,
        })
    }

    /// The template this matcher was built from.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Placeholder names, left to right.
    pub fn placeholders(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                TemplateSegment::Param(name) => Some(name.as_str()),
                TemplateSegment::Literal(_) => None,
            })
            .collect()
    }

    /// Values bound to each placeholder, left to right.
    ///
    /// Empty when the path does not conform to the template.
    pub fn capture(&self, path: &str) -> Vec<String> {
        let path = path.split('?').next().unwrap_or("");
        match self.regex.captures(path) {
            Some(caps) => caps
                .iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Glob pattern with every placeholder replaced by `*`.
    pub fn glob_pattern(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                TemplateSegment::Literal(lit) => lit.as_str(),
                TemplateSegment::Param(_) => "*",
            })
            .collect()
    }

    /// Compile the template into a glob where `*` never crosses `/`.
    pub fn as_glob(&self) -> Result<GlobMatcher, TemplateError> {
        let glob = GlobBuilder::new(&self.glob_pattern())
            .literal_separator(true)
            .build()
            .map_err(|source| TemplateError::Glob {
                template: self.template.clone(),
                source,
            })?;
        Ok(glob.compile_matcher())
    }
}

fn parse_segments(template: &str) -> Result<Vec<TemplateSegment>, TemplateError> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_param = false;
    let mut param_name = String::new();

    for ch in template.chars() {
        if ch == '{' && !in_param {
            if !current.is_empty() {
                segments.push(TemplateSegment::Literal(current.clone()));
                current.clear();
            }
            in_param = true;
            param_name.clear();
        } else if ch == '}' && in_param {
            segments.push(TemplateSegment::Param(param_name.clone()));
            in_param = false;
            param_name.clear();
        } else if in_param {
            param_name.push(ch);
        } else {
            current.push(ch);
        }
    }

    if in_param {
        return Err(TemplateError::Unterminated(template.to_string()));
    }
    if !current.is_empty() {
        segments.push(TemplateSegment::Literal(current));
    }

    Ok(segments)
}

/// Capture the placeholder values of `template` bound by `path`.
pub fn capture(template: &str, path: &str) -> Result<Vec<String>, TemplateError> {
    Ok(PathTemplate::compile(template)?.capture(path))
}

/// Single-segment glob for a templated route.
pub fn as_glob(template: &str) -> Result<GlobMatcher, TemplateError> {
    PathTemplate::compile(template)?.as_glob()
}

/// Compiled templates and globs for an ordered list of route overrides.
#[derive(Debug, Clone, Default)]
pub struct RouteMatcher {
    compiled: Vec<Option<CompiledRoute>>,
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    template: PathTemplate,
    glob: GlobMatcher,
}

impl RouteMatcher {
    /// Compile every route; invalid templates never match.
    pub fn new(routes: &[TrafficControlPath]) -> Self {
        let compiled = routes
            .iter()
            .map(|route| {
                let template = PathTemplate::compile(&route.path)?;
                let glob = template.as_glob()?;
                Ok::<_, TemplateError>(CompiledRoute { template, glob })
            })
            .zip(routes)
            .map(|(result, route)| match result {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    warn!(path = %route.path, error = %e, "Skipping route with invalid template");
                    None
                }
            })
            .collect();

        Self { compiled }
    }

    /// First route whose glob matches the request path.
    ///
    /// `routes` must be the list this matcher was built from.
    pub fn find<'a>(
        &self,
        routes: &'a [TrafficControlPath],
        path: &str,
    ) -> Option<&'a TrafficControlPath> {
        let path = path.split('?').next().unwrap_or("");
        routes
            .iter()
            .zip(&self.compiled)
            .find(|(_, compiled)| compiled.as_ref().is_some_and(|c| c.glob.is_match(path)))
            .map(|(route, _)| route)
    }

    /// Compiled template for a route key.
    pub fn template(&self, route_path: &str) -> Option<&PathTemplate> {
        self.compiled
            .iter()
            .flatten()
            .map(|c| &c.template)
            .find(|t| t.as_str() == route_path)
    }
}

/// Compiled globs for the path-specific delays, in order.
#[derive(Debug, Clone, Default)]
pub struct DelayMatcher {
    delays: Vec<(GlobMatcher, DelayConfig)>,
}

impl DelayMatcher {
    /// Compile every delay path; invalid ones are skipped.
    pub fn new(delays: &[PathDelay]) -> Self {
        let delays = delays
            .iter()
            .filter_map(|d| match as_glob(&d.path) {
                Ok(glob) => Some((glob, d.delay.clone())),
                Err(e) => {
                    warn!(path = %d.path, error = %e, "Skipping path delay with invalid pattern");
                    None
                }
            })
            .collect();

        Self { delays }
    }

    /// First delay whose path matches the request path.
    pub fn find(&self, path: &str) -> Option<&DelayConfig> {
        self.delays
            .iter()
            .find(|(glob, _)| glob.is_match(path))
            .map(|(_, delay)| delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_positional_values() {
        let captured = capture("/a/{id}/b/{id2}/c", "/a/rodeo/b/OOGA_BOOGA/c").unwrap();
        assert_eq!(captured, vec!["rodeo", "OOGA_BOOGA"]);
    }

    #[test]
    fn test_capture_mismatch_is_empty() {
        assert!(capture("/a/{id}/b/{id2}/c", "/a/rodeo/c").unwrap().is_empty());
        assert!(capture("/a/{id}", "/a/rodeo/extra").unwrap().is_empty());
    }

    #[test]
    fn test_capture_ignores_query_and_trailing_slash() {
        let template = PathTemplate::compile("/users/{id}").unwrap();
        assert_eq!(template.capture("/users/7?expand=true"), vec!["7"]);
        assert_eq!(template.capture("/users/7/"), vec!["7"]);
    }

    #[test]
    fn test_capture_escapes_literals() {
        let template = PathTemplate::compile("/files/{name}.json").unwrap();
        assert_eq!(template.capture("/files/report.json"), vec!["report"]);
        assert!(template.capture("/files/reportXjson").is_empty());
    }

    #[test]
    fn test_placeholders() {
        let template =
            PathTemplate::compile("/cowboys/{id}/are-awesome/{second-id}/last").unwrap();
        assert_eq!(template.placeholders(), vec!["id", "second-id"]);
        assert_eq!(template.glob_pattern(), "/cowboys/*/are-awesome/*/last");
    }

    #[test]
    fn test_unterminated_placeholder() {
        assert!(matches!(
            PathTemplate::compile("/users/{id"),
            Err(TemplateError::Unterminated(_))
        ));
    }

    #[test]
    fn test_glob_matches_single_segment() {
        let glob = as_glob("/saloon/{ranger}").unwrap();
        assert!(glob.is_match("/saloon/asodfijpasdpfoahsefouhjwpfhwpfojh"));
        assert!(glob.is_match("/saloon/ball"));
        assert!(glob.is_match("/saloon/sack"));
        assert!(!glob.is_match("/saloon/ball/sack"));
        assert!(!glob.is_match("/tavern/ball"));
    }

    #[test]
    fn test_route_matcher_first_match_wins() {
        let routes = vec![
            TrafficControlPath::new("/saloon/{ranger}"),
            TrafficControlPath::new("/saloon/ball"),
            TrafficControlPath::new("/broken/{id"),
        ];
        let matcher = RouteMatcher::new(&routes);

        let route = matcher.find(&routes, "/saloon/ball").unwrap();
        assert_eq!(route.path, "/saloon/{ranger}");
        assert!(matcher.find(&routes, "/broken/1").is_none());
        assert!(matcher.find(&routes, "/nowhere").is_none());

        assert_eq!(
            matcher.template("/saloon/ball").map(|t| t.as_str()),
            Some("/saloon/ball")
        );
        assert!(matcher.template("/broken/{id").is_none());
    }

    #[test]
    fn test_delay_matcher() {
        let delays = vec![
            PathDelay {
                path: "/slow/{id}".to_string(),
                delay: DelayConfig::fixed(200),
            },
            PathDelay {
                path: "/slow/*".to_string(),
                delay: DelayConfig::fixed(500),
            },
        ];

        let matcher = DelayMatcher::new(&delays);
        assert_eq!(matcher.find("/slow/1").map(|d| d.fixed_ms), Some(200));
        assert!(matcher.find("/fast/1").is_none());
    }
}
