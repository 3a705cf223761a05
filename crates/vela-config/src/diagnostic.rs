// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Figment-to-miette error bridge with "did you mean" suggestions.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Minimum Jaro-Winkler similarity for a key suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// A configuration error with enough context for an Elm-style report.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown configuration key `{key}`")]
    #[diagnostic(
        code(vela::config::unknown_key),
        help("{}", unknown_key_help(suggestion.as_deref(), valid_keys))
    )]
    UnknownKey {
        key: String,
        suggestion: Option<String>,
        /// Comma-separated keys accepted by the section.
        valid_keys: String,
        #[label("this key is not recognized")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("invalid type for key `{key}`: {detail}")]
    #[diagnostic(code(vela::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        key: String,
        detail: String,
        expected: String,
    },

    #[error("missing required key `{key}`")]
    #[diagnostic(
        code(vela::config::missing_key),
        help("add `{key} = <value>` to your vela.toml")
    )]
    MissingKey { key: String },

    /// A reflex pattern that does not compile.
    #[error("invalid pattern in `{key}`: {detail}")]
    #[diagnostic(
        code(vela::config::invalid_pattern),
        help("patterns are Rust regex syntax matched against lowercased text: `{pattern}`")
    )]
    InvalidPattern {
        key: String,
        pattern: String,
        detail: String,
    },

    #[error("validation error: {message}")]
    #[diagnostic(code(vela::config::validation))]
    Validation { message: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(vela::config::other))]
    Other(String),
}

fn unknown_key_help(suggestion: Option<&str>, valid_keys: &str) -> String {
    match suggestion {
        Some(s) => format!("did you mean `{s}`? Valid keys: {valid_keys}"),
        None => format!("valid keys: {valid_keys}"),
    }
}

/// Convert a `figment::Error` (which may hold several errors) into diagnostics.
pub fn figment_to_config_errors(
    err: figment::Error,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    use figment::error::Kind;

    err.into_iter()
        .map(|error| match &error.kind {
            Kind::UnknownField(field, expected) => {
                let valid: Vec<&str> = expected.to_vec();
                let (span, src) = locate_key(&error, field, toml_sources);
                ConfigError::UnknownKey {
                    key: field.clone(),
                    suggestion: suggest_key(field, &valid),
                    valid_keys: valid.join(", "),
                    span,
                    src,
                }
            }
            Kind::MissingField(field) => ConfigError::MissingKey {
                key: field.clone().into_owned(),
            },
            Kind::InvalidType(actual, expected) => ConfigError::InvalidType {
                key: error
                    .path
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join("."),
                detail: format!("found {actual}, expected {expected}"),
                expected: expected.to_string(),
            },
            _ => ConfigError::Other(error.to_string()),
        })
        .collect()
}

/// Resolve the source file and byte span of an offending key, when the
/// error came from a file we have the contents of.
fn locate_key(
    error: &figment::error::Error,
    field: &str,
    toml_sources: &[(String, String)],
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    let path = error
        .metadata
        .as_ref()
        .and_then(|m| m.source.as_ref())
        .and_then(|s| match s {
            figment::Source::File(path) => Some(path.as_path()),
            _ => None,
        });

    // Inline strings carry no file path; fall back to the only source.
    let source = path
        .and_then(|path| toml_sources.iter().find(|(p, _)| same_file(path, p)))
        .or_else(|| (toml_sources.len() == 1).then(|| &toml_sources[0]));

    let Some((name, content)) = source else {
        return (None, None);
    };
    let section = section_path(&error.path, field);
    match find_key_offset(content, &section, field) {
        Some(offset) => (
            Some(SourceSpan::new(offset.into(), field.len())),
            Some(NamedSource::new(name, content.clone())),
        ),
        None => (None, None),
    }
}

/// The table holding `field`. Figment's error path ends with the key itself.
fn section_path(error_path: &[String], field: &str) -> Vec<String> {
    match error_path.split_last() {
        Some((last, table)) if last == field => table.to_vec(),
        _ => error_path.to_vec(),
    }
}

fn same_file(a: &std::path::Path, b: &str) -> bool {
    let b = std::path::Path::new(b);
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Byte offset of `field` in `content`, searched after the `[section]`
/// header named by `path` (dotted for nested tables).
pub fn find_key_offset(content: &str, path: &[String], field: &str) -> Option<usize> {
    let start = if path.is_empty() {
        0
    } else {
        let header = format!("[{}]", path.join("."));
        content.find(&header).map(|pos| pos + header.len())?
    };

    let mut offset = start;
    for line in content[start..].split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with('[') && offset != start {
            return None;
        }
        if let Some(after) = trimmed.strip_prefix(field)
            && after.trim_start().starts_with('=')
        {
            return Some(offset + (line.len() - trimmed.len()));
        }
        offset += line.len();
    }
    None
}

/// Best Jaro-Winkler match above the suggestion threshold.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Render diagnostics to stderr using miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    use miette::GraphicalReportHandler;

    let handler = GraphicalReportHandler::new();
    for error in errors {
        let mut buf = String::new();
        let diagnostic: &dyn Diagnostic = error;
        if handler.render_report(&mut buf, diagnostic).is_ok() {
            eprint!("{buf}");
        } else {
            eprintln!("Error: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggests_close_key() {
        let valid = &["daily_limit_usd", "monthly_limit_usd", "soft_limit_fraction"];
        assert_eq!(
            suggest_key("daly_limit_usd", valid),
            Some("daily_limit_usd".to_string())
        );
    }

    #[test]
    fn no_suggestion_for_distant_typo() {
        let valid = &["fail_max", "reset_timeout_secs"];
        assert_eq!(suggest_key("zzzzzz", valid), None);
    }

    #[test]
    fn finds_key_inside_its_section_only() {
        let content = "[agent]\nnaem = \"x\"\n\n[cost]\nnaem = 1\n";
        let path = vec!["cost".to_string()];
        let o = find_key_offset(content, &path, "naem").expect("key present");
        assert!(o > content.find("[cost]").unwrap());
        assert_eq!(&content[o..o + 4], "naem");
    }

    #[test]
    fn nested_section_header() {
        let content = "[classifier.semantic]\nenabeld = true\n";
        let path = vec!["classifier".to_string(), "semantic".to_string()];
        assert_eq!(find_key_offset(content, &path, "enabeld"), Some(22));
    }

    #[test]
    fn trailing_key_is_dropped_from_the_section() {
        let path = vec!["agent".to_string(), "naem".to_string()];
        assert_eq!(section_path(&path, "naem"), vec!["agent".to_string()]);
        let top = vec!["telemetry".to_string()];
        assert!(section_path(&top, "telemetry").is_empty());
        let nested = vec!["classifier".to_string(), "semantic".to_string()];
        assert_eq!(section_path(&nested, "enabeld"), nested);
    }

    #[test]
    fn stops_at_next_section() {
        let content = "[agent]\nname = \"x\"\n[cost]\nfoo = 1\n";
        let path = vec!["agent".to_string()];
        assert_eq!(find_key_offset(content, &path, "foo"), None);
    }
}
