//! Generic input validators
//!
//! These are the building blocks every tool-facing surface uses before a
//! value reaches business logic: bounded strings, bounded numbers, file
//! paths that cannot escape their base directory, and rejection of common
//! SQL, shell and script injection shapes.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: String },

    #[error("{field} is too short ({len} < {min})")]
    TooShort { field: String, len: usize, min: usize },

    #[error("{field} is too long ({len} > {max})")]
    TooLong { field: String, len: usize, max: usize },

    #[error("{field} does not match the required format")]
    PatternMismatch { field: String },

    #[error("{field} contains control characters")]
    ControlCharacters { field: String },

    #[error("{field} contains a disallowed pattern ({kind})")]
    DisallowedPattern { field: String, kind: InjectionKind },

    #[error("{field} is out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("{field} must be a finite number")]
    NotFinite { field: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path escapes base directory: {0}")]
    PathTraversal(String),
}

/// Kind of injection shape recognized by [`InputSanitizer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InjectionKind {
    Sql,
    Command,
    Xss,
    PathTraversal,
}

impl fmt::Display for InjectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sql => "sql",
            Self::Command => "command",
            Self::Xss => "xss",
            Self::PathTraversal => "path traversal",
        };
        f.write_str(name)
    }
}

/// Constraints applied by [`validate_string`]
#[derive(Debug, Clone)]
pub struct StringConstraints {
    /// Minimum length in characters
    pub min_len: usize,
    /// Maximum length in characters
    pub max_len: usize,
    /// Optional format the whole value must match
    pub pattern: Option<Regex>,
    /// Allow `\n`, `\r` and `\t`
    pub allow_whitespace_controls: bool,
    /// Injection shapes to reject
    pub reject: Vec<InjectionKind>,
}

impl Default for StringConstraints {
    fn default() -> Self {
        Self {
            min_len: 0,
            max_len: 4096,
            pattern: None,
            allow_whitespace_controls: true,
            reject: Vec::new(),
        }
    }
}

impl StringConstraints {
    /// Identifier-style constraint: 1..=max characters of `[A-Za-z0-9_.-]`
    pub fn identifier(max_len: usize) -> Self {
        Self {
            min_len: 1,
            max_len,
            pattern: Some(IDENTIFIER.clone()),
            allow_whitespace_controls: false,
            reject: Vec::new(),
        }
    }

    /// Free-text constraint that rejects every known injection shape
    pub fn strict_text(max_len: usize) -> Self {
        Self {
            max_len,
            reject: vec![
                InjectionKind::Sql,
                InjectionKind::Command,
                InjectionKind::Xss,
                InjectionKind::PathTraversal,
            ],
            ..Default::default()
        }
    }

    /// Builder: set the length bounds
    pub fn with_length(mut self, min_len: usize, max_len: usize) -> Self {
        self.min_len = min_len;
        self.max_len = max_len;
        self
    }

    /// Builder: require a format
    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Builder: reject an injection shape
    pub fn rejecting(mut self, kind: InjectionKind) -> Self {
        if !self.reject.contains(&kind) {
            self.reject.push(kind);
        }
        self
    }
}

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("Invalid identifier regex"));

/// Validate a string against `constraints`
pub fn validate_string(
    field: &str,
    value: &str,
    constraints: &StringConstraints,
) -> Result<(), ValidationError> {
    let len = value.chars().count();

    if len == 0 && constraints.min_len > 0 {
        return Err(ValidationError::Empty {
            field: field.to_string(),
        });
    }
    if len < constraints.min_len {
        return Err(ValidationError::TooShort {
            field: field.to_string(),
            len,
            min: constraints.min_len,
        });
    }
    if len > constraints.max_len {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            len,
            max: constraints.max_len,
        });
    }

    let bad_control = value.chars().any(|c| {
        let allowed_whitespace =
            constraints.allow_whitespace_controls && matches!(c, '\n' | '\r' | '\t');
        c.is_control() && !allowed_whitespace
    });
    if bad_control {
        return Err(ValidationError::ControlCharacters {
            field: field.to_string(),
        });
    }

    if let Some(pattern) = &constraints.pattern {
        if !pattern.is_match(value) {
            return Err(ValidationError::PatternMismatch {
                field: field.to_string(),
            });
        }
    }

    if !constraints.reject.is_empty() {
        let found = default_sanitizer().detect_injection(value);
        if let Some(kind) = constraints.reject.iter().find(|k| found.contains(k)) {
            return Err(ValidationError::DisallowedPattern {
                field: field.to_string(),
                kind: *kind,
            });
        }
    }

    Ok(())
}

/// Validate an integer lies within `[min, max]`
pub fn validate_int(field: &str, value: i64, min: i64, max: i64) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        });
    }
    Ok(())
}

/// Validate a float is finite and lies within `[min, max]`
pub fn validate_float(field: &str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite {
            field: field.to_string(),
        });
    }
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        });
    }
    Ok(())
}

/// Resolve `candidate` beneath `base`, refusing anything that escapes it.
///
/// The check is lexical first (`..` may not climb above `base`), then, when
/// the target exists, repeated on canonical paths so symlinks cannot be used
/// to leave the base directory.
pub fn resolve_safe_path(base: &Path, candidate: &str) -> Result<PathBuf, ValidationError> {
    if candidate.trim().is_empty() {
        return Err(ValidationError::InvalidPath("empty path".to_string()));
    }
    if candidate.contains('\0') {
        return Err(ValidationError::InvalidPath("path contains NUL".to_string()));
    }

    let candidate_path = Path::new(candidate);
    let relative = if candidate_path.is_absolute() {
        candidate_path
            .strip_prefix(base)
            .map_err(|_| ValidationError::PathTraversal(candidate.to_string()))?
    } else {
        candidate_path
    };

    let mut normalized = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(ValidationError::PathTraversal(candidate.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ValidationError::PathTraversal(candidate.to_string()));
            }
        }
    }

    let resolved = base.join(&normalized);

    if let (Ok(real_base), Ok(real_target)) = (base.canonicalize(), resolved.canonicalize()) {
        if !real_target.starts_with(&real_base) {
            return Err(ValidationError::PathTraversal(candidate.to_string()));
        }
        return Ok(real_target);
    }

    Ok(resolved)
}

/// Validate a standalone file path used for local output (e.g. an audit log).
///
/// Rejects empty paths, NUL bytes and any `..` component.
pub fn validate_file_path(path: &Path) -> Result<(), ValidationError> {
    let display = path.display().to_string();
    if display.trim().is_empty() {
        return Err(ValidationError::InvalidPath("empty path".to_string()));
    }
    if display.contains('\0') {
        return Err(ValidationError::InvalidPath("path contains NUL".to_string()));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ValidationError::PathTraversal(display));
    }
    if path.file_name().is_none() {
        return Err(ValidationError::InvalidPath(format!("{display} has no file name")));
    }
    Ok(())
}

/// Input sanitizer for detecting and escaping dangerous content
pub struct InputSanitizer {
    sql_patterns: Vec<Regex>,
    xss_patterns: Vec<Regex>,
    command_patterns: Vec<Regex>,
    path_traversal_patterns: Vec<Regex>,
}

impl InputSanitizer {
    /// Create a new input sanitizer
    pub fn new() -> Self {
        Self {
            sql_patterns: compile(&[
                r"(?i)\bunion\b\s+(all\s+)?\bselect\b",
                r"(?i)\bselect\b\s+.+\s+\bfrom\b",
                r"(?i)\binsert\s+into\b|\bdelete\s+from\b|\bdrop\s+(table|database)\b",
                r"(?i)\b(exec|execute)\s*\(|\bxp_cmdshell\b",
                r"(?i)'\s*\bor\b\s+'?\d+'?\s*=\s*'?\d+|\bor\b\s+1\s*=\s*1",
                r"(?i)\bsleep\s*\(|\bbenchmark\s*\(|\bwaitfor\s+delay\b",
                r#"['";]\s*--"#,
            ]),
            xss_patterns: compile(&[
                r"(?i)<\s*script[^>]*>",
                r"(?i)javascript\s*:",
                r"(?i)<[^>]+\bon[a-z]+\s*=",
                r"(?i)<\s*iframe[^>]*>",
                r"(?i)\beval\s*\(",
            ]),
            command_patterns: compile(&[
                r"[;&|]\s*(rm|cat|curl|wget|nc|bash|sh|zsh|powershell|cmd|python|perl|chmod|chown)\b",
                r"`[^`]+`",
                r"\$\([^)]*\)",
                r"(?i)\brm\s+-[rf]+\b|\bmkfifo\b|/bin/(ba)?sh\b",
            ]),
            path_traversal_patterns: compile(&[
                r"\.\./",
                r"\.\.\\",
                r"(?i)%2e%2e(%2f|%5c|/|\\)",
                r"(?i)\.\.%2f|\.\.%5c",
            ]),
        }
    }

    /// Injection shapes present in `value`
    pub fn detect_injection(&self, value: &str) -> Vec<InjectionKind> {
        let mut found = Vec::new();

        let groups = [
            (InjectionKind::Sql, &self.sql_patterns),
            (InjectionKind::Xss, &self.xss_patterns),
            (InjectionKind::Command, &self.command_patterns),
            (InjectionKind::PathTraversal, &self.path_traversal_patterns),
        ];

        for (kind, patterns) in groups {
            if patterns.iter().any(|p| p.is_match(value)) {
                found.push(kind);
            }
        }

        found
    }

    /// Reject `value` if it carries any injection shape
    pub fn check(&self, field: &str, value: &str) -> Result<(), ValidationError> {
        match self.detect_injection(value).first() {
            Some(kind) => Err(ValidationError::DisallowedPattern {
                field: field.to_string(),
                kind: *kind,
            }),
            None => Ok(()),
        }
    }

    /// Escape HTML-significant characters and drop control characters
    pub fn sanitize_string(&self, value: &str) -> String {
        let mut sanitized = String::with_capacity(value.len());

        for c in value.chars() {
            match c {
                '<' => sanitized.push_str("&lt;"),
                '>' => sanitized.push_str("&gt;"),
                '"' => sanitized.push_str("&quot;"),
                '\'' => sanitized.push_str("&#x27;"),
                '\t' | '\n' | '\r' => sanitized.push(c),
                c if c.is_control() => {}
                c => sanitized.push(c),
            }
        }

        sanitized
    }
}

impl Default for InputSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|pattern| Regex::new(pattern).expect("Invalid injection regex"))
        .collect()
}

/// Shared sanitizer instance
pub fn default_sanitizer() -> &'static InputSanitizer {
    static SANITIZER: Lazy<InputSanitizer> = Lazy::new(InputSanitizer::new);
    &SANITIZER
}

#[cfg(test)]
#[path = "validation_tests.rs"]
mod validation_tests;
