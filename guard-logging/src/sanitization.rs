//! Error-message and log sanitization
//!
//! Detailed failure causes (authentication errors, backend failures, SSRF
//! rejections) are only ever logged server-side, and only after passing
//! through [`LogSanitizer`]. It strips credential-like substrings, file
//! paths, IP addresses and stack-trace fragments. The client-facing form
//! produced by [`LogSanitizer::sanitize_for_client`] is the only variant that
//! may be returned to a caller, and only in debug deployments.

use regex::Regex;
use std::sync::OnceLock;

/// Regex patterns for detecting sensitive information
static PASSWORD_REGEX: OnceLock<Regex> = OnceLock::new();
static TOKEN_REGEX: OnceLock<Regex> = OnceLock::new();
static API_KEY_REGEX: OnceLock<Regex> = OnceLock::new();
static CREDENTIAL_REGEX: OnceLock<Regex> = OnceLock::new();
static IP_REGEX: OnceLock<Regex> = OnceLock::new();
static IPV6_REGEX: OnceLock<Regex> = OnceLock::new();
static UUID_REGEX: OnceLock<Regex> = OnceLock::new();
static UNIX_PATH_REGEX: OnceLock<Regex> = OnceLock::new();
static WINDOWS_PATH_REGEX: OnceLock<Regex> = OnceLock::new();
static STACK_FRAME_REGEX: OnceLock<Regex> = OnceLock::new();
static SOURCE_LOCATION_REGEX: OnceLock<Regex> = OnceLock::new();

/// Maximum length of a message handed back to a client
const CLIENT_MESSAGE_LIMIT: usize = 200;

/// Initialize sanitization regex patterns
fn init_sanitization_patterns() {
    PASSWORD_REGEX.get_or_init(|| {
        Regex::new(
            r#"(?i)(["']?)(password|passwd|pwd|pass)(["']?)[\s]*[=:][\s]*["`']?([^'"`\s,}]+)"#,
        )
        .expect("Invalid password regex")
    });

    TOKEN_REGEX.get_or_init(|| {
        Regex::new(r#"(?i)(?:(["']?)(token)(["']?)[\s]*[=:][\s]*['"]?([a-zA-Z0-9._-]+)|(bearer|splunk)[\s]+([a-zA-Z0-9._~+/=-]+))"#)
            .expect("Invalid token regex")
    });

    API_KEY_REGEX.get_or_init(|| {
        Regex::new(
            r#"(?i)(["']?)(api[_-]?key|apikey|key)(["']?)[\s]*[=:][\s]*['"]?([a-zA-Z0-9._-]+)"#,
        )
        .expect("Invalid API key regex")
    });

    CREDENTIAL_REGEX.get_or_init(|| {
        Regex::new(r#"(?i)(["']?)(credential|credentials|secret|auth)(["']?)[\s]*[=:][\s]*['"]?([^'"\s,}]+)"#)
            .expect("Invalid credential regex")
    });

    IP_REGEX.get_or_init(|| {
        Regex::new(r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b")
            .expect("Invalid IP regex")
    });

    IPV6_REGEX.get_or_init(|| {
        Regex::new(r"(?i)\b(?:[0-9a-f]{1,4}:){3,7}[0-9a-f]{1,4}\b|\b(?:[0-9a-f]{1,4}:){1,6}:[0-9a-f]{1,4}\b")
            .expect("Invalid IPv6 regex")
    });

    UUID_REGEX.get_or_init(|| {
        Regex::new(
            r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b",
        )
        .expect("Invalid UUID regex")
    });

    UNIX_PATH_REGEX.get_or_init(|| {
        Regex::new(r"(?:~|\.{1,2})?(?:/[A-Za-z0-9._@+-]+){2,}/?").expect("Invalid path regex")
    });

    WINDOWS_PATH_REGEX.get_or_init(|| {
        Regex::new(r"(?i)\b[a-z]:\\(?:[^\\\s:*?<>|]+\\?)+").expect("Invalid windows path regex")
    });

    STACK_FRAME_REGEX.get_or_init(|| {
        Regex::new(
            r"(?im)^\s*(?:at\s+\S.*|\d+:\s+0x[0-9a-f]+.*|stack backtrace:.*|goroutine \d+ \[.*|thread '[^']*' panicked at.*|Traceback \(most recent call last\):.*)$",
        )
        .expect("Invalid stack frame regex")
    });

    SOURCE_LOCATION_REGEX.get_or_init(|| {
        Regex::new(r"\b[\w.-]+\.(?:rs|go|py|js|ts|java|c|cc|cpp|h):\d+(?::\d+)?\b")
            .expect("Invalid source location regex")
    });
}

/// Sanitization configuration
#[derive(Debug, Clone)]
pub struct SanitizationConfig {
    /// Enable sanitization
    pub enabled: bool,

    /// Preserve IP addresses in logs (might be needed for debugging)
    pub preserve_ips: bool,

    /// Preserve UUIDs in logs (request and event ids are UUIDs)
    pub preserve_uuids: bool,

    /// Preserve file system paths
    pub preserve_paths: bool,

    /// Replacement string for sensitive data
    pub replacement: String,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            preserve_ips: false,
            preserve_uuids: true,
            preserve_paths: false,
            replacement: "[REDACTED]".to_string(),
        }
    }
}

/// Log sanitizer for removing sensitive information
pub struct LogSanitizer {
    config: SanitizationConfig,
}

impl LogSanitizer {
    /// Create a new log sanitizer with default configuration
    pub fn new() -> Self {
        Self::with_config(SanitizationConfig::default())
    }

    /// Create a new log sanitizer with custom configuration
    pub fn with_config(config: SanitizationConfig) -> Self {
        init_sanitization_patterns();
        Self { config }
    }

    /// Active configuration
    pub fn config(&self) -> &SanitizationConfig {
        &self.config
    }

    /// Sanitize a log message by removing or redacting sensitive information
    pub fn sanitize(&self, message: &str) -> String {
        if !self.config.enabled {
            return message.to_string();
        }

        let mut sanitized = message.to_string();

        // Stack frames go first so their embedded paths do not leave fragments behind
        if let Some(regex) = STACK_FRAME_REGEX.get() {
            sanitized = regex
                .replace_all(&sanitized, "[STACK_TRACE_REDACTED]")
                .to_string();
        }

        sanitized = self.redact_value_group(&PASSWORD_REGEX, &sanitized);

        if let Some(regex) = TOKEN_REGEX.get() {
            sanitized = regex
                .replace_all(&sanitized, |caps: &regex::Captures| {
                    let full_match = &caps[0];
                    // token=value or "<scheme> value"
                    let value = caps
                        .get(4)
                        .or_else(|| caps.get(6))
                        .map(|m| m.as_str())
                        .unwrap_or_default();
                    if value.is_empty() {
                        full_match.to_string()
                    } else {
                        full_match.replace(value, &self.config.replacement)
                    }
                })
                .to_string();
        }

        sanitized = self.redact_value_group(&API_KEY_REGEX, &sanitized);
        sanitized = self.redact_value_group(&CREDENTIAL_REGEX, &sanitized);

        if !self.config.preserve_ips {
            if let Some(regex) = IP_REGEX.get() {
                sanitized = regex.replace_all(&sanitized, "[IP_REDACTED]").to_string();
            }
            if let Some(regex) = IPV6_REGEX.get() {
                sanitized = regex.replace_all(&sanitized, "[IP_REDACTED]").to_string();
            }
        }

        if !self.config.preserve_paths {
            if let Some(regex) = SOURCE_LOCATION_REGEX.get() {
                sanitized = regex
                    .replace_all(&sanitized, "[SOURCE_REDACTED]")
                    .to_string();
            }
            if let Some(regex) = WINDOWS_PATH_REGEX.get() {
                sanitized = regex.replace_all(&sanitized, "[PATH_REDACTED]").to_string();
            }
            if let Some(regex) = UNIX_PATH_REGEX.get() {
                sanitized = regex.replace_all(&sanitized, "[PATH_REDACTED]").to_string();
            }
        }

        if !self.config.preserve_uuids {
            if let Some(regex) = UUID_REGEX.get() {
                sanitized = regex.replace_all(&sanitized, "[UUID_REDACTED]").to_string();
            }
        }

        sanitized
    }

    /// Replace capture group 4 (the value) of a `name = value` style pattern
    fn redact_value_group(&self, pattern: &OnceLock<Regex>, message: &str) -> String {
        let Some(regex) = pattern.get() else {
            return message.to_string();
        };

        regex
            .replace_all(message, |caps: &regex::Captures| {
                let full_match = &caps[0];
                let value = &caps[4];
                full_match.replace(value, &self.config.replacement)
            })
            .to_string()
    }

    /// Sanitize error messages for production logging
    pub fn sanitize_error(&self, error: &dyn std::error::Error) -> String {
        let error_msg = error.to_string();

        if !self.config.enabled {
            return error_msg;
        }

        self.sanitize(&error_msg)
    }

    /// Produce the only form of an error message that may reach a client.
    ///
    /// Sanitization is applied regardless of `enabled`; the result is a
    /// single line capped at a fixed length.
    pub fn sanitize_for_client(&self, message: &str) -> String {
        let forced = if self.config.enabled {
            self.sanitize(message)
        } else {
            LogSanitizer::with_config(SanitizationConfig {
                enabled: true,
                ..self.config.clone()
            })
            .sanitize(message)
        };

        let first_line = forced.lines().next().unwrap_or_default().trim();
        if first_line.chars().count() > CLIENT_MESSAGE_LIMIT {
            let truncated: String = first_line.chars().take(CLIENT_MESSAGE_LIMIT).collect();
            format!("{truncated}...")
        } else {
            first_line.to_string()
        }
    }

    /// Create a sanitized version of structured logging context
    pub fn sanitize_context(&self, context: &serde_json::Value) -> serde_json::Value {
        if !self.config.enabled {
            return context.clone();
        }

        match context {
            serde_json::Value::Object(map) => {
                let mut sanitized_map = serde_json::Map::new();

                for (key, value) in map {
                    let sanitized_value = if Self::is_sensitive_field(key) {
                        serde_json::Value::String(self.config.replacement.clone())
                    } else {
                        self.sanitize_context(value)
                    };
                    sanitized_map.insert(key.clone(), sanitized_value);
                }

                serde_json::Value::Object(sanitized_map)
            }
            serde_json::Value::Array(arr) => {
                let sanitized_arr: Vec<_> = arr.iter().map(|v| self.sanitize_context(v)).collect();
                serde_json::Value::Array(sanitized_arr)
            }
            serde_json::Value::String(s) => serde_json::Value::String(self.sanitize(s)),
            other => other.clone(),
        }
    }

    /// Check if a field name indicates sensitive data
    pub fn is_sensitive_field(field_name: &str) -> bool {
        let lower_name = field_name.to_lowercase();
        if matches!(
            lower_name.as_str(),
            "password"
                | "passwd"
                | "pwd"
                | "pass"
                | "token"
                | "secret"
                | "api_key"
                | "apikey"
                | "key"
                | "credential"
                | "credentials"
                | "auth"
                | "authorization"
                | "client_secret"
                | "private_key"
                | "bearer"
                | "access_token"
                | "refresh_token"
                | "auth_token"
                | "cookie"
        ) {
            return true;
        }

        lower_name.contains("password")
            || lower_name.contains("passwd")
            || lower_name.contains("token")
            || lower_name.contains("secret")
            || lower_name.contains("api_key")
            || lower_name.contains("apikey")
            || lower_name.contains("credential")
            || lower_name.contains("auth")
            || lower_name.contains("bearer")
    }
}

impl Default for LogSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Global sanitizer instance
static GLOBAL_SANITIZER: OnceLock<LogSanitizer> = OnceLock::new();

/// Get the global sanitizer instance
pub fn get_sanitizer() -> &'static LogSanitizer {
    GLOBAL_SANITIZER.get_or_init(LogSanitizer::new)
}

/// Initialize the global sanitizer with custom configuration.
///
/// Has no effect once the global sanitizer has been used.
pub fn init_sanitizer(config: SanitizationConfig) {
    let _ = GLOBAL_SANITIZER.set(LogSanitizer::with_config(config));
}

/// Redact an error message with the global sanitizer
pub fn sanitize_error_message(message: &str) -> String {
    get_sanitizer().sanitize(message)
}

#[cfg(test)]
#[path = "sanitization_tests.rs"]
mod sanitization_tests;
