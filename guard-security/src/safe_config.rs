//! Resource-bounded configuration parsing
//!
//! Decoding untrusted YAML (or JSON, which is a YAML subset) straight into
//! an application type gives an attacker control over how much memory and
//! recursion the decoder spends. [`SafeConfigParser`] checks the raw size,
//! counts alias references, decodes into a generic [`serde_yaml::Value`]
//! tree, walks that tree against [`ParserLimits`] and only then runs the
//! typed decode.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Safe config parsing errors
#[derive(Debug, Error)]
pub enum SafeConfigError {
    #[error("Input too large: {size} bytes exceeds limit of {max}")]
    InputTooLarge { size: usize, max: usize },

    #[error("Too many alias references: {count} exceeds limit of {max}")]
    TooManyAliases { count: usize, max: usize },

    #[error("Nesting depth exceeds limit of {max}")]
    TooDeep { max: usize },

    #[error("Node count exceeds limit of {max}")]
    TooManyNodes { max: usize },

    #[error("Key length {len} exceeds limit of {max}")]
    KeyTooLong { len: usize, max: usize },

    #[error("Scalar value of {len} bytes exceeds limit of {max}")]
    ValueTooLarge { len: usize, max: usize },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ceilings enforced before any typed decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserLimits {
    /// Maximum raw input size in bytes
    pub max_input_bytes: usize,
    /// Maximum nesting depth of mappings and sequences (root collection = 1)
    pub max_depth: usize,
    /// Maximum number of nodes in the decoded tree
    pub max_nodes: usize,
    /// Maximum mapping key length in bytes
    pub max_key_length: usize,
    /// Maximum scalar value length in bytes
    pub max_value_bytes: usize,
    /// Maximum number of `*alias` references in the raw input
    pub max_aliases: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: 1024 * 1024,
            max_depth: 32,
            max_nodes: 10_000,
            max_key_length: 256,
            max_value_bytes: 64 * 1024,
            max_aliases: 50,
        }
    }
}

impl ParserLimits {
    /// Builder: set the maximum nesting depth
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Builder: set the maximum node count
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    /// Builder: set the maximum raw input size
    pub fn with_max_input_bytes(mut self, max_input_bytes: usize) -> Self {
        self.max_input_bytes = max_input_bytes;
        self
    }

    /// Builder: set the maximum alias count
    pub fn with_max_aliases(mut self, max_aliases: usize) -> Self {
        self.max_aliases = max_aliases;
        self
    }
}

/// Bounded YAML/JSON configuration parser
#[derive(Debug, Clone, Default)]
pub struct SafeConfigParser {
    limits: ParserLimits,
}

impl SafeConfigParser {
    /// Create a parser with the given limits
    pub fn new(limits: ParserLimits) -> Self {
        Self { limits }
    }

    /// Active limits
    pub fn limits(&self) -> &ParserLimits {
        &self.limits
    }

    /// Decode `input` into a generic tree, enforcing every limit
    pub fn parse_value(&self, input: &str) -> Result<Value, SafeConfigError> {
        if input.len() > self.limits.max_input_bytes {
            return Err(SafeConfigError::InputTooLarge {
                size: input.len(),
                max: self.limits.max_input_bytes,
            });
        }

        let aliases = count_alias_references(input);
        if aliases > self.limits.max_aliases {
            warn!(
                aliases,
                max = self.limits.max_aliases,
                "Rejecting config with excessive aliases"
            );
            return Err(SafeConfigError::TooManyAliases {
                count: aliases,
                max: self.limits.max_aliases,
            });
        }

        let value: Value =
            serde_yaml::from_str(input).map_err(|e| SafeConfigError::Parse(e.to_string()))?;

        let mut nodes = 0usize;
        self.check_node(&value, 0, &mut nodes)?;
        debug!(nodes, bytes = input.len(), "Config passed structural limits");

        Ok(value)
    }

    /// Decode `input` into `T` after the structural checks pass
    pub fn parse<T: DeserializeOwned>(&self, input: &str) -> Result<T, SafeConfigError> {
        let value = self.parse_value(input)?;
        serde_yaml::from_value(value).map_err(|e| SafeConfigError::Decode(e.to_string()))
    }

    /// Read and decode a file, checking its size before reading it
    pub fn parse_file<T: DeserializeOwned>(&self, path: &Path) -> Result<T, SafeConfigError> {
        let size = std::fs::metadata(path)?.len();
        let max = self.limits.max_input_bytes;
        if size > max as u64 {
            return Err(SafeConfigError::InputTooLarge {
                size: usize::try_from(size).unwrap_or(usize::MAX),
                max,
            });
        }

        let content = std::fs::read_to_string(path)?;
        self.parse(&content)
    }

    fn check_node(
        &self,
        value: &Value,
        depth: usize,
        nodes: &mut usize,
    ) -> Result<(), SafeConfigError> {
        *nodes += 1;
        if *nodes > self.limits.max_nodes {
            return Err(SafeConfigError::TooManyNodes {
                max: self.limits.max_nodes,
            });
        }

        match value {
            Value::Mapping(map) => {
                let depth = self.enter(depth)?;
                for (key, child) in map {
                    let key_len = scalar_len(key).unwrap_or(0);
                    if key_len > self.limits.max_key_length {
                        return Err(SafeConfigError::KeyTooLong {
                            len: key_len,
                            max: self.limits.max_key_length,
                        });
                    }
                    self.check_node(key, depth, nodes)?;
                    self.check_node(child, depth, nodes)?;
                }
            }
            Value::Sequence(items) => {
                let depth = self.enter(depth)?;
                for item in items {
                    self.check_node(item, depth, nodes)?;
                }
            }
            Value::Tagged(tagged) => self.check_node(&tagged.value, depth, nodes)?,
            scalar => {
                let len = scalar_len(scalar).unwrap_or(0);
                if len > self.limits.max_value_bytes {
                    return Err(SafeConfigError::ValueTooLarge {
                        len,
                        max: self.limits.max_value_bytes,
                    });
                }
            }
        }

        Ok(())
    }

    fn enter(&self, depth: usize) -> Result<usize, SafeConfigError> {
        let next = depth + 1;
        if next > self.limits.max_depth {
            return Err(SafeConfigError::TooDeep {
                max: self.limits.max_depth,
            });
        }
        Ok(next)
    }
}

fn scalar_len(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.len()),
        Value::Number(n) => Some(n.to_string().len()),
        Value::Bool(_) | Value::Null => Some(0),
        _ => None,
    }
}

/// Count `*alias` references outside quoted scalars and comments
fn count_alias_references(input: &str) -> usize {
    let mut count = 0;

    for line in input.lines() {
        let mut in_single = false;
        let mut in_double = false;
        let mut prev: Option<char> = None;
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\'' if !in_double => in_single = !in_single,
                '"' if !in_single && prev != Some('\\') => in_double = !in_double,
                '#' if !in_single && !in_double && prev.is_none_or(char::is_whitespace) => break,
                '*' if !in_single && !in_double => {
                    let at_token_start = prev.is_none_or(|p| {
                        p.is_whitespace() || matches!(p, '[' | '{' | ',' | ':' | '-')
                    });
                    let names_anchor = chars
                        .peek()
                        .is_some_and(|n| n.is_alphanumeric() || matches!(n, '_' | '-'));
                    if at_token_start && names_anchor {
                        count += 1;
                    }
                }
                _ => {}
            }
            prev = Some(c);
        }
    }

    count
}
