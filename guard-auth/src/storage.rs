//! API key sources
//!
//! Keys are loaded as `user -> key` pairs from the process environment or
//! from a file. Plaintext keys only live long enough to be digested by
//! [`crate::ApiKeyAuthenticator`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Default prefix for `AIXGO_API_KEY_<USER>=<key>` variables
pub const DEFAULT_ENV_PREFIX: &str = "AIXGO_API_KEY_";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key file {path} is readable by other users (mode {mode:o})")]
    InsecurePermissions { path: PathBuf, mode: u32 },

    #[error("Invalid key file: {0}")]
    Parse(String),
}

/// Source of API keys
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Load every `user -> key` pair
    async fn load_keys(&self) -> Result<HashMap<String, String>, StorageError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Keys from `<prefix><USER>` environment variables
#[derive(Debug, Clone)]
pub struct EnvironmentKeyStore {
    prefix: String,
    vars: Option<Vec<(String, String)>>,
}

impl EnvironmentKeyStore {
    /// Read from the process environment at load time
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            vars: None,
        }
    }

    /// Read from a fixed set of variables
    pub fn from_vars<I, K, V>(prefix: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prefix: prefix.into(),
            vars: Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }

    fn collect<I>(&self, vars: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut keys = HashMap::new();
        for (name, value) in vars {
            let Some(user) = name.strip_prefix(&self.prefix) else {
                continue;
            };
            let user = user.trim().to_lowercase();
            let value = value.trim();
            if user.is_empty() || value.is_empty() {
                warn!(variable = %name, "Ignoring empty API key variable");
                continue;
            }
            keys.insert(user, value.to_string());
        }
        keys
    }
}

impl Default for EnvironmentKeyStore {
    fn default() -> Self {
        Self::new(DEFAULT_ENV_PREFIX)
    }
}

#[async_trait]
impl KeyStore for EnvironmentKeyStore {
    async fn load_keys(&self) -> Result<HashMap<String, String>, StorageError> {
        let keys = match &self.vars {
            Some(vars) => self.collect(vars.iter().cloned()),
            None => self.collect(std::env::vars()),
        };
        debug!(count = keys.len(), prefix = %self.prefix, "Loaded API keys from environment");
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "environment"
    }
}

/// Keys from a JSON object or `user=key` lines
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    /// Create a file-backed key store
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the key file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn load_keys(&self) -> Result<HashMap<String, String>, StorageError> {
        check_permissions(&self.path).await?;
        let content = tokio::fs::read_to_string(&self.path).await?;
        let keys = parse_key_file(&content)?;
        debug!(count = keys.len(), "Loaded API keys from file");
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(unix)]
async fn check_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = tokio::fs::metadata(path).await?.permissions().mode() & 0o777;
    if mode & 0o004 != 0 {
        return Err(StorageError::InsecurePermissions {
            path: path.to_path_buf(),
            mode,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
async fn check_permissions(path: &Path) -> Result<(), StorageError> {
    tokio::fs::metadata(path).await?;
    Ok(())
}

/// Parse key file content
pub fn parse_key_file(content: &str) -> Result<HashMap<String, String>, StorageError> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('{') {
        let raw: HashMap<String, String> =
            serde_json::from_str(trimmed).map_err(|e| StorageError::Parse(e.to_string()))?;
        return Ok(raw
            .into_iter()
            .filter(|(user, key)| !user.trim().is_empty() && !key.trim().is_empty())
            .map(|(user, key)| (user.trim().to_lowercase(), key.trim().to_string()))
            .collect());
    }

    let mut keys = HashMap::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((user, key)) = line.split_once('=') else {
            return Err(StorageError::Parse(format!(
                "line {} is not in user=key form",
                index + 1
            )));
        };
        let (user, key) = (user.trim(), key.trim());
        if user.is_empty() || key.is_empty() {
            return Err(StorageError::Parse(format!(
                "line {} has an empty user or key",
                index + 1
            )));
        }
        keys.insert(user.to_lowercase(), key.to_string());
    }
    Ok(keys)
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod storage_tests;
