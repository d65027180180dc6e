//! Append-only NDJSON file backend with size-based rotation

use crate::backend::{AuditBackend, AuditError};
use crate::event::StructuredAuditEvent;
use aixgo_guard_security::validation::validate_file_path;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Rotation limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileBackendConfig {
    /// Size at which the file is rotated
    pub max_file_size: u64,
    /// Rotated files kept next to the active one
    pub max_files: u32,
}

impl Default for FileBackendConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            max_files: 10,
        }
    }
}

struct FileState {
    file: Option<File>,
    size: u64,
}

/// Writes one JSON event per line to a file readable only by the owner
pub struct FileBackend {
    path: PathBuf,
    config: FileBackendConfig,
    state: Mutex<FileState>,
    closed: AtomicBool,
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FileBackend {
    /// Open `path` for appending with default rotation limits
    pub async fn open(path: &Path) -> Result<Self, AuditError> {
        Self::with_config(path, FileBackendConfig::default()).await
    }

    /// Open `path` for appending
    pub async fn with_config(path: &Path, config: FileBackendConfig) -> Result<Self, AuditError> {
        validate_file_path(path)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
            && !fs::try_exists(parent).await?
        {
            fs::create_dir_all(parent).await?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700)).await?;
            }
        }

        let file = open_append(path).await?;
        let size = file.metadata().await?.len();

        Ok(Self {
            path: path.to_path_buf(),
            config,
            state: Mutex::new(FileState {
                file: Some(file),
                size,
            }),
            closed: AtomicBool::new(false),
        })
    }

    /// Active file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn rotate(&self, state: &mut FileState) -> Result<(), AuditError> {
        if let Some(mut file) = state.file.take() {
            file.flush().await?;
        }

        if self.config.max_files == 0 {
            fs::remove_file(&self.path).await?;
        } else {
            for i in (1..self.config.max_files).rev() {
                let from = rotated_path(&self.path, i);
                if fs::try_exists(&from).await.unwrap_or(false)
                    && let Err(e) = fs::rename(&from, rotated_path(&self.path, i + 1)).await
                {
                    warn!(error = %e, index = i, "Failed to shift rotated audit file");
                }
            }
            fs::rename(&self.path, rotated_path(&self.path, 1)).await?;
        }

        state.file = Some(open_append(&self.path).await?);
        state.size = 0;
        debug!("Rotated audit file");
        Ok(())
    }
}

fn rotated_path(path: &Path, index: u32) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

async fn open_append(path: &Path) -> Result<File, AuditError> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o600);

    let file = options.open(path).await?;

    // Pre-existing files keep their mode otherwise
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }
    Ok(file)
}

#[async_trait]
impl AuditBackend for FileBackend {
    async fn write(&self, event: &StructuredAuditEvent) -> Result<(), AuditError> {
        let mut line = event.to_json()?;
        line.push('\n');
        let len = line.len() as u64;

        let mut state = self.state.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(AuditError::Closed);
        }

        if state.size > 0 && state.size + len > self.config.max_file_size {
            self.rotate(&mut state).await?;
        }

        let file = state.file.as_mut().ok_or(AuditError::Closed)?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        state.size += len;
        Ok(())
    }

    async fn close(&self) -> Result<(), AuditError> {
        let mut state = self.state.lock().await;
        self.closed.store(true, Ordering::Release);
        if let Some(mut file) = state.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}
