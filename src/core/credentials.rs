//! Named secret storage.
//!
//! The chat and image clients read the API key through [`CredentialStore`];
//! the `set-key` command writes it.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::ChatError;

/// Asynchronous, durable key-value store for secrets.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the stored value, or `ChatError::MissingCredential` when the
    /// name is absent or its value is empty.
    async fn get(&self, name: &str) -> Result<String, ChatError>;

    /// Persists every entry of `values`, replacing existing ones.
    async fn set(&self, values: HashMap<String, String>) -> Result<(), ChatError>;
}

/// JSON file store, e.g. `~/.config/llmium/credentials.json`.
///
/// Writes go through a temporary file and a rename so a crash never leaves a
/// half-written file behind. On Unix the file is created with mode `0600`.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>, ChatError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(ChatError::StorageError(format!(
                    "read {}: {e}",
                    self.path.display()
                )));
            }
        };

        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&raw)
            .map_err(|e| ChatError::StorageError(format!("parse {}: {e}", self.path.display())))
    }

    async fn write_all(&self, values: &BTreeMap<String, String>) -> Result<(), ChatError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let serialized = serde_json::to_string_pretty(values)
            .map_err(|e| ChatError::StorageError(format!("serialize credentials: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serialized).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self, name: &str) -> Result<String, ChatError> {
        let values = self.read_all().await?;
        values
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| ChatError::MissingCredential(name.to_string()))
    }

    async fn set(&self, values: HashMap<String, String>) -> Result<(), ChatError> {
        let _guard = self.write_lock.lock().await;

        let mut stored = self.read_all().await?;
        let names: Vec<String> = values.keys().cloned().collect();
        stored.extend(values);
        self.write_all(&stored).await?;

        info!(path = %self.path.display(), names = ?names, "Saved credentials");
        Ok(())
    }
}

/// In-process store; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(name: impl Into<String>, value: impl Into<String>) -> Self {
        let store = Self::new();
        store.values.write().insert(name.into(), value.into());
        store
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, name: &str) -> Result<String, ChatError> {
        self.values
            .read()
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| ChatError::MissingCredential(name.to_string()))
    }

    async fn set(&self, values: HashMap<String, String>) -> Result<(), ChatError> {
        debug!(count = values.len(), "Storing credentials in memory");
        self.values.write().extend(values);
        Ok(())
    }
}

/// Masks a secret for display, keeping a short prefix and the last four
/// characters when it is long enough to stay unguessable.
#[must_use]
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() < 12 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
