//! Namespaced local key-value storage.
//!
//! The browser keeps tabmind's persistent state in a single local
//! store; every per-server entry is namespaced as `mcp.<serverId>.*`
//! so entries for different servers cannot collide.

use crate::error::{AuthError, AuthResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Key builders for per-server entries.
pub mod keys {
    /// Stored tokens for a server.
    pub fn tokens(server_id: &str) -> String {
        format!("mcp.{server_id}.tokens")
    }

    /// OAuth client registration for a server.
    pub fn client(server_id: &str) -> String {
        format!("mcp.{server_id}.client")
    }

    /// User enabled flag for a server.
    pub fn enabled(server_id: &str) -> String {
        format!("mcp.{server_id}.enabled")
    }
}

/// Persistent key-value store backed by a single JSON file.
///
/// Values are arbitrary JSON; typed access happens at the call site
/// via [`LocalStore::get`]. An entry that fails to deserialize into
/// the requested type is treated as absent rather than poisoning the
/// whole store.
pub struct LocalStore {
    /// Path to the store file.
    path: PathBuf,
    /// In-memory cache of the file contents.
    cache: RwLock<Option<HashMap<String, Value>>>,
}

impl LocalStore {
    /// Create a store at the default platform path.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined.
    pub fn new() -> AuthResult<Self> {
        let path = crate::default_store_path().ok_or(AuthError::NoDataDir)?;
        Ok(Self {
            path,
            cache: RwLock::new(None),
        })
    }

    /// Create a store with a custom path.
    ///
    /// Useful for testing or custom configurations.
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            cache: RwLock::new(None),
        }
    }

    /// Get the path to the store file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Get a typed value for a key.
    ///
    /// Returns `None` if the key is absent or its value does not
    /// deserialize into `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> AuthResult<Option<T>> {
        let all = self.all().await?;
        match all.get(key) {
            Some(value) => match serde_json::from_value::<T>(value.clone()) {
                Ok(v) => Ok(Some(v)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable store entry");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Set a value for a key, creating the store file if needed.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> AuthResult<()> {
        debug!(key = %key, "Writing store entry");

        let mut all = self.all().await?;
        all.insert(key.to_string(), serde_json::to_value(value)?);
        self.write_all(&all).await?;

        // Invalidate cache
        *self.cache.write().await = None;

        Ok(())
    }

    /// Remove a key.
    ///
    /// Returns `true` if the key existed.
    pub async fn remove(&self, key: &str) -> AuthResult<bool> {
        debug!(key = %key, "Removing store entry");

        let mut all = self.all().await?;
        let existed = all.remove(key).is_some();

        if existed {
            self.write_all(&all).await?;
            *self.cache.write().await = None;
        }

        Ok(existed)
    }

    /// List the keys under a prefix.
    pub async fn keys_with_prefix(&self, prefix: &str) -> AuthResult<Vec<String>> {
        let all = self.all().await?;
        Ok(all.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }

    /// Remove every key under a prefix.
    ///
    /// Returns how many entries were removed.
    pub async fn remove_prefix(&self, prefix: &str) -> AuthResult<usize> {
        let mut all = self.all().await?;
        let before = all.len();
        all.retain(|k, _| !k.starts_with(prefix));
        let removed = before - all.len();

        if removed > 0 {
            self.write_all(&all).await?;
            *self.cache.write().await = None;
        }

        Ok(removed)
    }

    /// Get all stored entries.
    async fn all(&self) -> AuthResult<HashMap<String, Value>> {
        // Check cache first
        {
            let cache = self.cache.read().await;
            if let Some(data) = &*cache {
                return Ok(data.clone());
            }
        }

        // Read from file
        let data = self.read_all().await?;

        // Update cache
        *self.cache.write().await = Some(data.clone());

        Ok(data)
    }

    /// Read all entries from the store file.
    async fn read_all(&self) -> AuthResult<HashMap<String, Value>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;

        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        Ok(serde_json::from_str(&content)?)
    }

    /// Write all entries to the store file.
    async fn write_all(&self, data: &HashMap<String, Value>) -> AuthResult<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(data)?;
        tokio::fs::write(&self.path, &content).await?;

        // Set restrictive permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&self.path, perms)
                .await
                .map_err(|e| {
                    AuthError::Permissions(format!(
                        "Failed to set permissions on {:?}: {}",
                        self.path, e
                    ))
                })?;
        }

        debug!(path = ?self.path, "Wrote local store");
        Ok(())
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.path)
            .finish()
    }
}
