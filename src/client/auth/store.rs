//! Token persistence.

use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::TokenStore;
use crate::core::TokenPair;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    pair: RwLock<Option<TokenPair>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: TokenPair) -> Self {
        Self {
            pair: RwLock::new(Some(pair)),
        }
    }
}

#[async_trait::async_trait]
impl TokenStore for MemoryStore {
    async fn load(&self) -> Option<TokenPair> {
        self.pair.read().await.clone()
    }

    async fn save(&self, pair: TokenPair) -> Result<(), Error> {
        *self.pair.write().await = Some(pair);
        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        self.pair.write().await.take();
        Ok(())
    }
}

/// Keeps the pair in a JSON file so it outlives the process.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cached: RwLock<Option<TokenPair>>,
}

impl FileStore {
    /// Open the store, reading whatever pair is already on disk.
    ///
    /// A missing or unreadable file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cached = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<TokenPair>(&bytes) {
                Ok(pair) => Some(pair),
                Err(err) => {
                    warn!(message = "Ignoring corrupt token file", path = %path.display(), error = %err);
                    None
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(message = "Unable to read token file", path = %path.display(), error = %err);
                None
            }
        };
        debug!(message = "Opened token file", path = %path.display(), has_tokens = cached.is_some());
        Self {
            path,
            cached: RwLock::new(cached),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> Error {
        Error::Io {
            path: self.path.clone(),
            source,
        }
    }

    async fn write_file(&self, pair: &TokenPair) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| self.io_error(err))?;
            }
        }
        let bytes = serde_json::to_vec_pretty(pair)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|err| self.io_error(err))?;

        // Owner read/write only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&tmp, permissions)
                .await
                .map_err(|err| self.io_error(err))?;
        }

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| self.io_error(err))
    }
}

#[async_trait::async_trait]
impl TokenStore for FileStore {
    async fn load(&self) -> Option<TokenPair> {
        self.cached.read().await.clone()
    }

    async fn save(&self, pair: TokenPair) -> Result<(), Error> {
        let mut cached = self.cached.write().await;
        cached.replace(pair.clone());
        self.write_file(&pair).await
    }

    async fn clear(&self) -> Result<(), Error> {
        let mut cached = self.cached.write().await;
        cached.take();
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }
}
