//! Durable interrupt store: one JSON file per token.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{BridgeError, Result};

use super::{Interrupt, InterruptStore};

/// Interrupt store backed by a directory of `<token>.json` files.
#[derive(Debug)]
pub struct FileInterruptStore {
    base_dir: PathBuf,
    // Serializes read-modify-write cycles so consumption stays single-use.
    write_lock: Mutex<()>,
}

impl FileInterruptStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn new_default() -> Self {
        Self::new(default_dir())
    }

    pub fn default_dir() -> PathBuf {
        default_dir()
    }

    /// Tokens are UUIDs; anything else cannot name a file here.
    fn path_for(&self, id: &str) -> Option<PathBuf> {
        let uuid = uuid::Uuid::parse_str(id).ok()?;
        Some(self.base_dir.join(format!("{uuid}.json")))
    }

    async fn read(&self, id: &str) -> Result<Option<Interrupt>> {
        let Some(path) = self.path_for(id) else {
            return Ok(None);
        };
        let raw = match fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(BridgeError::Io(err)),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    async fn write(&self, interrupt: &Interrupt) -> Result<()> {
        let path = self.path_for(&interrupt.id).ok_or_else(|| {
            BridgeError::InvalidArgument(format!("interrupt id {} is not a UUID", interrupt.id))
        })?;
        fs::create_dir_all(&self.base_dir).await?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(interrupt)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl InterruptStore for FileInterruptStore {
    async fn insert(&self, interrupt: Interrupt) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(&interrupt).await
    }

    async fn get(&self, id: &str) -> Result<Option<Interrupt>> {
        self.read(id).await
    }

    async fn update(&self, interrupt: Interrupt) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match self.read(&interrupt.id).await? {
            None => Err(BridgeError::InterruptNotFound(interrupt.id)),
            Some(existing) if existing.consumed => {
                Err(BridgeError::InterruptAlreadyConsumed(interrupt.id))
            }
            Some(_) => self.write(&interrupt).await,
        }
    }

    async fn consume(&self, id: &str) -> Result<Interrupt> {
        let _guard = self.write_lock.lock().await;
        let mut interrupt = self
            .read(id)
            .await?
            .ok_or_else(|| BridgeError::InterruptNotFound(id.to_string()))?;
        if interrupt.consumed {
            return Err(BridgeError::InterruptAlreadyConsumed(id.to_string()));
        }
        interrupt.consumed = true;
        self.write(&interrupt.tombstone()).await?;
        Ok(interrupt)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let Some(path) = self.path_for(id) else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BridgeError::Io(err)),
        }
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut entries = match fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(BridgeError::Io(err)),
        };

        let mut purged = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stale = match fs::read(&path).await {
                Ok(raw) => match serde_json::from_slice::<Interrupt>(&raw) {
                    Ok(interrupt) => interrupt.created_at < cutoff,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping unreadable interrupt file");
                        false
                    }
                },
                Err(_) => false,
            };
            if stale {
                fs::remove_file(&path).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

fn default_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".toolbridge").join("interrupts"))
        .unwrap_or_else(|| PathBuf::from(".toolbridge/interrupts"))
}
