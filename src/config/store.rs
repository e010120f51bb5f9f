use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration store backed by a JSON file
///
/// Uses `ArcSwap` for lock-free reads.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    cache: Arc<ArcSwap<AppConfig>>,
    change_tx: broadcast::Sender<ConfigChange>,
}

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub key: String,
}

impl ConfigStore {
    /// Open the store, writing defaults when the file does not exist
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let config = match tokio::fs::read_to_string(path).await {
            Ok(json) => {
                serde_json::from_str(&json).map_err(|e| AppError::Config(e.to_string()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No configuration at {}, writing defaults", path.display());
                let config = AppConfig::default();
                Self::save_to_file(path, &config).await?;
                config
            }
            Err(e) => return Err(e.into()),
        };

        let (change_tx, _) = broadcast::channel(16);
        Ok(Self {
            path: path.to_path_buf(),
            cache: Arc::new(ArcSwap::from_pointee(config)),
            change_tx,
        })
    }

    /// In-memory store that never touches disk
    pub fn in_memory(config: AppConfig) -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            path: PathBuf::new(),
            cache: Arc::new(ArcSwap::from_pointee(config)),
            change_tx,
        }
    }

    async fn save_to_file(path: &Path, config: &AppConfig) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Ok(());
        }
        let json = serde_json::to_string_pretty(config)?;
        // write-then-rename keeps the file intact if we die mid-write
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the whole configuration
    pub async fn set(&self, config: AppConfig) -> Result<()> {
        config.validate()?;
        Self::save_to_file(&self.path, &config).await?;
        self.cache.store(Arc::new(config));

        let _ = self.change_tx.send(ConfigChange {
            key: "app_config".to_string(),
        });
        Ok(())
    }

    /// Update configuration with a closure
    ///
    /// Read-modify-write; concurrent updates are last-write-wins.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = (**self.cache.load()).clone();
        f(&mut config);
        self.set(config).await
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_config_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("realsense-monitor.json");

        let store = ConfigStore::new(&path).await.unwrap();
        assert_eq!(store.get().web.http_port, 8000);
        assert!(path.exists());

        let mut changes = store.subscribe();
        store
            .update(|c| {
                c.web.http_port = 9000;
                c.session.stale_timeout_secs = 45;
            })
            .await
            .unwrap();
        assert_eq!(store.get().web.http_port, 9000);
        assert_eq!(changes.try_recv().unwrap().key, "app_config");

        // persisted
        let store2 = ConfigStore::new(&path).await.unwrap();
        assert_eq!(store2.get().web.http_port, 9000);
        assert_eq!(store2.get().session.stale_timeout_secs, 45);
    }

    #[tokio::test]
    async fn test_invalid_update_is_rejected() {
        let store = ConfigStore::in_memory(AppConfig::default());
        let result = store.update(|c| c.session.frame_queue_depth = 0).await;
        assert!(matches!(result, Err(AppError::Config(_))));
        assert_eq!(store.get().session.frame_queue_depth, 4);
    }

    #[tokio::test]
    async fn test_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert!(matches!(
            ConfigStore::new(&path).await,
            Err(AppError::Config(_))
        ));
    }
}
