use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::AppConfig;
use crate::error::{MonitorError, Result};

/// Configuration store backed by a JSON file
///
/// Reads go through `ArcSwap` and never lock. Writes persist to disk first
/// and only then replace the cached value.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    cache: Arc<ArcSwap<AppConfig>>,
}

impl ConfigStore {
    /// Open the store at `path`, writing a default file if none exists
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let config = match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                let config: AppConfig = serde_json::from_str(&json).map_err(|e| {
                    MonitorError::Config(format!("{}: {}", path.display(), e))
                })?;
                config.validate()?;
                debug!(
                    "Loaded configuration from {} ({} cameras)",
                    path.display(),
                    config.cameras.len()
                );
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = AppConfig::default();
                Self::save_to_file(&path, &config).await?;
                info!("Created default configuration at {}", path.display());
                config
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            cache: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    async fn save_to_file(path: &Path, config: &AppConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(config)?;
        // Write-then-rename so a crash never leaves a truncated file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the configuration
    pub async fn set(&self, config: AppConfig) -> Result<()> {
        config.validate()?;
        Self::save_to_file(&self.path, &config).await?;

        info!(
            "Saved configuration to {} ({} cameras)",
            self.path.display(),
            config.cameras.len()
        );
        self.cache.store(Arc::new(config));

        Ok(())
    }

    /// Read-modify-write the configuration
    ///
    /// Concurrent updates are last-writer-wins.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = (**self.cache.load()).clone();
        f(&mut config);
        self.set(config).await
    }
}
