use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::episode::podcast_dir;
use crate::error::{ConfigError, SyncError};
use crate::model::Podcast;
use crate::retention::RetentionPolicy;
use crate::store::EpisodeStore;

const DEFAULT_DATABASE: &str = "podkeep.db";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Contents of the TOML configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Download root; relative paths are taken from the config file's directory
    pub base_dir: PathBuf,
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub notify_webhook: Option<String>,
    /// Address of the daemon's HTTP interface; disabled when unset
    #[serde(default)]
    pub listen: Option<SocketAddr>,
    #[serde(default)]
    pub podcasts: Vec<Podcast>,

    #[serde(skip)]
    config_dir: PathBuf,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content, path)
    }

    /// Parse `content` as if it had been read from `path`
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.config_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Reject duplicate podcast names
    fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for podcast in &self.podcasts {
            if !names.insert(podcast.name.as_str()) {
                return Err(ConfigError::DuplicatePodcast(podcast.name.clone()));
            }
        }
        Ok(())
    }

    /// Retention settings that do not parse
    ///
    /// These do not fail loading; the affected podcast is skipped at every
    /// cycle until the file is fixed.
    pub fn retention_problems(&self) -> Vec<ConfigError> {
        self.podcasts
            .iter()
            .filter_map(|podcast| RetentionPolicy::for_podcast(podcast).err())
            .collect()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    pub fn base_dir(&self) -> PathBuf {
        self.resolve(&self.base_dir)
    }

    /// Database file, `podkeep.db` next to the config file unless set
    pub fn database_path(&self) -> PathBuf {
        match &self.database {
            Some(path) => self.resolve(path),
            None => self.config_dir.join(DEFAULT_DATABASE),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Make the store's subscriptions match the config file
    ///
    /// Every configured podcast is stored and gets its download directory.
    /// Podcasts no longer in the file are deactivated; their episodes and
    /// files are left alone.
    pub fn register_podcasts(&self, store: &dyn EpisodeStore) -> Result<(), SyncError> {
        for problem in self.retention_problems() {
            warn!(error = %problem, "Podcast will be skipped until fixed");
        }

        let base_dir = self.base_dir();
        for podcast in &self.podcasts {
            store.upsert_podcast(podcast)?;

            let dir = podcast_dir(&base_dir, &podcast.name);
            std::fs::create_dir_all(&dir).map_err(|e| ConfigError::CreateDirectoryFailed {
                path: dir.clone(),
                source: e,
            })?;
        }

        let names: Vec<&str> = self.podcasts.iter().map(|p| p.name.as_str()).collect();
        for name in store.deactivate_podcasts_except(&names)? {
            info!(podcast = %name, "Podcast no longer configured, unsubscribed");
        }

        info!(count = self.podcasts.len(), "Registered podcasts");
        Ok(())
    }
}
