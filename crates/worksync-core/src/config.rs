use anyhow::{Context, Result};
use rand::distributions::{Alphanumeric, DistString};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the worksync daemon and service.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Queue database location; defaults under the user data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// How long confirmed rows stay around before pruning.
    #[serde(default = "default_retain_synced_days")]
    pub retain_synced_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    /// Base URL of the record store's REST surface.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Probe target for reachability checks; the base URL when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_url: Option<String>,

    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerConfig {
    /// Address the peer listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Name announced to peers; generated on first run when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,

    /// Per-write byte ceiling on the peer channel.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_retain_synced_days() -> u64 {
    7
}

fn default_base_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

fn default_probe_interval_secs() -> u64 {
    15
}

fn default_listen_addr() -> String {
    "127.0.0.1:9461".to_string()
}

fn default_max_chunk_bytes() -> usize {
    512
}

fn default_discovery_interval_secs() -> u64 {
    300
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            retain_synced_days: default_retain_synced_days(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            probe_url: None,
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            device_name: None,
            max_chunk_bytes: default_max_chunk_bytes(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_discovery_interval_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating a default file
    /// with a generated device name on first run.
    pub fn load() -> Result<Self> {
        if let Ok(custom_path) = std::env::var("WORKSYNC_CONFIG") {
            return Self::load_from(&PathBuf::from(custom_path));
        }
        Self::load_or_create(&Self::default_config_path()?)
    }

    /// Load from `path`, writing a default file there first when none
    /// exists yet.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let mut config = Self::default();
            config.init();
            config.save_to(path)?;
            return Ok(config);
        }

        let mut config = Self::load_from(path)?;
        if config.peer.device_name.is_none() {
            config.init();
            config.save_to(path)?;
        }
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, toml_str)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_config_path()?)
    }

    /// Fill in anything that must exist but is generated rather than typed
    /// in, currently just the device name.
    pub fn init(&mut self) {
        if self.peer.device_name.is_none() {
            let suffix = Alphanumeric
                .sample_string(&mut rand::thread_rng(), 5)
                .to_lowercase();
            self.peer.device_name = Some(format!("worksync-{suffix}"));
        }
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let home_dir = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home_dir
            .join(".config")
            .join("worksync")
            .join("config.toml"))
    }

    /// Queue database path, configured or defaulted under the data dir.
    pub fn get_database_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.storage.database_path {
            return Ok(path.clone());
        }
        let home_dir = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home_dir
            .join(".local")
            .join("share")
            .join("worksync")
            .join("queue.db"))
    }

    /// Name announced on the peer channel; `init` has normally filled it.
    pub fn device_name(&self) -> String {
        self.peer
            .device_name
            .clone()
            .unwrap_or_else(|| "worksync".to_string())
    }

    /// URL the connectivity probe targets.
    pub fn probe_url(&self) -> &str {
        self.remote
            .probe_url
            .as_deref()
            .unwrap_or(&self.remote.base_url)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.remote.probe_interval_secs)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery.interval_secs)
    }

    pub fn default_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.default_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("")]
    #[case("[remote]\nbase_url = \"http://127.0.0.1:8787\"\n")]
    #[case("[peer]\n")]
    fn missing_sections_fall_back_to_defaults(#[case] content: &str) {
        let config: Config = toml::from_str(content).unwrap();
        assert_eq!(config.peer.listen_addr, "127.0.0.1:9461");
        assert_eq!(config.peer.max_chunk_bytes, 512);
        assert_eq!(config.discovery.interval_secs, 300);
        assert_eq!(config.cache.default_ttl_secs, 3600);
        assert_eq!(config.remote.probe_interval_secs, 15);
        assert_eq!(config.storage.retain_synced_days, 7);
    }

    #[test]
    fn overrides_are_honored() {
        let config: Config = toml::from_str(
            "[remote]\n\
             base_url = \"http://store.example\"\n\
             probe_url = \"http://probe.example/ping\"\n\
             [discovery]\n\
             interval_secs = 60\n",
        )
        .unwrap();
        assert_eq!(config.remote.base_url, "http://store.example");
        assert_eq!(config.probe_url(), "http://probe.example/ping");
        assert_eq!(config.discovery_interval(), Duration::from_secs(60));
    }

    #[test]
    fn probe_url_falls_back_to_base_url() {
        let config = Config::default();
        assert_eq!(config.probe_url(), "http://127.0.0.1:8787");
    }

    #[test]
    fn init_generates_a_device_name_once() {
        let mut config = Config::default();
        config.init();
        let name = config.peer.device_name.clone().unwrap();
        assert!(name.starts_with("worksync-"));
        assert_eq!(name.len(), "worksync-".len() + 5);

        config.init();
        assert_eq!(config.peer.device_name.unwrap(), name);
    }

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.init();
        config.storage.database_path = Some(dir.path().join("queue.db"));
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn first_run_writes_a_config_with_a_device_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert!(created.peer.device_name.is_some());

        let reloaded = Config::load_or_create(&path).unwrap();
        assert_eq!(reloaded, created);
    }
}
