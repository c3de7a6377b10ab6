use crate::defaults;
use crate::error::{IvecdError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub gselect: GselectConfig,
    pub posterior: PosteriorConfig,
    pub extract: ExtractConfig,
    pub pool: PoolConfig,
}

/// Connection loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub max_request_bytes: usize,
    pub retry_pause_ms: u64,
    pub ack: String,
}

/// Gaussian selection (stage 1) configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GselectConfig {
    /// Number of Gaussians to keep per frame
    pub num_gselect: usize,
}

/// Posterior (stage 2) configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PosteriorConfig {
    /// If nonzero, posteriors below this threshold are pruned and the rest renormalized
    pub min_post: f32,
}

/// Extraction (stage 3) configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractConfig {
    pub acoustic_weight: f64,
    /// Upper bound on the weighted frame count of one utterance (0 = no bound)
    pub max_count: f64,
    /// Log the change in objective function from estimating each vector
    pub compute_objf_change: bool,
}

/// Extraction worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub num_threads: usize,
    /// Tasks allowed to wait for a worker before submission blocks
    pub queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::BIND_ADDR.to_string(),
            port: defaults::PORT,
            max_request_bytes: defaults::MAX_REQUEST_BYTES,
            retry_pause_ms: defaults::RETRY_PAUSE_MS,
            ack: defaults::ACK.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }

    /// `bind:port` string for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl Default for GselectConfig {
    fn default() -> Self {
        Self {
            num_gselect: defaults::NUM_GSELECT,
        }
    }
}

impl Default for PosteriorConfig {
    fn default() -> Self {
        Self {
            min_post: defaults::MIN_POST,
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            acoustic_weight: defaults::ACOUSTIC_WEIGHT,
            max_count: defaults::MAX_COUNT,
            compute_objf_change: defaults::COMPUTE_OBJF_CHANGE,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_threads: defaults::NUM_THREADS,
            queue_depth: defaults::QUEUE_DEPTH,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - IVECD_PORT → server.port
    /// - IVECD_NUM_THREADS → pool.num_threads
    /// - IVECD_MIN_POST → posterior.min_post
    ///
    /// Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(port) = std::env::var("IVECD_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }

        if let Ok(threads) = std::env::var("IVECD_NUM_THREADS")
            && let Ok(threads) = threads.parse()
        {
            self.pool.num_threads = threads;
        }

        if let Ok(min_post) = std::env::var("IVECD_MIN_POST")
            && let Ok(min_post) = min_post.parse()
        {
            self.posterior.min_post = min_post;
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> Result<()> {
            Err(IvecdError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        }

        if self.gselect.num_gselect == 0 {
            return invalid("gselect.num_gselect", "must be at least 1");
        }
        if !(0.0..1.0).contains(&self.posterior.min_post) {
            return invalid("posterior.min_post", "must be in [0, 1)");
        }
        if !(self.extract.acoustic_weight > 0.0) {
            return invalid("extract.acoustic_weight", "must be positive");
        }
        if !(self.extract.max_count >= 0.0) {
            return invalid("extract.max_count", "must not be negative");
        }
        if self.pool.num_threads == 0 {
            return invalid("pool.num_threads", "must be at least 1");
        }
        if self.pool.queue_depth == 0 {
            return invalid("pool.queue_depth", "must be at least 1");
        }
        if self.server.max_request_bytes < defaults::QUIT_SENTINEL.len() {
            return invalid(
                "server.max_request_bytes",
                "must be large enough to hold the quit sentinel",
            );
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/ivecd/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ivecd")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_ivecd_env() {
        remove_env("IVECD_PORT");
        remove_env("IVECD_NUM_THREADS");
        remove_env("IVECD_MIN_POST");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.server.port, 1428);
        assert_eq!(config.server.max_request_bytes, 1024);
        assert_eq!(config.server.ack, "Operation completed");
        assert_eq!(config.server.retry_pause(), Duration::from_secs(5));

        assert_eq!(config.gselect.num_gselect, 50);
        assert_eq!(config.posterior.min_post, 0.0);

        assert_eq!(config.extract.acoustic_weight, 1.0);
        assert_eq!(config.extract.max_count, 0.0);
        assert!(config.extract.compute_objf_change);

        assert_eq!(config.pool.num_threads, 1);
        assert_eq!(config.pool.queue_depth, 20);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [server]
            bind = "127.0.0.1"
            port = 9000
            retry_pause_ms = 250

            [gselect]
            num_gselect = 20

            [posterior]
            min_post = 0.025

            [extract]
            acoustic_weight = 0.1
            max_count = 100.0
            compute_objf_change = false

            [pool]
            num_threads = 4
            queue_depth = 8
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.server.listen_addr(), "127.0.0.1:9000");
        assert_eq!(config.server.retry_pause(), Duration::from_millis(250));
        assert_eq!(config.gselect.num_gselect, 20);
        assert_eq!(config.posterior.min_post, 0.025);
        assert_eq!(config.extract.acoustic_weight, 0.1);
        assert_eq!(config.extract.max_count, 100.0);
        assert!(!config.extract.compute_objf_change);
        assert_eq!(config.pool.num_threads, 4);
        assert_eq!(config.pool.queue_depth, 8);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let toml_content = r#"
            [pool]
            num_threads = 8
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.pool.num_threads, 8);
        assert_eq!(config.pool.queue_depth, 20);
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.extract, ExtractConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_ivecd_env();

        set_env("IVECD_PORT", "1500");
        set_env("IVECD_NUM_THREADS", "3");
        set_env("IVECD_MIN_POST", "0.05");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.server.port, 1500);
        assert_eq!(config.pool.num_threads, 3);
        assert_eq!(config.posterior.min_post, 0.05);

        clear_ivecd_env();
    }

    #[test]
    fn test_env_override_unparseable_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_ivecd_env();

        set_env("IVECD_PORT", "not-a-port");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.server.port, 1428);

        clear_ivecd_env();
    }

    #[test]
    fn test_validate_rejects_zero_gselect() {
        let mut config = Config::default();
        config.gselect.num_gselect = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gselect.num_gselect"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_min_post() {
        let mut config = Config::default();
        config.posterior.min_post = -0.1;
        assert!(config.validate().is_err());
        config.posterior.min_post = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_extraction_options() {
        let mut config = Config::default();
        config.extract.acoustic_weight = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.extract.max_count = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let mut config = Config::default();
        config.pool.num_threads = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pool.queue_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[server\nport = ").unwrap();

        assert!(Config::load(temp_file.path()).is_err());
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_ivecd_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_default_path_ends_with_config_toml() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.contains("ivecd"));
        assert!(path_str.ends_with("config.toml"));
    }
}
