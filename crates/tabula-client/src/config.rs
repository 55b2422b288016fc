// Client-side defaults and configuration layering.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

pub(crate) const DEFAULT_RECONNECT_BASE_MS: u64 = 1_000;
pub(crate) const DEFAULT_RECONNECT_CAP_MS: u64 = 30_000;
pub(crate) const DEFAULT_STALE_THRESHOLD: u32 = 5;

/// Hard safety cap for any single wire frame.
///
/// The frame reader allocates a buffer sized by the advertised length, so an
/// uncapped length from a confused or hostile peer is an allocator DoS.
/// Override with `TABULA_MAX_FRAME_BYTES`.
pub(crate) const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Reconnect and framing knobs for one sync session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// First retry delay; doubles on every consecutive failure.
    pub reconnect_base: Duration,
    /// Flat delay once past the stale threshold.
    pub reconnect_cap: Duration,
    /// Consecutive failures after which the next successful reconnect first
    /// signals the stale-client hook instead of silently resubscribing.
    pub stale_threshold: u32,
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_base: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            reconnect_cap: Duration::from_millis(DEFAULT_RECONNECT_CAP_MS),
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct ClientConfigOverride {
    reconnect_base_ms: Option<u64>,
    reconnect_cap_ms: Option<u64>,
    stale_threshold: Option<u32>,
    max_frame_bytes: Option<usize>,
}

impl ClientConfig {
    /// Defaults, then `TABULA_*` environment variables, then an optional YAML
    /// override file (`config_path` argument or `TABULA_CLIENT_CONFIG`).
    pub fn from_env_or_yaml(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::from_env();
        let override_path = config_path
            .map(|value| value.to_string())
            .or_else(|| std::env::var("TABULA_CLIENT_CONFIG").ok());
        let contents = match override_path.as_deref() {
            Some(path) => match fs::read_to_string(path) {
                Ok(contents) => Some(contents),
                Err(err) => {
                    return Err(err).with_context(|| format!("read client config: {path}"));
                }
            },
            None => None,
        };
        if let Some(contents) = contents {
            let override_cfg: ClientConfigOverride =
                serde_yaml::from_str(&contents).context("parse client config yaml")?;
            override_cfg.apply(&mut config);
        }
        Ok(config)
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = read_u64_env("TABULA_RECONNECT_BASE_MS") {
            config.reconnect_base = Duration::from_millis(value);
        }
        if let Some(value) = read_u64_env("TABULA_RECONNECT_CAP_MS") {
            config.reconnect_cap = Duration::from_millis(value);
        }
        if let Some(value) = read_u32_env("TABULA_STALE_THRESHOLD") {
            config.stale_threshold = value;
        }
        if let Some(value) = read_usize_env("TABULA_MAX_FRAME_BYTES") {
            config.max_frame_bytes = value;
        }
        config
    }

    /// Delay before the next reconnect attempt, given the number of
    /// consecutive failures so far: exponential from the base until the stale
    /// threshold, a flat cap beyond it.
    pub(crate) fn backoff_delay(&self, failures: u32) -> Duration {
        if failures < self.stale_threshold {
            self.reconnect_base
                .saturating_mul(1u32 << failures.min(20))
        } else {
            self.reconnect_cap
        }
    }
}

impl ClientConfigOverride {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(value) = self.reconnect_base_ms
            && value > 0
        {
            config.reconnect_base = Duration::from_millis(value);
        }
        if let Some(value) = self.reconnect_cap_ms
            && value > 0
        {
            config.reconnect_cap = Duration::from_millis(value);
        }
        if let Some(value) = self.stale_threshold
            && value > 0
        {
            config.stale_threshold = value;
        }
        if let Some(value) = self.max_frame_bytes
            && value > 0
        {
            config.max_frame_bytes = value;
        }
    }
}

fn read_u64_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn read_u32_env(key: &str) -> Option<u32> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
}

fn read_usize_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect_base, Duration::from_secs(1));
        assert_eq!(config.reconnect_cap, Duration::from_secs(30));
        assert_eq!(config.stale_threshold, DEFAULT_STALE_THRESHOLD);
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
    }

    #[test]
    fn backoff_doubles_until_the_threshold_then_caps() {
        let config = ClientConfig::default();
        assert_eq!(config.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(config.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(4), Duration::from_secs(16));
        assert_eq!(config.backoff_delay(5), Duration::from_secs(30));
        assert_eq!(config.backoff_delay(40), Duration::from_secs(30));
    }

    #[test]
    #[serial_test::serial]
    fn config_from_env_variables() {
        unsafe {
            std::env::set_var("TABULA_RECONNECT_BASE_MS", "250");
            std::env::set_var("TABULA_RECONNECT_CAP_MS", "5000");
            std::env::set_var("TABULA_STALE_THRESHOLD", "3");
            std::env::set_var("TABULA_MAX_FRAME_BYTES", "1048576");
        }

        let config = ClientConfig::from_env();
        assert_eq!(config.reconnect_base, Duration::from_millis(250));
        assert_eq!(config.reconnect_cap, Duration::from_millis(5000));
        assert_eq!(config.stale_threshold, 3);
        assert_eq!(config.max_frame_bytes, 1048576);

        unsafe {
            std::env::remove_var("TABULA_RECONNECT_BASE_MS");
            std::env::remove_var("TABULA_RECONNECT_CAP_MS");
            std::env::remove_var("TABULA_STALE_THRESHOLD");
            std::env::remove_var("TABULA_MAX_FRAME_BYTES");
        }
    }

    #[test]
    #[serial_test::serial]
    fn config_from_yaml_file() {
        let yaml = r#"
reconnect_base_ms: 100
reconnect_cap_ms: 2000
stale_threshold: 7
max_frame_bytes: 65536
"#;
        let mut temp_file = NamedTempFile::new().expect("temp file");
        temp_file.write_all(yaml.as_bytes()).expect("write");
        let path = temp_file.path().to_str().expect("path");

        let config = ClientConfig::from_env_or_yaml(Some(path)).expect("config");
        assert_eq!(config.reconnect_base, Duration::from_millis(100));
        assert_eq!(config.reconnect_cap, Duration::from_millis(2000));
        assert_eq!(config.stale_threshold, 7);
        assert_eq!(config.max_frame_bytes, 65536);
    }

    #[test]
    #[serial_test::serial]
    fn config_yaml_overrides_ignore_zero_values() {
        let yaml = r#"
reconnect_base_ms: 0
stale_threshold: 9
"#;
        let mut temp_file = NamedTempFile::new().expect("temp file");
        temp_file.write_all(yaml.as_bytes()).expect("write");
        let path = temp_file.path().to_str().expect("path");

        let config = ClientConfig::from_env_or_yaml(Some(path)).expect("config");
        assert_eq!(
            config.reconnect_base,
            Duration::from_millis(DEFAULT_RECONNECT_BASE_MS)
        );
        assert_eq!(config.stale_threshold, 9);
    }

    #[test]
    fn config_invalid_yaml_file_returns_error() {
        let mut temp_file = NamedTempFile::new().expect("temp file");
        temp_file
            .write_all(b"reconnect_base_ms: [invalid")
            .expect("write");
        let path = temp_file.path().to_str().expect("path");
        assert!(ClientConfig::from_env_or_yaml(Some(path)).is_err());
    }

    #[test]
    fn config_nonexistent_file_returns_error() {
        let result = ClientConfig::from_env_or_yaml(Some("/nonexistent/path/config.yaml"));
        assert!(result.is_err());
    }
}
