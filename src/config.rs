//! TOML configuration for speedprobe.
//!
//! Layered model: the path in `SPEEDPROBE_CONFIG`, then
//! `/etc/speedprobe/speedprobe.toml`, then compiled-in defaults.  Every
//! section and field is optional in the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// 1 MiB.
pub const MIB: u64 = 1024 * 1024;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SPEEDPROBE_CONFIG";

const SYSTEM_CONFIG_PATH: &str = "/etc/speedprobe/speedprobe.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for both the server and the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProbeConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the effective configuration.
    ///
    /// An explicit path must load.  Otherwise the env var path, then the
    /// system path, then defaults; candidates that fail are recorded on the
    /// result instead of logged, since this runs before tracing is set up.
    pub fn resolve(explicit: Option<&Path>) -> Result<LoadedConfig> {
        if let Some(path) = explicit {
            return Ok(LoadedConfig {
                config: Self::load(path)?,
                source: ConfigSource::File(path.to_path_buf()),
                skipped: Vec::new(),
            });
        }
        let env_path = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        Ok(Self::load_first(env_path.as_deref(), Path::new(SYSTEM_CONFIG_PATH)))
    }

    fn load_first(env_path: Option<&Path>, system_path: &Path) -> LoadedConfig {
        let mut skipped = Vec::new();
        let candidates = env_path
            .into_iter()
            .chain(system_path.exists().then_some(system_path));
        for path in candidates {
            match Self::load(path) {
                Ok(config) => {
                    return LoadedConfig {
                        config,
                        source: ConfigSource::File(path.to_path_buf()),
                        skipped,
                    }
                }
                Err(e) => skipped.push(SkippedConfig {
                    path: path.to_path_buf(),
                    error: format!("{:#}", e),
                }),
            }
        }
        LoadedConfig {
            config: Self::default(),
            source: ConfigSource::Defaults,
            skipped,
        }
    }

    /// Reject limits that would make every request fail.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.default_download_size == 0 || s.max_download_size == 0 {
            anyhow::bail!("download sizes must be positive");
        }
        if s.default_download_size > s.max_download_size {
            anyhow::bail!(
                "default_download_size ({}) exceeds max_download_size ({})",
                s.default_download_size,
                s.max_download_size
            );
        }
        if s.max_upload_size == 0 {
            anyhow::bail!("max_upload_size must be positive");
        }
        let o = &self.orchestrator;
        if o.round_count == 0 || o.payload_size == 0 || o.timeout_per_round_secs == 0 {
            anyhow::bail!("orchestrator round_count, payload_size and timeout must be positive");
        }
        if self.sink.kind == SinkKind::Http && self.sink.endpoint.is_none() {
            anyhow::bail!("sink kind \"http\" requires an endpoint");
        }
        Ok(())
    }
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

/// A config file that was tried and could not be used.
#[derive(Debug, Clone)]
pub struct SkippedConfig {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of [`ProbeConfig::resolve`].
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ProbeConfig,
    pub source: ConfigSource,
    pub skipped: Vec<SkippedConfig>,
}

impl LoadedConfig {
    /// Emit the load diagnostics; call once a subscriber is installed.
    pub fn log(&self) {
        for s in &self.skipped {
            warn!(
                path = %s.path.display(),
                error = %s.error,
                "config file could not be loaded, trying fallback"
            );
        }
        match &self.source {
            ConfigSource::File(path) => {
                info!(path = %path.display(), "loaded speedprobe configuration")
            }
            ConfigSource::Defaults => debug!("no config file found, using compiled-in defaults"),
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Limits for the generator and receiver endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port for the HTTP listener.
    pub listen_address: String,
    /// Bytes served when the download request carries no `size`.
    pub default_download_size: u64,
    /// Largest `size` a download request may ask for.
    pub max_download_size: u64,
    /// Largest upload body the receiver will drain.
    pub max_upload_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            default_download_size: 5 * MIB,
            max_download_size: 100 * MIB,
            max_upload_size: 100 * MIB,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Defaults for client-side measurement runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub round_count: u32,
    pub payload_size: u64,
    pub timeout_per_round_secs: u64,
    /// Extra attempts per round after a round-level failure.
    pub retry_limit: u32,
    pub retry_backoff_ms: u64,
}

impl OrchestratorConfig {
    pub fn timeout_per_round(&self) -> Duration {
        Duration::from_secs(self.timeout_per_round_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            round_count: 5,
            payload_size: 5 * MIB,
            timeout_per_round_secs: 30,
            retry_limit: 1,
            retry_backoff_ms: 250,
        }
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Where measurement metrics are reported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    /// Collector URL, required when `kind = "http"`.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Emit each metric as a tracing event.
    #[default]
    Log,
    /// POST each metric as JSON to `endpoint`.
    Http,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = ProbeConfig::default();
        assert_eq!(cfg.server.default_download_size, 5 * 1024 * 1024);
        assert_eq!(cfg.server.max_download_size, 100 * 1024 * 1024);
        assert_eq!(cfg.orchestrator.retry_limit, 1);
        assert_eq!(cfg.sink.kind, SinkKind::Log);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
max_download_size = 1048576
default_download_size = 65536

[orchestrator]
round_count = 3

[logging]
json = true
"#
        )
        .unwrap();

        let cfg = ProbeConfig::load(file.path()).unwrap();
        assert_eq!(cfg.server.max_download_size, 1_048_576);
        assert_eq!(cfg.server.default_download_size, 65_536);
        assert_eq!(cfg.server.max_upload_size, 100 * MIB);
        assert_eq!(cfg.orchestrator.round_count, 3);
        assert_eq!(cfg.orchestrator.retry_backoff_ms, 250);
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_default_above_max_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\ndefault_download_size = 2048\nmax_download_size = 1024\n"
        )
        .unwrap();
        assert!(ProbeConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_http_sink_requires_endpoint() {
        let mut cfg = ProbeConfig::default();
        cfg.sink.kind = SinkKind::Http;
        assert!(cfg.validate().is_err());
        cfg.sink.endpoint = Some("http://127.0.0.1:9000/metrics".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_unloadable_env_file_falls_back_with_diagnostic() {
        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[server\nnot toml").unwrap();

        let loaded = ProbeConfig::load_first(
            Some(bad.path()),
            Path::new("/nonexistent/speedprobe.toml"),
        );
        assert_eq!(loaded.source, ConfigSource::Defaults);
        assert_eq!(loaded.skipped.len(), 1);
        assert_eq!(loaded.skipped[0].path, bad.path());
        assert!(loaded.skipped[0].error.contains("failed to parse"));
    }

    #[test]
    fn test_system_file_used_when_env_file_fails() {
        let mut system = tempfile::NamedTempFile::new().unwrap();
        writeln!(system, "[orchestrator]\nround_count = 9\n").unwrap();

        let loaded = ProbeConfig::load_first(
            Some(Path::new("/nonexistent/env.toml")),
            system.path(),
        );
        assert_eq!(loaded.source, ConfigSource::File(system.path().to_path_buf()));
        assert_eq!(loaded.config.orchestrator.round_count, 9);
        assert_eq!(loaded.skipped.len(), 1);
    }

    #[test]
    fn test_explicit_path_must_load() {
        assert!(ProbeConfig::resolve(Some(Path::new("/nonexistent/speedprobe.toml"))).is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(ProbeConfig::load(Path::new("/nonexistent/speedprobe.toml")).is_err());
    }
}
