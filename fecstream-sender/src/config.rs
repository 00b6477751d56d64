//! Settings file for the sender.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fecstream_core::{QosSettings, SourceKind, StreamConfig, TopologyMode};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Stream defaults, overridden by command-line flags.
    pub stream: StreamSettings,
    /// Adaptive bitrate loop.
    pub qos: QosSettings,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Stream defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// "screen", "camera" or "synthetic".
    pub source: SourceKind,
    /// "session-relay" or "manual-redundancy".
    pub mode: TopologyMode,
    /// FEC redundancy percentage.
    pub redundancy_percent: i64,
    /// Target latency in milliseconds.
    pub latency_ms: u32,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive, e.g. "info" or "fecstream_core=debug".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            source: SourceKind::Screen,
            mode: TopologyMode::SessionRelay,
            redundancy_percent: i64::from(StreamConfig::DEFAULT_REDUNDANCY_PERCENT),
            latency_ms: StreamConfig::DEFAULT_LATENCY_MS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

/// Why the settings file could not be used.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no config at {}", path.display())]
    Missing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl SenderConfig {
    /// Read and parse the settings file at `path`.
    ///
    /// Nothing is logged here; the caller reports the error once logging
    /// is up and falls back to [`SenderConfig::default`].
    pub fn read(path: &Path) -> Result<Self, LoadError> {
        let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Missing {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| LoadError::Invalid {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Render the default configuration as TOML.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = SenderConfig::default_toml().unwrap();
        assert!(text.contains("[qos]"));
        assert!(text.contains("interval_ms"));
        assert!(text.contains("session-relay"));
        assert!(text.contains("level = \"info\""));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let parsed: SenderConfig = toml::from_str(
            r#"
            [qos]
            interval_ms = 250

            [qos.policy]
            high_loss_threshold = 0.05
            "#,
        )
        .unwrap();

        assert_eq!(parsed.qos.interval_ms, 250);
        assert_eq!(parsed.qos.policy.high_loss_threshold, 0.05);
        assert_eq!(parsed.qos.policy.backoff_factor, 0.85);
        assert_eq!(parsed.stream, StreamSettings::default());
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn stream_section_parses_enums() {
        let parsed: SenderConfig = toml::from_str(
            r#"
            [stream]
            source = "synthetic"
            mode = "manual-redundancy"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.stream.source, SourceKind::Synthetic);
        assert_eq!(parsed.stream.mode, TopologyMode::ManualRedundancy);
        assert_eq!(parsed.stream.latency_ms, 50);
    }

    fn scratch_file(tag: &str, contents: &str) -> PathBuf {
        let path =
            std::env::temp_dir().join(format!("fecstream-{tag}-{}.toml", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_is_reported() {
        let err = SenderConfig::read(Path::new("/nonexistent/fecstream-sender.toml")).unwrap_err();
        assert!(matches!(err, LoadError::Missing { .. }));
    }

    #[test]
    fn malformed_policy_is_reported_not_swallowed() {
        let path = scratch_file("bad", "[qos.policy]\nbackoff_factor = \"steep\"\n");
        let err = SenderConfig::read(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);

        assert!(matches!(err, LoadError::Invalid { .. }));
        assert!(err.to_string().starts_with("invalid config "));
    }

    #[test]
    fn valid_file_is_read() {
        let path = scratch_file("ok", "[logging]\nlevel = \"debug\"\n");
        let cfg = SenderConfig::read(&path);
        let _ = std::fs::remove_file(&path);

        assert_eq!(cfg.unwrap().logging.level, "debug");
    }
}
