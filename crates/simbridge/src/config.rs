//! JSON configuration.
//!
//! Every section is optional; a missing field falls back to the library
//! default. Durations are plain milliseconds.
//!
//! ```json
//! {
//!   "map": { "width": 800, "height": 600, "resolution": 2.0 },
//!   "link": { "addr": "127.0.0.1:4000", "pedestrian_count": 3 },
//!   "eval": { "max_speed": 30.0 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use simbridge_eval::{EvalConfig, SafetyEvaluator};
use simbridge_frame::{FramerConfig, MapGeometry, MessageCodec};

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed parsing {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Stream framer section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramerSection {
    pub poll_interval_ms: u64,
    pub max_buffer: usize,
}

impl Default for FramerSection {
    fn default() -> Self {
        let defaults = FramerConfig::default();
        Self {
            poll_interval_ms: millis(defaults.poll_interval),
            max_buffer: defaults.max_buffer,
        }
    }
}

/// Control bridge section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    /// Listen address.
    pub addr: String,
    pub poll_interval_ms: u64,
    pub read_retry_delay_ms: u64,
    pub max_read_failures: u32,
    pub accept_poll_interval_ms: u64,
    pub write_timeout_ms: Option<u64>,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4100".to_string(),
            poll_interval_ms: 50,
            read_retry_delay_ms: 500,
            max_read_failures: 5,
            accept_poll_interval_ms: 50,
            write_timeout_ms: Some(5_000),
        }
    }
}

/// Telemetry link section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    /// Simulator address.
    pub addr: String,
    pub vehicle_id: String,
    pub pedestrian_count: usize,
    pub update_interval_ms: u32,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4000".to_string(),
            vehicle_id: "ego".to_string(),
            pedestrian_count: 0,
            update_interval_ms: 100,
            reconnect_delay_ms: 1_000,
            connect_timeout_ms: Some(5_000),
            write_timeout_ms: Some(5_000),
        }
    }
}

/// Whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub map: MapGeometry,
    pub framer: FramerSection,
    pub bridge: BridgeSection,
    pub link: LinkSection,
    pub eval: EvalConfig,
}

impl SimConfig {
    /// Load and validate a JSON document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SimConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the transforms and loops cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let map = &self.map;
        if !(map.width > 0.0 && map.height > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "map dimensions must be positive, got {}x{}",
                map.width, map.height
            )));
        }
        if !(map.resolution > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "map resolution must be positive, got {}",
                map.resolution
            )));
        }
        if self.framer.poll_interval_ms == 0 || self.bridge.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        if self.bridge.max_read_failures == 0 {
            return Err(ConfigError::Invalid(
                "bridge.max_read_failures must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything the components need, built once from [`SimConfig`] and passed
/// down explicitly.
#[derive(Debug, Clone)]
pub struct BridgeContext {
    pub codec: MessageCodec,
    pub framer: FramerConfig,
    pub evaluator: SafetyEvaluator,
    pub bridge_addr: String,
    #[cfg(feature = "peer")]
    pub bridge: simbridge_peer::BridgeConfig,
    #[cfg(feature = "peer")]
    pub link: simbridge_peer::LinkConfig,
}

impl BridgeContext {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            codec: MessageCodec::new(config.map),
            framer: FramerConfig {
                poll_interval: Duration::from_millis(config.framer.poll_interval_ms),
                max_buffer: config.framer.max_buffer,
            },
            evaluator: SafetyEvaluator::new(config.eval),
            bridge_addr: config.bridge.addr.clone(),
            #[cfg(feature = "peer")]
            bridge: simbridge_peer::BridgeConfig {
                poll_interval: Duration::from_millis(config.bridge.poll_interval_ms),
                read_retry_delay: Duration::from_millis(config.bridge.read_retry_delay_ms),
                max_read_failures: config.bridge.max_read_failures,
                accept_poll_interval: Duration::from_millis(config.bridge.accept_poll_interval_ms),
                write_timeout: config.bridge.write_timeout_ms.map(Duration::from_millis),
            },
            #[cfg(feature = "peer")]
            link: simbridge_peer::LinkConfig {
                addr: config.link.addr.clone(),
                vehicle_id: config.link.vehicle_id.clone(),
                pedestrian_count: config.link.pedestrian_count,
                update_interval_ms: config.link.update_interval_ms,
                reconnect_delay: Duration::from_millis(config.link.reconnect_delay_ms),
                connect_timeout: config.link.connect_timeout_ms.map(Duration::from_millis),
                write_timeout: config.link.write_timeout_ms.map(Duration::from_millis),
            },
        }
    }

    pub fn geometry(&self) -> &MapGeometry {
        self.codec.geometry()
    }

    /// Telemetry link using this context's codec, framer and link settings.
    #[cfg(feature = "peer")]
    pub fn telemetry_link(&self) -> simbridge_peer::TelemetryLink {
        simbridge_peer::TelemetryLink::new(self.link.clone(), self.codec, self.framer.clone())
    }

    /// Bind the control bridge on the configured address.
    #[cfg(feature = "peer")]
    pub fn bind_bridge(&self) -> simbridge_peer::Result<simbridge_peer::ControlBridge> {
        simbridge_peer::ControlBridge::bind(&self.bridge_addr, self.bridge.clone())
    }
}

impl Default for BridgeContext {
    fn default() -> Self {
        Self::from_config(&SimConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: SimConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SimConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_are_merged_with_defaults() {
        let config: SimConfig = serde_json::from_str(
            r#"{"map": {"resolution": 2.0}, "link": {"pedestrian_count": 3}}"#,
        )
        .unwrap();
        assert_eq!(config.map.resolution, 2.0);
        assert_eq!(config.map.width, MapGeometry::default().width);
        assert_eq!(config.link.pedestrian_count, 3);
        assert_eq!(config.link.vehicle_id, "ego");
    }

    #[test]
    fn context_carries_durations() {
        let mut config = SimConfig::default();
        config.framer.poll_interval_ms = 20;
        config.bridge.read_retry_delay_ms = 75;
        config.link.connect_timeout_ms = None;

        let ctx = BridgeContext::from_config(&config);
        assert_eq!(ctx.framer.poll_interval, Duration::from_millis(20));
        #[cfg(feature = "peer")]
        {
            assert_eq!(ctx.bridge.read_retry_delay, Duration::from_millis(75));
            assert_eq!(ctx.link.connect_timeout, None);
        }
    }

    #[test]
    fn zero_resolution_is_rejected() {
        let mut config = SimConfig::default();
        config.map.resolution = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_reports_path() {
        let err = SimConfig::load("/nonexistent/simbridge.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/simbridge.json"));
    }
}
