//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Log output settings, consumed by [`crate::logging::init`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of `trace`, `debug`, `info`, `warn`, `error`
    pub level: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            ansi: true,
        }
    }
}

/// Tunables for the graph engine.
///
/// Every field has a sensible default, so a config file only needs the
/// values it wants to change:
///
/// ```
/// # use tonegraph::EngineConfig;
/// let config = EngineConfig::from_json(r#"{ "max_voices": 2 }"#).unwrap();
/// assert_eq!(config.max_voices, 2);
/// assert_eq!(config.max_read_ahead, 0.1);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How far ahead of the audio clock (seconds) a node may schedule per tick
    pub max_read_ahead: f64,
    /// Hard cap on voice slots in polyphonic nodes
    pub max_voices: usize,
    /// Rounding factor for beat/time math (1000 = 1e-3)
    pub beat_precision: f64,
    /// Song start anchors are rounded up to a multiple of this (seconds)
    pub song_start_quantum: f64,
    /// Capacity of each MIDI/polyphonic output port queue
    pub outbox_capacity: usize,
    /// Upper bound on event propagation passes per tick
    pub max_routing_passes: usize,
    pub sample_rate: u32,
    /// Whether the shared monitor tap may be created or reset
    pub monitor_enabled: bool,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_read_ahead: 0.1,
            max_voices: 4,
            beat_precision: 1000.0,
            song_start_quantum: 0.1,
            outbox_capacity: 64,
            max_routing_passes: 16,
            sample_rate: 48000,
            monitor_enabled: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_max_read_ahead(mut self, seconds: f64) -> Self {
        self.max_read_ahead = seconds;
        self
    }

    pub fn with_max_voices(mut self, voices: usize) -> Self {
        self.max_voices = voices.max(1);
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Disable the monitor tap, e.g. on hosts without analysis support
    pub fn without_monitor(mut self) -> Self {
        self.monitor_enabled = false;
        self
    }
}
