use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capacity::ReservationSpec;
use crate::codec::{TransportCodec, DEFAULT_COMPRESSION_LEVEL};
use crate::connection::ConnectionConfig;
use crate::fetcher::HttpConfig;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub codec: CodecConfig,
    /// Capacity to hold for the lifetime of a run. Absent means none.
    #[serde(default)]
    pub capacity: Option<CapacityConfig>,
}

/// Transport codec configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CodecConfig {
    /// zstd compression level (1-22).
    #[serde(default = "default_level")]
    pub level: i32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> i32 {
    DEFAULT_COMPRESSION_LEVEL
}

impl CodecConfig {
    pub fn codec(&self) -> TransportCodec {
        TransportCodec::new(self.level)
    }
}

/// Capacity reservation configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CapacityConfig {
    #[serde(default = "default_core_type")]
    pub core_type: String,
    pub num_cores: u32,
    /// Reservation lifetime; unset leaves it to the service.
    #[serde(default)]
    pub max_duration_hours: Option<u64>,
}

fn default_core_type() -> String {
    "s1".to_string()
}

impl CapacityConfig {
    pub fn spec(&self) -> ReservationSpec {
        let spec = ReservationSpec::new(self.core_type.clone(), self.num_cores);
        match self.max_duration_hours {
            Some(hours) => spec.with_max_duration(Duration::from_secs(hours * 3600)),
            None => spec,
        }
    }
}
