use embassy_time::Duration;
use serde::{Deserialize, Serialize};

/// Tunable timing of the acquisition loop and calibration schedule.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionConfig {
    /// Period of one acquisition cycle. The SGP30 expects 1 s.
    pub period_ms: u32,
    /// Climate sensor is sampled every `climate_divisor` cycles.
    pub climate_divisor: u32,
    /// Uptime after which the air-quality baseline is trusted.
    pub training_period_secs: u32,
    /// Minimum spacing between two successful baseline writes.
    pub persist_interval_secs: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            period_ms: 1_000,
            climate_divisor: 10,
            training_period_secs: 12 * 60 * 60,
            persist_interval_secs: 60 * 60,
        }
    }
}

impl AcquisitionConfig {
    /// Upper bound of a postcard-encoded config.
    pub const MAX_ENCODED_LEN: usize = 4 * 5;

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms as u64)
    }

    /// Divisor normalised so that 0 means "every cycle".
    pub fn climate_divisor(&self) -> u32 {
        self.climate_divisor.max(1)
    }

    pub fn training_period(&self) -> Duration {
        Duration::from_secs(self.training_period_secs as u64)
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs as u64)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }

    pub fn to_slice<'b>(&self, buffer: &'b mut [u8]) -> Result<&'b mut [u8], postcard::Error> {
        postcard::to_slice(self, buffer)
    }
}
