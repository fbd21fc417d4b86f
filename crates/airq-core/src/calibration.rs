//! Humidity feedback and long-running baseline training.
//!
//! The climate sensor's readings are converted to absolute humidity and fed to
//! the air-quality sensor so it can compensate its output. Separately, the
//! air-quality sensor's baseline is only trusted after a training period; from
//! then on it is mirrored into persistent storage at a fixed interval so it
//! survives power loss.

pub use crate::sensors::Baseline;

use crate::config::AcquisitionConfig;
use crate::sensors::{BaselineSensor, ClimateSample, SensorError};
use crate::storage::{KeyValueStore, StorageError, load_baseline, store_baseline};
use embassy_time::{Duration, Instant};
use log::{info, warn};
use thiserror_no_std::Error;

/// Absolute humidity in g/m³ for a temperature (°C) and relative humidity (%).
pub fn absolute_humidity(temperature: f32, relative_humidity: f32) -> f32 {
    let saturation_vapour_pressure =
        6.112 * libm::expf(17.62 * temperature / (243.12 + temperature));
    216.7 * ((relative_humidity / 100.0) * saturation_vapour_pressure) / (273.15 + temperature)
}

/// Process-lifetime calibration timers, owned by the acquisition task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationState {
    boot_time: Instant,
    last_persist_time: Instant,
    training_complete: bool,
}

impl CalibrationState {
    pub const fn new(boot_time: Instant) -> Self {
        Self {
            boot_time,
            last_persist_time: boot_time,
            training_complete: false,
        }
    }

    pub const fn boot_time(&self) -> Instant {
        self.boot_time
    }

    pub const fn last_persist_time(&self) -> Instant {
        self.last_persist_time
    }

    pub const fn training_complete(&self) -> bool {
        self.training_complete
    }

    pub fn uptime(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.boot_time)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("sensor error: {0}")]
    Sensor(SensorError),
    #[error("storage error: {0}")]
    Storage(StorageError),
}

/// What a calibration tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Still training, or the persistence interval has not elapsed.
    Idle,
    /// A baseline was read back and committed to storage.
    Persisted(Baseline),
    /// Persistence was due but failed; it will be retried next cycle.
    Failed(CalibrationError),
}

pub struct CalibrationEngine {
    state: CalibrationState,
    training_period: Duration,
    persist_interval: Duration,
    absolute_humidity: Option<f32>,
}

impl CalibrationEngine {
    pub fn new(boot_time: Instant, config: &AcquisitionConfig) -> Self {
        Self {
            state: CalibrationState::new(boot_time),
            training_period: config.training_period(),
            persist_interval: config.persist_interval(),
            absolute_humidity: None,
        }
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    /// Last computed absolute humidity, if any climate reading has succeeded.
    pub fn absolute_humidity(&self) -> Option<f32> {
        self.absolute_humidity
    }

    /// Fold in the outcome of a climate measurement.
    ///
    /// Returns the absolute humidity to push to the air-quality sensor: the
    /// fresh value on success, the previous one if this measurement failed, or
    /// `None` before the first success.
    pub fn update_humidity(&mut self, climate: Option<&ClimateSample>) -> Option<f32> {
        if let Some(sample) = climate {
            self.absolute_humidity = Some(absolute_humidity(sample.temperature, sample.humidity));
        }
        self.absolute_humidity
    }

    /// Push a previously stored baseline into the sensor.
    ///
    /// A missing or unreadable baseline is a cold start, not an error. Only a
    /// failure to talk to the sensor is returned.
    pub async fn restore_baseline<B, S>(
        &mut self,
        sensor: &mut B,
        store: &mut S,
    ) -> Result<Option<Baseline>, SensorError>
    where
        B: BaselineSensor,
        S: KeyValueStore,
    {
        let baseline = match load_baseline(store) {
            Ok(Some(baseline)) => baseline,
            Ok(None) => {
                info!("No stored baseline, starting cold");
                return Ok(None);
            }
            Err(e) => {
                warn!("Could not read stored baseline, starting cold: {}", e);
                return Ok(None);
            }
        };

        sensor.write_baseline(baseline).await?;
        info!(
            "Restored baseline eCO2={:#06x} TVOC={:#06x}",
            baseline.eco2, baseline.tvoc
        );
        Ok(Some(baseline))
    }

    /// Run the training and persistence checks for one cycle.
    pub async fn tick<B, S>(&mut self, now: Instant, sensor: &mut B, store: &mut S) -> PersistOutcome
    where
        B: BaselineSensor,
        S: KeyValueStore,
    {
        if !self.state.training_complete && self.state.uptime(now) >= self.training_period {
            self.state.training_complete = true;
            info!(
                "Baseline training complete after {} s",
                self.state.uptime(now).as_secs()
            );
        }

        if !self.state.training_complete
            || now.saturating_duration_since(self.state.last_persist_time) < self.persist_interval
        {
            return PersistOutcome::Idle;
        }

        let baseline = match sensor.read_baseline().await {
            Ok(baseline) => baseline,
            Err(e) => {
                warn!("Baseline read failed, retrying next cycle: {}", e);
                return PersistOutcome::Failed(CalibrationError::Sensor(e));
            }
        };

        if let Err(e) = store_baseline(store, baseline) {
            warn!("Baseline write failed, retrying next cycle: {}", e);
            return PersistOutcome::Failed(CalibrationError::Storage(e));
        }

        self.state.last_persist_time = now;
        info!(
            "Persisted baseline eCO2={:#06x} TVOC={:#06x}",
            baseline.eco2, baseline.tvoc
        );
        PersistOutcome::Persisted(baseline)
    }
}
