mod sgp30;
mod sht3x;

pub use sgp30::*;
pub use sht3x::*;

use embassy_time::{Duration, TimeoutError, with_timeout};
use embedded_hal::i2c::ErrorKind;
use embedded_hal_async::i2c::{Error as _, I2c};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Upper bound for any single bus write or read.
pub const BUS_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: bus transfer failed during {operation} ({kind:?})")]
    Transport {
        sensor: &'static str,
        operation: &'static str,
        kind: ErrorKind,
    },
    #[error("{sensor}: bus timed out during {operation}")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
    },
    #[error("{sensor}: checksum mismatch on word {word} (expected {expected:#04x}, got {actual:#04x})")]
    Integrity {
        sensor: &'static str,
        word: usize,
        expected: u8,
        actual: u8,
    },
    #[error("{sensor}: response frame too short ({actual} of {expected} bytes)")]
    ShortFrame {
        sensor: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{sensor}: sensor has not been initialized")]
    NotReady { sensor: &'static str },
}

impl SensorError {
    /// Bus failures and bus timeouts both count as transport errors.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }

    /// Checksum mismatches and truncated frames both mean the data cannot be trusted.
    pub const fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. } | Self::ShortFrame { .. })
    }
}

/// Temperature and relative humidity decoded from a verified climate frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClimateSample {
    /// Degrees Celsius
    pub temperature: f32,
    /// Percent relative humidity
    pub humidity: f32,
}

/// Raw equivalent-CO2 (ppm) and TVOC (ppb) from a verified air-quality frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirQualitySample {
    pub eco2: u16,
    pub tvoc: u16,
}

/// Opaque calibration state owned by the air-quality sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    pub eco2: u16,
    pub tvoc: u16,
}

/// Trait for sensors that produce typed readings.
pub trait Sensor {
    /// The type of readings this sensor produces.
    type Readings;

    /// Bring the sensor from power-on to a state where `read` is valid.
    fn start(&mut self) -> impl Future<Output = Result<(), SensorError>>;

    /// Read the sensor and return typed readings.
    fn read(&mut self) -> impl Future<Output = Result<Self::Readings, SensorError>>;
}

/// Sensors that accept an absolute humidity (g/m³) to compensate their output.
pub trait HumidityCompensation {
    fn compensate_humidity(
        &mut self,
        grams_per_m3: f32,
    ) -> impl Future<Output = Result<(), SensorError>>;
}

/// Sensors whose long-term calibration can be read back and restored.
pub trait BaselineSensor {
    fn read_baseline(&mut self) -> impl Future<Output = Result<Baseline, SensorError>>;

    fn write_baseline(&mut self, baseline: Baseline)
    -> impl Future<Output = Result<(), SensorError>>;
}

/// Write a command frame, bounded by [`BUS_TIMEOUT`].
pub(crate) async fn bus_write<I: I2c>(
    i2c: &mut I,
    address: u8,
    bytes: &[u8],
    sensor: &'static str,
    operation: &'static str,
) -> Result<(), SensorError> {
    match with_timeout(BUS_TIMEOUT, i2c.write(address, bytes)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SensorError::Transport {
            sensor,
            operation,
            kind: e.kind(),
        }),
        Err(TimeoutError) => Err(SensorError::Timeout { sensor, operation }),
    }
}

/// Read a response frame, bounded by [`BUS_TIMEOUT`].
pub(crate) async fn bus_read<I: I2c>(
    i2c: &mut I,
    address: u8,
    buffer: &mut [u8],
    sensor: &'static str,
    operation: &'static str,
) -> Result<(), SensorError> {
    match with_timeout(BUS_TIMEOUT, i2c.read(address, buffer)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SensorError::Transport {
            sensor,
            operation,
            kind: e.kind(),
        }),
        Err(TimeoutError) => Err(SensorError::Timeout { sensor, operation }),
    }
}
