//! Hardware-independent core library for airq
//!
//! This crate contains all platform-agnostic logic for the airq air-quality
//! node: the byte-level protocol drivers for the climate (SHT3x) and
//! air-quality (SGP30) sensors, per-word CRC checking, the humidity feedback
//! and baseline training engine, the fixed-period acquisition task and the
//! single-slot sample exchange that hands results to consumers.
//!
//! It is `#![no_std]` so it compiles on both embedded targets and desktop
//! hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

pub mod acquisition;
pub mod async_i2c_bus;
pub mod calibration;
pub mod checksum;
pub mod config;
pub mod exchange;
pub mod metrics;
pub mod sensors;
pub mod storage;

pub use acquisition::{AcquisitionStats, AcquisitionTask, StartupError};
pub use calibration::{Baseline, CalibrationEngine, CalibrationState, PersistOutcome};
pub use config::AcquisitionConfig;
pub use exchange::{FusedSample, SampleExchange};
pub use sensors::{AirQualitySample, ClimateSample, SensorError};
pub use storage::{KeyValueStore, StorageError, StorageSession};
