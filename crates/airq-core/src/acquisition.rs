//! Fixed-period acquisition loop.
//!
//! One task owns both drivers, the calibration state and the store. Every
//! cycle it polls the air-quality sensor (its algorithm needs the 1 Hz
//! cadence), every `climate_divisor` cycles it also samples the climate sensor
//! and refreshes the humidity compensation, then publishes a fused sample and
//! runs the baseline training/persistence check.

use crate::calibration::{CalibrationEngine, PersistOutcome};
use crate::config::AcquisitionConfig;
use crate::exchange::{FusedSample, SampleExchange};
use crate::sensors::{
    AirQualitySample, BaselineSensor, ClimateSample, HumidityCompensation, Sensor, SensorError,
};
use crate::storage::KeyValueStore;
use embassy_time::{Instant, Ticker};
use log::{debug, error, info, warn};
use thiserror_no_std::Error;

/// Initialization failures are fatal to the subsystem and left to the owner.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupError {
    #[error("air-quality sensor failed to start: {0}")]
    AirQuality(SensorError),
    #[error("could not restore baseline: {0}")]
    BaselineRestore(SensorError),
    #[error("climate sensor failed to start: {0}")]
    Climate(SensorError),
}

/// Running counters, mostly useful for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub cycles: u32,
    pub air_quality_failures: u32,
    pub climate_failures: u32,
    pub integrity_failures: u32,
    pub compensation_failures: u32,
    pub baselines_persisted: u32,
}

impl AcquisitionStats {
    /// Count `error` if it means the sensor's data failed verification.
    fn record_integrity(&mut self, error: &SensorError) {
        if error.is_integrity() {
            self.integrity_failures = self.integrity_failures.wrapping_add(1);
        }
    }
}

pub struct AcquisitionTask<'a, C, A, S> {
    climate: C,
    air_quality: A,
    store: S,
    exchange: &'a SampleExchange,
    config: AcquisitionConfig,
    calibration: CalibrationEngine,
    latest: FusedSample,
    cycle: u32,
    stats: AcquisitionStats,
}

impl<'a, C, A, S> AcquisitionTask<'a, C, A, S>
where
    C: Sensor<Readings = ClimateSample>,
    A: Sensor<Readings = AirQualitySample> + HumidityCompensation + BaselineSensor,
    S: KeyValueStore,
{
    pub fn new(
        climate: C,
        air_quality: A,
        store: S,
        exchange: &'a SampleExchange,
        config: AcquisitionConfig,
        boot_time: Instant,
    ) -> Self {
        Self {
            climate,
            air_quality,
            store,
            exchange,
            calibration: CalibrationEngine::new(boot_time, &config),
            config,
            latest: FusedSample::default(),
            cycle: 0,
            stats: AcquisitionStats::default(),
        }
    }

    /// Bring both sensors up and restore the persisted baseline.
    ///
    /// Blocks for the air-quality warm-up. Any failure here is returned to
    /// the caller; nothing is retried.
    pub async fn start(&mut self) -> Result<(), StartupError> {
        info!("Starting air-quality sensor");
        self.air_quality
            .start()
            .await
            .map_err(StartupError::AirQuality)?;

        self.calibration
            .restore_baseline(&mut self.air_quality, &mut self.store)
            .await
            .map_err(StartupError::BaselineRestore)?;

        info!("Starting climate sensor");
        self.climate.start().await.map_err(StartupError::Climate)?;

        info!("Acquisition ready");
        Ok(())
    }

    /// Run forever at the configured period.
    ///
    /// Wake-ups are scheduled from the previous deadline, not from when the
    /// cycle finished, so cycle jitter does not accumulate.
    pub async fn run(&mut self) -> ! {
        let mut ticker = Ticker::every(self.config.period());
        loop {
            self.run_cycle(Instant::now()).await;
            ticker.next().await;
        }
    }

    /// Execute one acquisition cycle at time `now` and return the published sample.
    pub async fn run_cycle(&mut self, now: Instant) -> FusedSample {
        // Must run every cycle regardless of whether the result is used.
        match self.air_quality.read().await {
            Ok(sample) => {
                self.latest.eco2 = sample.eco2;
                self.latest.tvoc = sample.tvoc;
            }
            Err(e) => {
                warn!("Air-quality measurement failed: {}", e);
                self.stats.air_quality_failures = self.stats.air_quality_failures.wrapping_add(1);
                self.stats.record_integrity(&e);
            }
        }

        if self.cycle % self.config.climate_divisor() == 0 {
            self.sample_climate().await;
        }

        self.latest.timestamp_ms = now.as_millis() as u32;
        self.exchange.publish(self.latest);
        debug!("Published {:?}", self.latest);

        match self
            .calibration
            .tick(now, &mut self.air_quality, &mut self.store)
            .await
        {
            PersistOutcome::Persisted(_) => {
                self.stats.baselines_persisted = self.stats.baselines_persisted.wrapping_add(1);
            }
            PersistOutcome::Failed(e) => error!("Baseline persistence failed: {}", e),
            PersistOutcome::Idle => {}
        }

        self.cycle = self.cycle.wrapping_add(1);
        self.stats.cycles = self.stats.cycles.wrapping_add(1);
        self.latest
    }

    async fn sample_climate(&mut self) {
        let climate = match self.climate.read().await {
            Ok(sample) => {
                self.latest.temperature = sample.temperature;
                self.latest.humidity = sample.humidity;
                Some(sample)
            }
            Err(e) => {
                warn!("Climate measurement failed, keeping last values: {}", e);
                self.stats.climate_failures = self.stats.climate_failures.wrapping_add(1);
                self.stats.record_integrity(&e);
                None
            }
        };

        if let Some(grams_per_m3) = self.calibration.update_humidity(climate.as_ref()) {
            if let Err(e) = self.air_quality.compensate_humidity(grams_per_m3).await {
                warn!("Humidity compensation failed: {}", e);
                self.stats.compensation_failures = self.stats.compensation_failures.wrapping_add(1);
            }
        }
    }

    pub fn stats(&self) -> &AcquisitionStats {
        &self.stats
    }

    pub fn calibration(&self) -> &CalibrationEngine {
        &self.calibration
    }

    /// The sample that was last published.
    pub fn latest(&self) -> &FusedSample {
        &self.latest
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::absolute_humidity;
    use crate::sensors::Baseline;
    use crate::storage::{CO2_BASELINE_KEY, MemoryStore, store_baseline};
    use embassy_futures::block_on;
    use embedded_hal::i2c::ErrorKind;
    use std::collections::VecDeque;

    fn transport(operation: &'static str) -> SensorError {
        SensorError::Transport {
            sensor: "fake",
            operation,
            kind: ErrorKind::Other,
        }
    }

    fn integrity() -> SensorError {
        SensorError::Integrity {
            sensor: "fake",
            word: 0,
            expected: 0x92,
            actual: 0x93,
        }
    }

    #[derive(Default)]
    struct FakeClimate {
        fail_start: bool,
        script: VecDeque<Result<ClimateSample, SensorError>>,
        reads: u32,
    }

    impl Sensor for FakeClimate {
        type Readings = ClimateSample;

        async fn start(&mut self) -> Result<(), SensorError> {
            if self.fail_start {
                return Err(transport("soft reset"));
            }
            Ok(())
        }

        async fn read(&mut self) -> Result<ClimateSample, SensorError> {
            self.reads += 1;
            self.script.pop_front().unwrap_or(Err(transport("measure")))
        }
    }

    #[derive(Default)]
    struct FakeAirQuality {
        fail_start: bool,
        script: VecDeque<Result<AirQualitySample, SensorError>>,
        reads: u32,
        compensation: Vec<f32>,
        restored: Option<Baseline>,
        baseline_reads: u32,
    }

    impl Sensor for FakeAirQuality {
        type Readings = AirQualitySample;

        async fn start(&mut self) -> Result<(), SensorError> {
            if self.fail_start {
                return Err(transport("init"));
            }
            Ok(())
        }

        async fn read(&mut self) -> Result<AirQualitySample, SensorError> {
            self.reads += 1;
            self.script.pop_front().unwrap_or(Ok(AirQualitySample {
                eco2: 400,
                tvoc: 0,
            }))
        }
    }

    impl HumidityCompensation for FakeAirQuality {
        async fn compensate_humidity(&mut self, grams_per_m3: f32) -> Result<(), SensorError> {
            self.compensation.push(grams_per_m3);
            Ok(())
        }
    }

    impl BaselineSensor for FakeAirQuality {
        async fn read_baseline(&mut self) -> Result<Baseline, SensorError> {
            self.baseline_reads += 1;
            Ok(Baseline {
                eco2: 0x8A2C,
                tvoc: 0x8B1F,
            })
        }

        async fn write_baseline(&mut self, baseline: Baseline) -> Result<(), SensorError> {
            self.restored = Some(baseline);
            Ok(())
        }
    }

    fn climate(temperature: f32, humidity: f32) -> Result<ClimateSample, SensorError> {
        Ok(ClimateSample {
            temperature,
            humidity,
        })
    }

    fn every_cycle() -> AcquisitionConfig {
        AcquisitionConfig {
            climate_divisor: 1,
            ..Default::default()
        }
    }

    fn at_secs(secs: u64) -> Instant {
        Instant::from_secs(secs)
    }

    #[test]
    fn test_startup_restores_baseline() {
        let exchange = SampleExchange::new();
        let mut store = MemoryStore::new();
        let stored = Baseline {
            eco2: 0x1234,
            tvoc: 0x5678,
        };
        store_baseline(&mut store, stored).unwrap();

        let mut task = AcquisitionTask::new(
            FakeClimate::default(),
            FakeAirQuality::default(),
            store,
            &exchange,
            AcquisitionConfig::default(),
            at_secs(0),
        );

        block_on(task.start()).unwrap();
        assert_eq!(task.air_quality.restored, Some(stored));
    }

    #[test]
    fn test_startup_failures_are_surfaced() {
        let exchange = SampleExchange::new();
        let mut task = AcquisitionTask::new(
            FakeClimate::default(),
            FakeAirQuality {
                fail_start: true,
                ..Default::default()
            },
            MemoryStore::new(),
            &exchange,
            AcquisitionConfig::default(),
            at_secs(0),
        );
        assert!(matches!(
            block_on(task.start()),
            Err(StartupError::AirQuality(_))
        ));

        let mut task = AcquisitionTask::new(
            FakeClimate {
                fail_start: true,
                ..Default::default()
            },
            FakeAirQuality::default(),
            MemoryStore::new(),
            &exchange,
            AcquisitionConfig::default(),
            at_secs(0),
        );
        assert!(matches!(
            block_on(task.start()),
            Err(StartupError::Climate(_))
        ));
    }

    #[test]
    fn test_air_quality_polled_every_cycle_climate_every_nth() {
        let exchange = SampleExchange::new();
        let config = AcquisitionConfig {
            climate_divisor: 10,
            ..Default::default()
        };
        let mut task = AcquisitionTask::new(
            FakeClimate {
                script: (0..3).map(|_| climate(20.0, 40.0)).collect(),
                ..Default::default()
            },
            FakeAirQuality::default(),
            MemoryStore::new(),
            &exchange,
            config,
            at_secs(0),
        );

        block_on(async {
            for second in 0..25 {
                task.run_cycle(at_secs(second)).await;
            }
        });

        assert_eq!(task.air_quality.reads, 25);
        // Cycles 0, 10 and 20
        assert_eq!(task.climate.reads, 3);
        assert_eq!(task.air_quality.compensation.len(), 3);
        assert_eq!(task.stats().cycles, 25);
    }

    #[test]
    fn test_failed_climate_keeps_previous_values() {
        let exchange = SampleExchange::new();
        let mut task = AcquisitionTask::new(
            FakeClimate {
                script: [climate(22.0, 45.0), Err(integrity())].into_iter().collect(),
                ..Default::default()
            },
            FakeAirQuality::default(),
            MemoryStore::new(),
            &exchange,
            every_cycle(),
            at_secs(0),
        );

        let (first, second) = block_on(async {
            let first = task.run_cycle(at_secs(0)).await;
            let second = task.run_cycle(at_secs(1)).await;
            (first, second)
        });

        assert_eq!(second.temperature, first.temperature);
        assert_eq!(second.humidity, first.humidity);
        assert_eq!(second.temperature, 22.0);
        assert_eq!(second.timestamp_ms, 1_000);
        assert_eq!(task.stats().climate_failures, 1);
        assert_eq!(task.stats().integrity_failures, 1);

        // The stale humidity is reused for compensation rather than dropped.
        let expected = absolute_humidity(22.0, 45.0);
        assert_eq!(task.air_quality.compensation, vec![expected, expected]);
        assert_eq!(task.calibration().absolute_humidity(), Some(expected));
    }

    #[test]
    fn test_failed_air_quality_keeps_previous_values() {
        let exchange = SampleExchange::new();
        let mut task = AcquisitionTask::new(
            FakeClimate::default(),
            FakeAirQuality {
                script: [
                    Ok(AirQualitySample {
                        eco2: 612,
                        tvoc: 48,
                    }),
                    Err(transport("measure")),
                ]
                .into_iter()
                .collect(),
                ..Default::default()
            },
            MemoryStore::new(),
            &exchange,
            AcquisitionConfig::default(),
            at_secs(0),
        );

        let second = block_on(async {
            task.run_cycle(at_secs(0)).await;
            task.run_cycle(at_secs(1)).await
        });

        assert_eq!((second.eco2, second.tvoc), (612, 48));
        assert_eq!(task.stats().air_quality_failures, 1);
        // A bus failure is not an integrity failure.
        assert_eq!(task.stats().integrity_failures, 0);
    }

    #[test]
    fn test_no_compensation_before_first_climate_success() {
        let exchange = SampleExchange::new();
        let mut task = AcquisitionTask::new(
            FakeClimate::default(),
            FakeAirQuality::default(),
            MemoryStore::new(),
            &exchange,
            every_cycle(),
            at_secs(0),
        );

        block_on(task.run_cycle(at_secs(0)));
        assert!(task.air_quality.compensation.is_empty());
    }

    #[test]
    fn test_each_cycle_replaces_unread_sample() {
        let exchange = SampleExchange::new();
        let mut task = AcquisitionTask::new(
            FakeClimate::default(),
            FakeAirQuality::default(),
            MemoryStore::new(),
            &exchange,
            AcquisitionConfig::default(),
            at_secs(0),
        );

        block_on(async {
            task.run_cycle(at_secs(0)).await;
            task.run_cycle(at_secs(1)).await;
        });

        assert_eq!(exchange.try_read().map(|s| s.timestamp_ms), Some(1_000));
        assert_eq!(exchange.try_read(), None);
    }

    #[test]
    fn test_baseline_persisted_after_training() {
        let exchange = SampleExchange::new();
        let mut task = AcquisitionTask::new(
            FakeClimate::default(),
            FakeAirQuality::default(),
            MemoryStore::new(),
            &exchange,
            AcquisitionConfig::default(),
            at_secs(0),
        );

        block_on(async {
            task.run_cycle(at_secs(11 * 3600)).await;
            assert!(!task.calibration().state().training_complete());
            assert_eq!(task.air_quality.baseline_reads, 0);

            task.run_cycle(at_secs(12 * 3600)).await;
            assert!(task.calibration().state().training_complete());

            task.run_cycle(at_secs(12 * 3600 + 1)).await;
        });

        assert_eq!(task.stats().baselines_persisted, 1);
        assert_eq!(task.air_quality.baseline_reads, 1);
        assert_eq!(task.store().value(CO2_BASELINE_KEY), Some(0x8A2C));
    }

    #[test]
    fn test_persistence_failure_does_not_stop_measuring() {
        let exchange = SampleExchange::new();
        let mut store = MemoryStore::new();
        store.fail_write(true);
        let mut task = AcquisitionTask::new(
            FakeClimate::default(),
            FakeAirQuality::default(),
            store,
            &exchange,
            AcquisitionConfig::default(),
            at_secs(0),
        );

        block_on(async {
            task.run_cycle(at_secs(12 * 3600)).await;
            task.run_cycle(at_secs(12 * 3600 + 1)).await;
        });

        // Retried on the very next cycle, not an hour later.
        assert_eq!(task.air_quality.baseline_reads, 2);
        assert_eq!(task.air_quality.reads, 2);
        assert_eq!(task.stats().baselines_persisted, 0);

        task.store_mut().fail_write(false);
        block_on(task.run_cycle(at_secs(12 * 3600 + 2)));
        assert_eq!(task.stats().baselines_persisted, 1);
    }

    #[test]
    fn test_end_to_end_with_real_drivers() {
        use crate::checksum::encode_word;
        use crate::sensors::{
            SGP30_ADDR, SGP30_CMD_INIT_AIR_QUALITY, SGP30_CMD_MEASURE_AIR_QUALITY, SHT3X_ADDR,
            SHT3X_CMD_MEASURE, SHT3X_CMD_SOFT_RESET, Sgp30Sensor, Sht3xSensor, convert_humidity,
            convert_temperature, humidity_command,
        };
        use embedded_hal_mock::eh1::delay::NoopDelay;
        use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction};

        fn words(first: u16, second: u16) -> Vec<u8> {
            let mut bytes = encode_word(first).to_vec();
            bytes.extend_from_slice(&encode_word(second));
            bytes
        }

        let (raw_temperature, raw_humidity) = (0x6666, 0x8000);
        let grams_per_m3 = absolute_humidity(
            convert_temperature(raw_temperature),
            convert_humidity(raw_humidity),
        );

        let climate_expectations = [
            Transaction::write(SHT3X_ADDR, SHT3X_CMD_SOFT_RESET.to_vec()),
            Transaction::write(SHT3X_ADDR, SHT3X_CMD_MEASURE.to_vec()),
            Transaction::read(SHT3X_ADDR, words(raw_temperature, raw_humidity)),
        ];
        let air_expectations = [
            Transaction::write(SGP30_ADDR, SGP30_CMD_INIT_AIR_QUALITY.to_vec()),
            Transaction::write(SGP30_ADDR, SGP30_CMD_MEASURE_AIR_QUALITY.to_vec()),
            Transaction::read(SGP30_ADDR, words(450, 12)),
            Transaction::write(SGP30_ADDR, humidity_command(grams_per_m3).to_vec()),
            Transaction::write(SGP30_ADDR, SGP30_CMD_MEASURE_AIR_QUALITY.to_vec()),
            Transaction::read(SGP30_ADDR, words(460, 15)),
        ];
        let mut climate_i2c = I2cMock::new(&climate_expectations);
        let mut air_i2c = I2cMock::new(&air_expectations);

        let exchange = SampleExchange::new();
        let config = AcquisitionConfig {
            climate_divisor: 2,
            ..Default::default()
        };
        let mut task = AcquisitionTask::new(
            Sht3xSensor::new(climate_i2c.clone(), NoopDelay::new()),
            Sgp30Sensor::new(air_i2c.clone(), NoopDelay::new()),
            MemoryStore::new(),
            &exchange,
            config,
            at_secs(0),
        );

        let (first, second) = block_on(async {
            task.start().await.unwrap();
            let first = task.run_cycle(at_secs(0)).await;
            let second = task.run_cycle(at_secs(1)).await;
            (first, second)
        });

        assert_eq!((first.eco2, first.tvoc), (450, 12));
        assert!((first.humidity - 50.0).abs() < 0.01);
        assert_eq!((second.eco2, second.tvoc), (460, 15));
        // Climate skipped on the second cycle; values carried over.
        assert_eq!(second.temperature, first.temperature);
        assert_eq!(exchange.try_read(), Some(second));
        assert_eq!(task.stats(), &AcquisitionStats {
            cycles: 2,
            ..Default::default()
        });

        climate_i2c.done();
        air_i2c.done();
    }
}
