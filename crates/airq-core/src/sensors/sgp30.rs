use crate::checksum::{WORD_FRAME_LEN, crc8, decode_words, encode_word};
use crate::sensors::{AirQualitySample, Baseline, SensorError, bus_read, bus_write};

use super::{BaselineSensor, HumidityCompensation, Sensor};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use log::{debug, info};

/// Fixed I2C address of the SGP30.
pub const SGP30_ADDR: u8 = 0x58;

const SENSOR: &str = "SGP30";

pub const SGP30_CMD_INIT_AIR_QUALITY: [u8; 2] = [0x20, 0x03];
pub const SGP30_CMD_MEASURE_AIR_QUALITY: [u8; 2] = [0x20, 0x08];
pub const SGP30_CMD_GET_BASELINE: [u8; 2] = [0x20, 0x15];
pub const SGP30_CMD_SET_BASELINE: [u8; 2] = [0x20, 0x1E];
pub const SGP30_CMD_SET_HUMIDITY: [u8; 2] = [0x20, 0x61];

/// The first readings after init are fixed at 400 ppm / 0 ppb for 15 s.
pub const WARM_UP_MS: u32 = 15_000;
// Datasheet maximum is 12 ms
const MEASURE_WAIT_MS: u32 = 20;
const BASELINE_WAIT_MS: u32 = 10;
const HUMIDITY_WAIT_MS: u32 = 10;

const RESPONSE_LEN: usize = 2 * WORD_FRAME_LEN;

/// Smallest encodable absolute humidity (0 would disable compensation).
pub const MIN_ABSOLUTE_HUMIDITY: f32 = 1.0 / 256.0;
/// Largest value representable in 8.8 fixed point.
pub const MAX_ABSOLUTE_HUMIDITY: f32 = 255.996_093_75;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sgp30State {
    Uninitialized,
    Warming,
    Ready,
}

/// Protocol driver for the SGP30 equivalent-CO2/TVOC sensor.
///
/// The sensor runs a dynamic baseline algorithm that expects `measure` to be
/// called once per second; callers must keep that cadence even if they only
/// consume some of the results.
pub struct Sgp30Sensor<I, D> {
    i2c: I,
    delay: D,
    state: Sgp30State,
}

impl<I: I2c, D: DelayNs> Sgp30Sensor<I, D> {
    pub fn new(i2c: I, delay: D) -> Self {
        Self {
            i2c,
            delay,
            state: Sgp30State::Uninitialized,
        }
    }

    pub fn state(&self) -> Sgp30State {
        self.state
    }

    /// Give back the bus and delay handles.
    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    /// Start the on-chip air quality algorithm and wait out the warm-up.
    ///
    /// This blocks the caller for [`WARM_UP_MS`]; it is only expected at
    /// startup.
    pub async fn initialize(&mut self) -> Result<(), SensorError> {
        bus_write(
            &mut self.i2c,
            SGP30_ADDR,
            &SGP30_CMD_INIT_AIR_QUALITY,
            SENSOR,
            "init air quality",
        )
        .await?;

        self.state = Sgp30State::Warming;
        info!("SGP30: warming up for {} ms", WARM_UP_MS);
        self.delay.delay_ms(WARM_UP_MS).await;

        self.state = Sgp30State::Ready;
        info!("SGP30: ready");
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), SensorError> {
        match self.state {
            Sgp30State::Ready => Ok(()),
            _ => Err(SensorError::NotReady { sensor: SENSOR }),
        }
    }

    /// Read one eCO2/TVOC pair.
    pub async fn measure(&mut self) -> Result<AirQualitySample, SensorError> {
        self.ensure_ready()?;
        let [eco2, tvoc] = self
            .command_with_response(
                &SGP30_CMD_MEASURE_AIR_QUALITY,
                MEASURE_WAIT_MS,
                "measure air quality",
            )
            .await?;
        Ok(AirQualitySample { eco2, tvoc })
    }

    /// Push an absolute humidity (g/m³) used to compensate the next readings.
    ///
    /// Values are clamped to the 8.8 fixed-point range. No response is read.
    pub async fn send_humidity_compensation(&mut self, grams_per_m3: f32) -> Result<(), SensorError> {
        self.ensure_ready()?;
        let frame = humidity_command(grams_per_m3);
        debug!("SGP30: humidity compensation {:?}", frame);

        bus_write(
            &mut self.i2c,
            SGP30_ADDR,
            &frame,
            SENSOR,
            "set absolute humidity",
        )
        .await?;
        self.delay.delay_ms(HUMIDITY_WAIT_MS).await;
        Ok(())
    }

    pub async fn get_baseline(&mut self) -> Result<Baseline, SensorError> {
        self.ensure_ready()?;
        let [eco2, tvoc] = self
            .command_with_response(&SGP30_CMD_GET_BASELINE, BASELINE_WAIT_MS, "get baseline")
            .await?;
        Ok(Baseline { eco2, tvoc })
    }

    pub async fn set_baseline(&mut self, baseline: Baseline) -> Result<(), SensorError> {
        self.ensure_ready()?;
        let frame = baseline_command(baseline);

        bus_write(&mut self.i2c, SGP30_ADDR, &frame, SENSOR, "set baseline").await?;
        self.delay.delay_ms(BASELINE_WAIT_MS).await;
        Ok(())
    }

    async fn command_with_response(
        &mut self,
        command: &[u8; 2],
        wait_ms: u32,
        operation: &'static str,
    ) -> Result<[u16; 2], SensorError> {
        bus_write(&mut self.i2c, SGP30_ADDR, command, SENSOR, operation).await?;
        self.delay.delay_ms(wait_ms).await;

        let mut frame = [0u8; RESPONSE_LEN];
        bus_read(&mut self.i2c, SGP30_ADDR, &mut frame, SENSOR, operation).await?;
        decode_words::<2>(&frame, SENSOR)
    }
}

/// Encode an absolute humidity in g/m³ as 8.8 fixed point.
pub fn encode_absolute_humidity(grams_per_m3: f32) -> u16 {
    let clamped = if grams_per_m3.is_finite() {
        grams_per_m3.clamp(MIN_ABSOLUTE_HUMIDITY, MAX_ABSOLUTE_HUMIDITY)
    } else {
        MIN_ABSOLUTE_HUMIDITY
    };
    libm::roundf(clamped * 256.0) as u16
}

/// `[opcode, payload word, crc(payload)]`
pub fn humidity_command(grams_per_m3: f32) -> [u8; 5] {
    let [hi, lo] = encode_absolute_humidity(grams_per_m3).to_be_bytes();
    let [op_hi, op_lo] = SGP30_CMD_SET_HUMIDITY;
    [op_hi, op_lo, hi, lo, crc8(&[hi, lo])]
}

/// The sensor takes the baseline words in the reverse order of `get_baseline`.
pub fn baseline_command(baseline: Baseline) -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[..2].copy_from_slice(&SGP30_CMD_SET_BASELINE);
    frame[2..5].copy_from_slice(&encode_word(baseline.tvoc));
    frame[5..].copy_from_slice(&encode_word(baseline.eco2));
    frame
}

impl<I: I2c, D: DelayNs> Sensor for Sgp30Sensor<I, D> {
    type Readings = AirQualitySample;

    async fn start(&mut self) -> Result<(), SensorError> {
        self.initialize().await
    }

    async fn read(&mut self) -> Result<AirQualitySample, SensorError> {
        self.measure().await
    }
}

impl<I: I2c, D: DelayNs> HumidityCompensation for Sgp30Sensor<I, D> {
    async fn compensate_humidity(&mut self, grams_per_m3: f32) -> Result<(), SensorError> {
        self.send_humidity_compensation(grams_per_m3).await
    }
}

impl<I: I2c, D: DelayNs> BaselineSensor for Sgp30Sensor<I, D> {
    async fn read_baseline(&mut self) -> Result<Baseline, SensorError> {
        self.get_baseline().await
    }

    async fn write_baseline(&mut self, baseline: Baseline) -> Result<(), SensorError> {
        self.set_baseline(baseline).await
    }
}
