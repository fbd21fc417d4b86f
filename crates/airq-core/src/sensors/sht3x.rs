use crate::checksum::{WORD_FRAME_LEN, decode_words};
use crate::sensors::{ClimateSample, SensorError, bus_read, bus_write};

use super::Sensor;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use log::{debug, info};

/// Default I2C address (ADDR pin low).
pub const SHT3X_ADDR: u8 = 0x44;

const SENSOR: &str = "SHT3x";

/// Soft reset.
pub const SHT3X_CMD_SOFT_RESET: [u8; 2] = [0x30, 0xA2];
/// Single shot, high repeatability, no clock stretching.
pub const SHT3X_CMD_MEASURE: [u8; 2] = [0x24, 0x00];

const RESET_SETTLE_MS: u32 = 20;
// Worst-case high repeatability conversion is 15.5 ms
const MEASURE_WAIT_MS: u32 = 20;

const RESPONSE_LEN: usize = 2 * WORD_FRAME_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    Ready,
}

/// Protocol driver for the SHT3x temperature/humidity sensor.
///
/// Each measurement is a one-shot transaction: command, fixed wait, 6-byte
/// response with a CRC after each word. Errors are returned to the caller,
/// never retried here.
pub struct Sht3xSensor<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    state: State,
}

impl<I: I2c, D: DelayNs> Sht3xSensor<I, D> {
    pub fn new(i2c: I, delay: D) -> Self {
        Self::with_address(i2c, delay, SHT3X_ADDR)
    }

    pub fn with_address(i2c: I, delay: D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
            state: State::Uninitialized,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    /// Give back the bus and delay handles.
    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    /// Soft-reset the sensor and let it settle.
    pub async fn initialize(&mut self) -> Result<(), SensorError> {
        bus_write(
            &mut self.i2c,
            self.address,
            &SHT3X_CMD_SOFT_RESET,
            SENSOR,
            "soft reset",
        )
        .await?;

        self.delay.delay_ms(RESET_SETTLE_MS).await;
        self.state = State::Ready;
        info!("SHT3x: reset complete");
        Ok(())
    }

    /// Trigger a single-shot measurement and decode the verified response.
    pub async fn measure(&mut self) -> Result<ClimateSample, SensorError> {
        if self.state != State::Ready {
            return Err(SensorError::NotReady { sensor: SENSOR });
        }

        bus_write(
            &mut self.i2c,
            self.address,
            &SHT3X_CMD_MEASURE,
            SENSOR,
            "start measurement",
        )
        .await?;

        self.delay.delay_ms(MEASURE_WAIT_MS).await;

        let mut frame = [0u8; RESPONSE_LEN];
        bus_read(
            &mut self.i2c,
            self.address,
            &mut frame,
            SENSOR,
            "read measurement",
        )
        .await?;

        let [raw_temperature, raw_humidity] = decode_words::<2>(&frame, SENSOR)?;
        debug!(
            "SHT3x: raw temperature {:#06x}, raw humidity {:#06x}",
            raw_temperature, raw_humidity
        );

        Ok(ClimateSample {
            temperature: convert_temperature(raw_temperature),
            humidity: convert_humidity(raw_humidity),
        })
    }
}

/// Raw ticks to degrees Celsius.
pub fn convert_temperature(raw: u16) -> f32 {
    -45.0 + 175.0 * (raw as f32 / 65535.0)
}

/// Raw ticks to percent relative humidity.
pub fn convert_humidity(raw: u16) -> f32 {
    100.0 * (raw as f32 / 65535.0)
}

impl<I: I2c, D: DelayNs> Sensor for Sht3xSensor<I, D> {
    type Readings = ClimateSample;

    async fn start(&mut self) -> Result<(), SensorError> {
        self.initialize().await
    }

    async fn read(&mut self) -> Result<ClimateSample, SensorError> {
        self.measure().await
    }
}
