//! Emulated I2C bus with an SHT3x and an SGP30 attached.
//!
//! Each device answers the command set the drivers use with correctly
//! checksummed frames. Readings drift slowly over time so the logs show
//! something other than a constant.

use airq_core::checksum::{WORD_FRAME_LEN, crc8, encode_word};
use airq_core::sensors::{
    SGP30_ADDR, SGP30_CMD_GET_BASELINE, SGP30_CMD_INIT_AIR_QUALITY, SGP30_CMD_MEASURE_AIR_QUALITY,
    SGP30_CMD_SET_BASELINE, SGP30_CMD_SET_HUMIDITY, SHT3X_ADDR, SHT3X_CMD_MEASURE,
    SHT3X_CMD_SOFT_RESET,
};
use embassy_time::Instant;
use embedded_hal_async::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use log::{debug, trace, warn};

const MAX_RESPONSE: usize = 2 * WORD_FRAME_LEN;

#[derive(Default)]
struct Response {
    bytes: [u8; MAX_RESPONSE],
    len: usize,
}

impl Response {
    fn words(first: u16, second: u16) -> Self {
        let mut bytes = [0u8; MAX_RESPONSE];
        bytes[..WORD_FRAME_LEN].copy_from_slice(&encode_word(first));
        bytes[WORD_FRAME_LEN..].copy_from_slice(&encode_word(second));
        Self {
            bytes,
            len: MAX_RESPONSE,
        }
    }
}

#[derive(Default)]
struct Sgp30Model {
    initialized: bool,
    baseline_eco2: u16,
    baseline_tvoc: u16,
    absolute_humidity_raw: u16,
}

/// A bus carrying one emulated SHT3x and one emulated SGP30.
pub struct SimulatedBus {
    started: Instant,
    sht3x_pending: Option<Response>,
    sgp30_pending: Option<Response>,
    sgp30: Sgp30Model,
    /// Every n-th measurement frame gets a flipped bit.
    corrupt_every: Option<u32>,
    frames: u32,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            sht3x_pending: None,
            sgp30_pending: None,
            sgp30: Sgp30Model {
                baseline_eco2: 0x8F3A,
                baseline_tvoc: 0x8E21,
                ..Default::default()
            },
            corrupt_every: None,
            frames: 0,
        }
    }

    pub fn with_corruption(mut self, every: u32) -> Self {
        self.corrupt_every = (every > 0).then_some(every);
        self
    }

    fn elapsed_secs(&self) -> f64 {
        Instant::now().saturating_duration_since(self.started).as_millis() as f64 / 1000.0
    }

    fn climate_frame(&mut self) -> Response {
        let t = self.elapsed_secs();
        let temperature = 23.0 + 3.0 * (t / 120.0).sin() + 0.5 * (t / 37.0).cos();
        let humidity = 50.0 + 10.0 * (t / 180.0).sin() + 2.0 * (t / 23.0).cos();

        let raw_temperature = ((temperature + 45.0) / 175.0 * 65535.0).clamp(0.0, 65535.0) as u16;
        let raw_humidity = (humidity / 100.0 * 65535.0).clamp(0.0, 65535.0) as u16;
        self.maybe_corrupt(Response::words(raw_temperature, raw_humidity))
    }

    fn air_quality_frame(&mut self) -> Response {
        if !self.sgp30.initialized {
            // The real part answers 400/0 until it has been initialized.
            return Response::words(400, 0);
        }
        let t = self.elapsed_secs();
        let eco2 = 600.0 + 350.0 * (t / 300.0).sin() + 30.0 * (t / 41.0).cos();
        // Uncompensated readings would drift with humidity; model a small offset.
        let humidity_offset = self.sgp30.absolute_humidity_raw as f64 / 256.0 * 0.5;
        let tvoc = 40.0 + 25.0 * (t / 90.0).sin() + humidity_offset;
        self.maybe_corrupt(Response::words(eco2.max(400.0) as u16, tvoc.max(0.0) as u16))
    }

    fn maybe_corrupt(&mut self, mut response: Response) -> Response {
        self.frames = self.frames.wrapping_add(1);
        if let Some(every) = self.corrupt_every {
            if self.frames % every == 0 {
                trace!("Simulator: corrupting frame {}", self.frames);
                response.bytes[1] ^= 0x01;
            }
        }
        response
    }

    fn sht3x_write(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        match bytes {
            b if b == SHT3X_CMD_SOFT_RESET => {
                self.sht3x_pending = None;
                Ok(())
            }
            b if b == SHT3X_CMD_MEASURE => {
                self.sht3x_pending = Some(self.climate_frame());
                Ok(())
            }
            _ => {
                warn!("Simulator: unknown SHT3x command {:02x?}", bytes);
                Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data))
            }
        }
    }

    fn sgp30_write(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        if bytes.len() < 2 {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));
        }
        let (opcode, payload) = bytes.split_at(2);
        let words = checked_words(payload)?;

        match opcode {
            op if op == SGP30_CMD_INIT_AIR_QUALITY => {
                self.sgp30.initialized = true;
            }
            op if op == SGP30_CMD_MEASURE_AIR_QUALITY => {
                self.sgp30_pending = Some(self.air_quality_frame());
            }
            op if op == SGP30_CMD_GET_BASELINE => {
                self.sgp30_pending = Some(Response::words(
                    self.sgp30.baseline_eco2,
                    self.sgp30.baseline_tvoc,
                ));
            }
            op if op == SGP30_CMD_SET_BASELINE => {
                let [tvoc, eco2] = words.as_slice() else {
                    return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));
                };
                self.sgp30.baseline_tvoc = *tvoc;
                self.sgp30.baseline_eco2 = *eco2;
                debug!("Simulator: SGP30 baseline set to {:#06x}/{:#06x}", eco2, tvoc);
            }
            op if op == SGP30_CMD_SET_HUMIDITY => {
                let [raw] = words.as_slice() else {
                    return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));
                };
                self.sgp30.absolute_humidity_raw = *raw;
                trace!(
                    "Simulator: SGP30 humidity {:.2} g/m3",
                    *raw as f32 / 256.0
                );
            }
            _ => {
                warn!("Simulator: unknown SGP30 command {:02x?}", opcode);
                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));
            }
        }
        Ok(())
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse word+crc triplets written by the host, rejecting bad checksums the
/// way the real parts NAK them.
fn checked_words(payload: &[u8]) -> Result<Vec<u16>, ErrorKind> {
    if payload.len() % WORD_FRAME_LEN != 0 {
        return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));
    }
    payload
        .chunks_exact(WORD_FRAME_LEN)
        .map(|chunk| {
            if crc8(&chunk[..2]) == chunk[2] {
                Ok(u16::from_be_bytes([chunk[0], chunk[1]]))
            } else {
                Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data))
            }
        })
        .collect()
}

fn fill(pending: &mut Option<Response>, read: &mut [u8]) -> Result<(), ErrorKind> {
    let response = pending
        .take()
        .ok_or(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))?;
    if read.len() > response.len {
        return Err(ErrorKind::Other);
    }
    read.copy_from_slice(&response.bytes[..read.len()]);
    Ok(())
}

impl ErrorType for SimulatedBus {
    type Error = ErrorKind;
}

impl I2c for SimulatedBus {
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        for operation in operations {
            match (address, operation) {
                (SHT3X_ADDR, Operation::Write(bytes)) => self.sht3x_write(bytes)?,
                (SHT3X_ADDR, Operation::Read(buffer)) => fill(&mut self.sht3x_pending, buffer)?,
                (SGP30_ADDR, Operation::Write(bytes)) => self.sgp30_write(bytes)?,
                (SGP30_ADDR, Operation::Read(buffer)) => fill(&mut self.sgp30_pending, buffer)?,
                _ => return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)),
            }
        }
        Ok(())
    }
}
