//! CRC-8 integrity codes for Sensirion-style data words.
//!
//! Every 2-byte word a sensor returns is followed by one code byte computed
//! with polynomial `0x31` (x⁸ + x⁵ + x⁴ + 1), initial value `0xFF`, no
//! reflection and no final xor.

use crate::sensors::SensorError;

const CRC8_POLYNOMIAL: u8 = 0x31;
const CRC8_INIT: u8 = 0xFF;

/// Bytes occupied by one data word plus its code on the wire.
pub const WORD_FRAME_LEN: usize = 3;

/// Compute the 8-bit integrity code over `data`.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = CRC8_INIT;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ CRC8_POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Check a received word against the code that followed it.
pub fn verify_word(word: [u8; 2], code: u8) -> bool {
    crc8(&word) == code
}

/// Frame a big-endian word with its code, ready to be appended to a command.
pub fn encode_word(value: u16) -> [u8; WORD_FRAME_LEN] {
    let [hi, lo] = value.to_be_bytes();
    [hi, lo, crc8(&[hi, lo])]
}

/// Split a response made of `N` (word, code) triples into verified words.
///
/// Fails on the first word whose code does not match, or if `frame` holds
/// fewer than `N` triples; no partial result is returned in either case.
pub fn decode_words<const N: usize>(
    frame: &[u8],
    sensor: &'static str,
) -> Result<[u16; N], SensorError> {
    let expected = N * WORD_FRAME_LEN;
    if frame.len() < expected {
        return Err(SensorError::ShortFrame {
            sensor,
            expected,
            actual: frame.len(),
        });
    }

    let mut words = [0u16; N];
    for (index, (chunk, word)) in frame
        .chunks_exact(WORD_FRAME_LEN)
        .zip(words.iter_mut())
        .enumerate()
    {
        let data = [chunk[0], chunk[1]];
        let expected = crc8(&data);
        if expected != chunk[2] {
            return Err(SensorError::Integrity {
                sensor,
                word: index,
                expected,
                actual: chunk[2],
            });
        }
        *word = u16::from_be_bytes(data);
    }
    Ok(words)
}
