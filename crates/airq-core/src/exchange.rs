//! Single-slot hand-off from the acquisition task to consumers.
//!
//! Freshness wins over completeness: a publish replaces any sample nobody has
//! read yet, and a read consumes the slot. Consumers never block the producer
//! and never see a backlog of stale samples.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use serde::{Deserialize, Serialize};

/// The unit of exchange with consumers.
///
/// Each field holds the last successfully verified value of its
/// sub-measurement; a transient failure never zeroes it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FusedSample {
    pub temperature: f32,
    pub humidity: f32,
    pub eco2: u16,
    pub tvoc: u16,
    /// Milliseconds since boot, wrapping.
    pub timestamp_ms: u32,
}

impl FusedSample {
    /// Upper bound of a postcard-encoded sample (two f32, two u16 and one u32 varint).
    pub const MAX_ENCODED_LEN: usize = 4 + 4 + 3 + 3 + 5;

    /// Compact wire encoding for publishers.
    pub fn encode<'b>(&self, buffer: &'b mut [u8]) -> Result<&'b mut [u8], postcard::Error> {
        postcard::to_slice(self, buffer)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

pub struct SampleExchange {
    slot: Signal<CriticalSectionRawMutex, FusedSample>,
}

impl SampleExchange {
    pub const fn new() -> Self {
        Self {
            slot: Signal::new(),
        }
    }

    /// Store `sample`, replacing any unread one. Never blocks.
    pub fn publish(&self, sample: FusedSample) {
        self.slot.signal(sample);
    }

    /// Take the latest unread sample, or `None` if nothing new was published.
    pub fn try_read(&self) -> Option<FusedSample> {
        self.slot.try_take()
    }

    pub fn has_unread(&self) -> bool {
        self.slot.signaled()
    }
}

impl Default for SampleExchange {
    fn default() -> Self {
        Self::new()
    }
}
