//! Persistent key-value contract used to mirror the sensor baseline.
//!
//! The store is opened for every access and closed when the session is
//! dropped, so no handle outlives a single read or write.

pub mod memory;

pub use memory::MemoryStore;

use crate::sensors::Baseline;
use log::debug;
use thiserror_no_std::Error;

pub const CO2_BASELINE_KEY: &str = "co2_baseline";
pub const TVOC_BASELINE_KEY: &str = "tvoc_baseline";

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("key {0} not found")]
    NotFound(&'static str),
    #[error("failed to open storage")]
    Open,
    #[error("failed to read key {0}")]
    Read(&'static str),
    #[error("failed to write key {0}")]
    Write(&'static str),
    #[error("failed to commit pending writes")]
    Commit,
}

/// An open handle on the store. Dropping it releases the handle; writes that
/// were not committed are discarded.
pub trait StorageSession {
    fn get_u16(&mut self, key: &'static str) -> Result<u16, StorageError>;

    fn set_u16(&mut self, key: &'static str, value: u16) -> Result<(), StorageError>;

    fn commit(&mut self) -> Result<(), StorageError>;
}

pub trait KeyValueStore {
    type Session<'a>: StorageSession
    where
        Self: 'a;

    fn open(&mut self) -> Result<Self::Session<'_>, StorageError>;
}

/// Load a previously persisted baseline.
///
/// Returns `Ok(None)` when either key is missing (cold start).
pub fn load_baseline<S: KeyValueStore>(store: &mut S) -> Result<Option<Baseline>, StorageError> {
    let mut session = store.open()?;

    let eco2 = match session.get_u16(CO2_BASELINE_KEY) {
        Ok(value) => value,
        Err(StorageError::NotFound(key)) => {
            debug!("No stored baseline ({} missing)", key);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let tvoc = match session.get_u16(TVOC_BASELINE_KEY) {
        Ok(value) => value,
        Err(StorageError::NotFound(key)) => {
            debug!("No stored baseline ({} missing)", key);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    Ok(Some(Baseline { eco2, tvoc }))
}

/// Write both baseline words and commit them in one session.
pub fn store_baseline<S: KeyValueStore>(store: &mut S, baseline: Baseline) -> Result<(), StorageError> {
    let mut session = store.open()?;
    session.set_u16(CO2_BASELINE_KEY, baseline.eco2)?;
    session.set_u16(TVOC_BASELINE_KEY, baseline.tvoc)?;
    session.commit()
}
