use heapless::LinearMap;

use super::{KeyValueStore, StorageError, StorageSession};

/// Maximum number of distinct keys held by a [`MemoryStore`].
pub const MEMORY_STORE_CAPACITY: usize = 8;

type Entries = LinearMap<&'static str, u16, MEMORY_STORE_CAPACITY>;

/// RAM-backed key-value store with commit semantics.
///
/// Writes are staged in the session and only become visible once committed.
/// Individual operations can be made to fail to exercise error paths.
#[derive(Default)]
pub struct MemoryStore {
    committed: Entries,
    fail_open: bool,
    fail_write: bool,
    fail_commit: bool,
    commits: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&mut self, fail: bool) {
        self.fail_open = fail;
    }

    pub fn fail_write(&mut self, fail: bool) {
        self.fail_write = fail;
    }

    pub fn fail_commit(&mut self, fail: bool) {
        self.fail_commit = fail;
    }

    /// Number of successful commits so far.
    pub fn commits(&self) -> u32 {
        self.commits
    }

    /// Committed value for `key`, bypassing sessions.
    pub fn value(&self, key: &'static str) -> Option<u16> {
        self.committed.get(&key).copied()
    }
}

pub struct MemorySession<'a> {
    store: &'a mut MemoryStore,
    staged: Entries,
}

impl KeyValueStore for MemoryStore {
    type Session<'a> = MemorySession<'a>;

    fn open(&mut self) -> Result<MemorySession<'_>, StorageError> {
        if self.fail_open {
            return Err(StorageError::Open);
        }
        Ok(MemorySession {
            store: self,
            staged: Entries::new(),
        })
    }
}

impl StorageSession for MemorySession<'_> {
    fn get_u16(&mut self, key: &'static str) -> Result<u16, StorageError> {
        self.staged
            .get(&key)
            .or_else(|| self.store.committed.get(&key))
            .copied()
            .ok_or(StorageError::NotFound(key))
    }

    fn set_u16(&mut self, key: &'static str, value: u16) -> Result<(), StorageError> {
        if self.store.fail_write {
            return Err(StorageError::Write(key));
        }
        self.staged
            .insert(key, value)
            .map(|_| ())
            .map_err(|_| StorageError::Write(key))
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if self.store.fail_commit {
            return Err(StorageError::Commit);
        }
        for (key, value) in self.staged.iter() {
            self.store
                .committed
                .insert(*key, *value)
                .map_err(|_| StorageError::Commit)?;
        }
        self.staged.clear();
        self.store.commits += 1;
        Ok(())
    }
}
