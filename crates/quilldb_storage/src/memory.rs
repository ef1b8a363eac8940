//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use parking_lot::Mutex;
use std::sync::Arc;

/// An in-memory datafile backend.
///
/// Used for `in_memory_only` datastores and tests. The buffer can be shared
/// between backends via [`MemoryBackend::shared`], which lets a test reopen
/// "the same file" without a filesystem.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemoryBackend {
    /// Creates an empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend over a shared buffer.
    #[must_use]
    pub fn shared(buffer: Arc<Mutex<Vec<u8>>>) -> Self {
        Self { buffer }
    }

    /// Returns a handle to the underlying buffer.
    #[must_use]
    pub fn buffer(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.buffer)
    }
}

impl StorageBackend for MemoryBackend {
    fn ensure_integrity(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn read_to_string(&mut self) -> StorageResult<String> {
        Ok(String::from_utf8(self.buffer.lock().clone())?)
    }

    fn append(&mut self, data: &[u8], _sync: bool) -> StorageResult<()> {
        self.buffer.lock().extend_from_slice(data);
        Ok(())
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        *self.buffer.lock() = data.to_vec();
        Ok(())
    }
}
