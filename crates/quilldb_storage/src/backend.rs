//! Storage backend trait definition.

use crate::error::StorageResult;

/// A storage backend for a QuillDB datafile.
///
/// Backends are **opaque line stores**. They provide whole-file reads,
/// appends, and atomic replacement. The core owns all format interpretation;
/// backends do not understand documents or index declarations.
///
/// # Invariants
///
/// - `append` with `sync` set must not return before the data is durable
/// - `rewrite` must leave either the previous or the new contents readable
///   after a crash at any point, never a mix
/// - `ensure_integrity` must be called once before the first read
pub trait StorageBackend: Send {
    /// Recovers the datafile from an interrupted rewrite and guarantees it
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error if recovery or creation fails.
    fn ensure_integrity(&mut self) -> StorageResult<()>;

    /// Reads the entire datafile as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or non-UTF-8 contents.
    fn read_to_string(&mut self) -> StorageResult<String>;

    /// Appends raw bytes to the end of the datafile.
    ///
    /// With `sync`, the write is flushed to durable storage before this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or flush fails.
    fn append(&mut self, data: &[u8], sync: bool) -> StorageResult<()>;

    /// Atomically replaces the datafile contents.
    ///
    /// # Errors
    ///
    /// Returns an error if any step of the replacement fails.
    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()>;
}
