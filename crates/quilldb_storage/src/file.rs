//! File-based storage backend with crash-safe replacement.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A file-based datafile backend.
///
/// No descriptor outlives a single call: every operation opens the file,
/// does its work, flushes when asked, and closes. This keeps durability
/// ordering tied to the operation that requested it.
///
/// # Crash-safe rewrite
///
/// Replacing the datafile with new contents `D` follows a fixed protocol
/// around the sibling temp file `<file>~`:
///
/// 1. Flush the enclosing directory
/// 2. If the target exists, flush it
/// 3. Write `D` to `<file>~`
/// 4. Flush `<file>~`
/// 5. Rename `<file>~` onto the target
/// 6. Flush the enclosing directory
///
/// A crash before step 5 leaves the previous contents intact; a crash after
/// leaves the new contents. [`FileBackend::ensure_integrity`] resolves
/// whichever state is found on the next open.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Creates a backend for the datafile at `path`.
    ///
    /// The file itself is not touched until [`StorageBackend::ensure_integrity`]
    /// runs.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path to the datafile.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the rewrite temp file (`<file>~`).
    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push("~");
        PathBuf::from(name)
    }

    /// Flushes the directory containing the datafile.
    ///
    /// Directories cannot be opened for synchronization on Windows, so the
    /// step is skipped there; everywhere else errors are reported unmodified.
    fn flush_directory(&self) -> io::Result<()> {
        #[cfg(windows)]
        {
            Ok(())
        }
        #[cfg(not(windows))]
        {
            let parent = match self.path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            File::open(parent)?.sync_all()
        }
    }

    /// Opens, flushes and closes an existing file.
    fn flush_file(path: &Path) -> io::Result<()> {
        OpenOptions::new().write(true).open(path)?.sync_all()
    }
}

impl StorageBackend for FileBackend {
    fn ensure_integrity(&mut self) -> StorageResult<()> {
        let temp = self.temp_path();
        if self.path.exists() {
            // The datafile is authoritative; a leftover temp file belongs to
            // a rewrite that never reached the rename step.
            if temp.exists() {
                std::fs::remove_file(&temp)?;
            }
        } else if temp.exists() {
            // Rewrite completed the rename's prerequisite work but the
            // process died before (or during) the rename: adopt the temp.
            std::fs::rename(&temp, &self.path)?;
            self.flush_directory()?;
        } else {
            File::create(&self.path)?.sync_all()?;
            self.flush_directory()?;
        }
        Ok(())
    }

    fn read_to_string(&mut self) -> StorageResult<String> {
        Ok(std::fs::read_to_string(&self.path)?)
    }

    fn append(&mut self, data: &[u8], sync: bool) -> StorageResult<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        file.write_all(data)?;
        if sync {
            file.sync_all()?;
        }
        Ok(())
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        self.flush_directory()?;

        if self.path.exists() {
            Self::flush_file(&self.path)?;
        }

        let temp = self.temp_path();
        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp, &self.path)?;
        self.flush_directory()?;
        Ok(())
    }
}
