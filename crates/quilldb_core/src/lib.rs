//! # QuillDB Core
//!
//! Core engine for QuillDB, an embedded, single-process, file-backed
//! document database.
//!
//! One [`Datastore`] is one collection: an append-only datafile on disk, an
//! in-memory id-map owning every document, and ordered indexes holding id
//! handles. All operations are linearized by a FIFO [`executor::Executor`]
//! so there is exactly one writer at any time.
//!
//! This crate provides:
//! - Query matching with logical, comparison and array operators
//! - Update modifiers with dot-notation and positional semantics
//! - Include/exclude projections
//! - Unique, sparse, compound and array-valued indexes with transactional
//!   batch operations
//! - Append-only log persistence with crash-safe compaction
//! - TTL expiry via `expireAfterSeconds` indexes
//!
//! ## Usage
//!
//! ```ignore
//! use quilldb_core::{Datastore, Options};
//!
//! let db = Datastore::open(Options::file("planets.db"))?;
//! db.insert(doc)?;
//! let results = db.find(query).sort(&[("age", 1)]).limit(10).exec()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cursor;
mod datastore;
mod error;
pub mod executor;
mod index;
pub mod matcher;
pub mod persistence;
pub mod projection;
pub mod update;

pub use cursor::{Cursor, WherePred};
pub use datastore::{Datastore, Options, RemoveOptions, UpdateOptions, UpdateResult};
pub use error::{DbError, DbResult};
pub use index::{DocIndex, IndexSpec, Key};

pub use quilldb_codec::{Value, ValueComparator};
