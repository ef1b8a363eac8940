//! # QuillDB Codec
//!
//! Document model for QuillDB: the dynamic [`Value`] type, the line-oriented
//! serialization used by the append-only datafile, reserved-key validation,
//! deep copying, and the total value ordering shared by indexes and sorts.
//!
//! ## Line format rules
//!
//! - One document per line, no embedded newlines
//! - Dates encode as `{"$$date": <epoch-ms>}` and round-trip losslessly
//! - Numbers are signed 64-bit integers; floats are rejected
//! - Map keys are canonically ordered, so equality is structural
//!
//! ## Usage
//!
//! ```
//! use quilldb_codec::{deserialize, serialize, Value};
//!
//! let doc = Value::object([("planet", Value::from("Earth"))]);
//! let line = serialize(&doc);
//! assert_eq!(deserialize(&line).unwrap(), doc);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compare;
mod document;
mod error;
mod ser;
mod value;

pub use compare::{StringCmp, ValueComparator};
pub use document::{check_object, deep_copy, doc_id, generate_id};
pub use error::{CodecError, CodecResult};
pub use ser::{deserialize, from_json, serialize, to_json};
pub use value::{get_dotted, get_dotted_parts, Value};
