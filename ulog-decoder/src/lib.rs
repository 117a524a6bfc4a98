//! ULog Decoder Library
//!
//! A library for decoding ULog telemetry log files: a self-describing binary
//! stream of typed, length-prefixed messages recorded by an autopilot.
//!
//! # Architecture
//!
//! This library is intentionally minimal and focused on decoding:
//! - Validates the fixed file prologue
//! - Builds the message-schema table from in-stream format declarations
//! - Runs a two-pass statistics/index scan at open time (instance counts are
//!   forward references, only resolvable after the whole stream is seen)
//! - Serves decoded data records through a seek/read interface
//! - Skips past malformed frames instead of aborting, accumulating the
//!   anomalies for inspection
//!
//! The library does NOT:
//! - Write or encode logs (the format is read-only here)
//! - Export or persist decoded data
//! - Configure logging/printing
//!
//! All higher-level functionality is in the application layer (ulog-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use ulog_decoder::UlogReader;
//!
//! let mut reader = UlogReader::open("flight.ulg").unwrap();
//! println!("system: {}", reader.system_name());
//! println!("fields: {}", reader.fields().len());
//!
//! reader.seek(0).unwrap();
//! while let Some(update) = reader.read_next().unwrap() {
//!     // Process one flattened data record
//!     println!("t = {} us, {} fields", update.timestamp, update.fields.len());
//! }
//! ```

// Public modules
pub mod frame;
pub mod reader;
pub mod schema;
pub mod types;

// Re-export main types for convenience
pub use frame::{DataRecord, KeyValue, LogMessage};
pub use reader::{DataUpdate, ParamUpdate, SeekEntry, UlogReader};
pub use schema::{FieldDescriptor, FieldType, MessageSchema, SchemaRegistry};
pub use types::{DecodeError, DecodeErrorKind, FieldValue, Result, UlogError};

// Internal modules (not exposed in public API)
mod cursor;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
