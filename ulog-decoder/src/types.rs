//! Core types for the ULog decoder library
//!
//! Defines the value model emitted by the frame decoder, the fatal error enum
//! and the recoverable (accumulated) decode error records. The reader never
//! panics on malformed input: anything that is not fatal per the error
//! taxonomy is pushed onto the reader's error list and scanning continues.

use serde::Serialize;
use std::fmt;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, UlogError>;

/// Fatal errors - these abort `open()` and no reader is returned
#[derive(Debug, thiserror::Error)]
pub enum UlogError {
    /// Magic/version bytes in the file prologue did not match
    #[error("ULog: wrong file format")]
    WrongFileFormat,

    /// A format declaration used a type token outside the closed set
    #[error("Unknown field type: {0}")]
    UnknownFieldType(String),

    /// A format/info/parameter payload could not be parsed structurally
    #[error("Malformed declaration: {0}")]
    MalformedDeclaration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of a recoverable decode anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Frame kind byte outside {F, D, I, P}
    UnknownMessageType,
    /// Data frame referenced a schema id with no registered declaration
    UnknownDataId,
    /// Bytes consumed by a typed parser differed from the declared frame size
    MessageSizeMismatch,
    /// Stream ended mid-payload after a frame header was already read
    UnexpectedEof,
}

/// One recoverable anomaly, recorded with the byte offset of the frame that
/// produced it. Scanning always continues at the next declared frame boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    /// Byte offset of the start of the offending frame
    pub offset: u64,
    pub kind: DecodeErrorKind,
    pub message: String,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at offset {}: {}", self.offset, self.message)
    }
}

/// A decoded field value
///
/// Data-message fields decode to scalars or `Array`; info and parameter
/// values additionally use `String` for `char[n]` payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Signed integer value (int8..int64)
    Integer(i64),
    /// Unsigned integer value (uint8..uint64)
    Unsigned(u64),
    /// Floating-point value (float widened, or double)
    Float(f64),
    Boolean(bool),
    Char(char),
    /// String value decoded from a char array (info/parameter payloads)
    String(String),
    /// Fixed-size array field, one element per declared arity slot
    Array(Vec<FieldValue>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Unsigned(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Boolean(v) => write!(f, "{}", v),
            FieldValue::Char(v) => write!(f, "{}", v),
            FieldValue::String(v) => write!(f, "{}", v),
            FieldValue::Array(vs) => {
                write!(f, "[")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl FieldValue {
    /// Convert to i64 if the value is numeric
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Unsigned(v) => Some(*v as i64),
            FieldValue::Float(v) => Some(*v as i64),
            FieldValue::Boolean(v) => Some(if *v { 1 } else { 0 }),
            _ => None,
        }
    }

    /// Convert to u64 if the value is numeric (used for timestamps)
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::Integer(v) => Some(*v as u64),
            FieldValue::Unsigned(v) => Some(*v),
            FieldValue::Float(v) => Some(*v as u64),
            FieldValue::Boolean(v) => Some(if *v { 1 } else { 0 }),
            _ => None,
        }
    }

    /// Convert to f64 if the value is numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Unsigned(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}
