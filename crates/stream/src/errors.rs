//! Errors returned by this crate.

use thiserror::Error;

use crate::content::Content;

/// Errors that may occur while decoding a serialized object stream.
///
/// Every parsing error is fatal to the current run; no partial result is
/// returned. Variants carry the byte offset at which the problem was
/// detected whenever one is available.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("invalid stream magic: 0x{0:04x}")]
    InvalidMagic(u16),

    #[error("invalid stream version: 0x{0:04x}")]
    InvalidVersion(u16),

    #[error("stream ended unexpectedly at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("got unknown type code 0x{tag:02x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("invalid reference handle 0x{handle:x} at offset {offset}")]
    InvalidHandle { handle: u32, offset: usize },

    #[error("handle 0x{handle:x} is already registered")]
    HandleCollision { handle: u32 },

    #[error("invalid class descriptor: {0}")]
    InvalidClassDesc(&'static str),

    #[error("invalid field type 0x{tag:02x} at offset {offset}")]
    InvalidFieldType { tag: u8, offset: usize },

    #[error("invalid array: {reason} at offset {offset}")]
    InvalidArray { reason: &'static str, offset: usize },

    #[error("invalid string length {length} at offset {offset}")]
    InvalidStringLength { length: i64, offset: usize },

    #[error("invalid modified UTF-8 sequence at offset {offset}")]
    Mutf8 { offset: usize },

    #[error("externalizable class {class:?} stores opaque contents that cannot be decoded")]
    ExternalContentsUnsupported { class: String },

    #[error("externalizable class {class:?} refused its block data")]
    UnhandledExternal { class: String },

    #[error("no transformer handles the custom data of class {class:?} at offset {offset}")]
    CustomReadObjectUnhandled { class: String, offset: usize },

    /// Internal unwinding marker: a content node flagged as a thrown
    /// exception was observed outside the `EXCEPTION` wrapper. The nearest
    /// dispatcher converts this back into a regular result, so it only
    /// escapes to callers on malformed streams.
    #[error("exception object read outside the exception wrapper")]
    ExceptionDuringRead(Content),

    #[error("{reason} at offset {offset}")]
    InvalidStructure { reason: &'static str, offset: usize },

    #[error("seek to position {position} is out of bounds")]
    SeekOutOfBounds { position: usize },
}
