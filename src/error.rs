//! Error types for encoding/decoding operations.

use thiserror::Error;

/// Errors that can occur while encoding or iterating a compressed stream.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Operation on an encoder that has already been closed.
    #[error("encoder is closed")]
    Closed,

    /// The encoder was used before being reset with a schema.
    #[error("schema is required")]
    SchemaRequired,

    /// The message carries wire-format fields that are not part of its
    /// descriptor and therefore cannot be diffed against the schema.
    #[error("message has unknown wire-format fields")]
    UnknownFields,

    /// A compressed-field slot is absent from the message or holds a value
    /// that is not `double` or `float`.
    #[error("field {0} is missing or holds a non-floating-point value")]
    UnknownFieldType(u32),

    /// Failed to get or set a field on a message.
    #[error("failed to access field {0} on message")]
    FieldAccess(u32),

    /// The underlying byte source was exhausted.
    #[error("end of stream")]
    Eof,

    /// The underlying reader failed.
    #[error("stream I/O failed")]
    Io(#[from] std::io::Error),

    /// A marshaled payload or varint could not be decoded.
    #[error("failed to decode protobuf payload")]
    Decode(#[from] prost::DecodeError),
}
