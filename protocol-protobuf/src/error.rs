//! Error types for protobuf decoding.

/// Error produced by a single field read.
///
/// Every failing read also raises the decoder's sticky error flag, so callers
/// decoding a whole message may ignore individual results and check
/// [`Decoder::was_decoding_error`](crate::Decoder::was_decoding_error) once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The tag's wire type does not match the field's declared type.
    #[error("wire type mismatch: expected {expected}, found {found}")]
    WireTypeMismatch { expected: u8, found: u8 },

    /// The value runs past the end of the decoder's window.
    #[error("truncated field")]
    Truncated,

    /// A varint is longer than ten bytes or cut off by the window end.
    #[error("malformed varint")]
    MalformedVarint,

    /// Packed elements consumed more bytes than the block declared.
    #[error("packed block overrun")]
    PackedOverrun,

    /// A declared length exceeds the enclosing window.
    #[error("length {len} exceeds remaining {remaining} bytes")]
    LengthOutOfBounds { len: u64, remaining: usize },

    /// A string field holds invalid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// The wire type code is not one of varint, fixed64, length-delimited or fixed32.
    #[error("unsupported wire type: {0}")]
    UnsupportedWireType(u8),

    /// One or more fields of a decoded message failed.
    #[error("message had field decoding errors")]
    FieldErrors,
}
