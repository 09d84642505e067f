//! Sans-IO protobuf wire codec.
//!
//! This crate encodes and decodes the protobuf binary wire format by hand:
//! varints, zig-zag integers, little-endian fixed-width values, packed and
//! unpacked repeated fields, and nested messages. It performs no I/O and has
//! no code generator; message types implement [`Message`] themselves.
//!
//! - **Encoding**: [`Encoder`] appends fields to one buffer, optionally
//!   reserving a 5-byte gRPC frame prefix that is patched on [`Encoder::finish`].
//! - **Decoding**: [`Decoder`] reads a bounded window of a shared
//!   [`bytes::Bytes`] buffer. Nested messages and `bytes` fields are decoded
//!   without copying.
//!
//! # Example
//!
//! ```
//! use protocol_protobuf::{Decoder, Encoder, FieldType, make_tag};
//!
//! let mut encoder = Encoder::framed();
//! encoder.write_int32_repeated(4, &[1, 2, 3]);
//! let frame = encoder.finish();
//! assert_eq!(frame, [0, 0, 0, 0, 5, 0x22, 0x03, 0x01, 0x02, 0x03]);
//!
//! let mut decoder = Decoder::from_framed(frame);
//! let mut values = Vec::new();
//! while let Some(tag) = decoder.read_tag() {
//!     decoder.read_int32_repeated(tag, &mut values).unwrap();
//! }
//! assert_eq!(values, [1, 2, 3]);
//! assert_eq!(make_tag(4, FieldType::Int32), 0x20);
//! ```

pub mod decoder;
pub mod encoder;
mod error;
pub mod frame;
mod message;
pub mod types;
pub mod wire;

pub use decoder::{Decoder, SKIP_TAG_CHECKING};
pub use encoder::{Encoder, SKIP_TAG};
pub use error::DecodeError;
pub use message::Message;
pub use types::{
    FieldType, MAX_FIELD_NUMBER, Presence, Tag, WireType, is_packed_tag, make_packed_tag, make_tag,
    tag_field_number, tag_wire_type,
};
