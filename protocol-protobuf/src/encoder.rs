//! Streaming protobuf encoder.
//!
//! An [`Encoder`] appends fields to a single growable buffer. Nested messages
//! and packed repeated blocks are measured by temporarily swapping in a fresh
//! buffer, encoding into it, and splicing `[varint length][bytes]` back into
//! the parent.
//!
//! Scalar writers follow the presence policy of their [`FieldType`]: a value
//! equal to the type's default is omitted unless `write_default` is set.

use tracing::warn;

use crate::frame::{self, FRAME_HEADER_LEN};
use crate::message::Message;
use crate::types::{FieldType, Presence, make_packed_tag, make_tag};
use crate::wire::{write_bytes, write_little_endian, write_varint, zigzag_encode};

/// Field number that suppresses tag output, used for elements of a packed block.
pub const SKIP_TAG: u32 = 0;

/// Accumulates the protobuf encoding of one message.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
    /// Bytes at the front of `buf` reserved for the frame prefix.
    prefix_len: usize,
}

impl Encoder {
    /// Encoder producing bare protobuf bytes.
    pub fn plain() -> Self {
        Self {
            buf: Vec::with_capacity(64),
            prefix_len: 0,
        }
    }

    /// Encoder producing a gRPC frame: 5 prefix bytes are reserved up front
    /// and patched with the payload length by [`finish`](Self::finish).
    pub fn framed() -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.resize(FRAME_HEADER_LEN, 0);
        Self {
            buf,
            prefix_len: FRAME_HEADER_LEN,
        }
    }

    /// Encode `message` into bare protobuf bytes.
    pub fn encode_message<M: Message + ?Sized>(message: &M) -> Vec<u8> {
        let mut encoder = Self::plain();
        message.encode(&mut encoder);
        encoder.finish()
    }

    /// Encode `message` into a gRPC frame.
    pub fn encode_framed<M: Message + ?Sized>(message: &M) -> Vec<u8> {
        let mut encoder = Self::framed();
        message.encode(&mut encoder);
        encoder.finish()
    }

    /// Consume the encoder and return its bytes, patching the frame prefix if framed.
    pub fn finish(mut self) -> Vec<u8> {
        if self.prefix_len > 0 {
            let payload_len = self.buf.len() - self.prefix_len;
            frame::patch_length(&mut self.buf, payload_len);
        }
        self.buf
    }

    /// Bytes written so far, excluding any frame prefix. Inside a nested
    /// message or packed block this counts only that block's bytes.
    pub fn len(&self) -> usize {
        self.buf.len() - self.prefix_len
    }

    /// Whether no field bytes have been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -- Internal --

    fn write_tag(&mut self, field: u32, ty: FieldType) {
        if field != SKIP_TAG {
            write_varint(&mut self.buf, make_tag(field, ty));
        }
    }

    /// Run `f` against an empty buffer and return what it wrote, restoring the
    /// parent buffer afterwards.
    fn isolated(&mut self, f: impl FnOnce(&mut Self)) -> Vec<u8> {
        let parent = std::mem::take(&mut self.buf);
        let prefix_len = std::mem::replace(&mut self.prefix_len, 0);
        f(self);
        self.prefix_len = prefix_len;
        std::mem::replace(&mut self.buf, parent)
    }

    fn write_varint_field(&mut self, field: u32, ty: FieldType, value: u64, write_default: bool) {
        if elided(ty, value == 0, write_default) {
            return;
        }
        self.write_tag(field, ty);
        write_varint(&mut self.buf, value);
    }

    fn write_fixed_field(
        &mut self,
        field: u32,
        ty: FieldType,
        value: u64,
        width: usize,
        write_default: bool,
    ) {
        if elided(ty, value == 0, write_default) {
            return;
        }
        self.write_tag(field, ty);
        write_little_endian(&mut self.buf, value, width);
    }

    fn write_packed<T: Copy>(
        &mut self,
        field: u32,
        values: &[T],
        mut write_one: impl FnMut(&mut Self, u32, T),
    ) {
        match values {
            [] => {}
            // A single element costs less unpacked and decodes identically.
            [single] => write_one(self, field, *single),
            _ => {
                write_varint(&mut self.buf, make_packed_tag(field));
                let payload = self.isolated(|enc| {
                    for &value in values {
                        write_one(enc, SKIP_TAG, value);
                    }
                });
                write_bytes(&mut self.buf, &payload);
            }
        }
    }

    // -- Varint scalars --

    /// Write an `int32` field. Values outside the 32-bit range are truncated with a warning.
    pub fn write_int32(&mut self, field: u32, value: impl Into<i64>, write_default: bool) {
        let value = narrow_int32(value.into());
        self.write_varint_field(field, FieldType::Int32, value as i64 as u64, write_default);
    }

    /// Write an `int64` field.
    pub fn write_int64(&mut self, field: u32, value: i64, write_default: bool) {
        self.write_varint_field(field, FieldType::Int64, value as u64, write_default);
    }

    /// Write a `uint32` field. Values above `u32::MAX` are truncated with a warning.
    pub fn write_uint32(&mut self, field: u32, value: impl Into<u64>, write_default: bool) {
        let value = narrow_uint32(value.into());
        self.write_varint_field(field, FieldType::Uint32, value as u64, write_default);
    }

    /// Write a `uint64` field.
    pub fn write_uint64(&mut self, field: u32, value: u64, write_default: bool) {
        self.write_varint_field(field, FieldType::Uint64, value, write_default);
    }

    /// Write a zig-zag encoded `sint32` field.
    pub fn write_sint32(&mut self, field: u32, value: impl Into<i64>, write_default: bool) {
        let value = narrow_int32(value.into());
        self.write_varint_field(
            field,
            FieldType::Sint32,
            zigzag_encode(value as i64),
            write_default,
        );
    }

    /// Write a zig-zag encoded `sint64` field.
    pub fn write_sint64(&mut self, field: u32, value: i64, write_default: bool) {
        self.write_varint_field(field, FieldType::Sint64, zigzag_encode(value), write_default);
    }

    /// Write a `bool` field as a one-byte varint.
    pub fn write_bool(&mut self, field: u32, value: bool, write_default: bool) {
        self.write_varint_field(field, FieldType::Bool, value as u64, write_default);
    }

    /// Write an enum field by its numeric value.
    pub fn write_enum(&mut self, field: u32, value: i32, write_default: bool) {
        self.write_varint_field(field, FieldType::Enum, value as i64 as u64, write_default);
    }

    // -- Fixed-width scalars --

    /// Write a little-endian `fixed32` field. Values above `u32::MAX` are truncated with a warning.
    pub fn write_fixed32(&mut self, field: u32, value: impl Into<u64>, write_default: bool) {
        let value = narrow_uint32(value.into());
        self.write_fixed_field(field, FieldType::Fixed32, value as u64, 4, write_default);
    }

    /// Write a little-endian `fixed64` field.
    pub fn write_fixed64(&mut self, field: u32, value: u64, write_default: bool) {
        self.write_fixed_field(field, FieldType::Fixed64, value, 8, write_default);
    }

    /// Write a little-endian `sfixed32` field. Out-of-range values are truncated with a warning.
    pub fn write_sfixed32(&mut self, field: u32, value: impl Into<i64>, write_default: bool) {
        let value = narrow_int32(value.into());
        self.write_fixed_field(field, FieldType::Sfixed32, value as u32 as u64, 4, write_default);
    }

    /// Write a little-endian `sfixed64` field.
    pub fn write_sfixed64(&mut self, field: u32, value: i64, write_default: bool) {
        self.write_fixed_field(field, FieldType::Sfixed64, value as u64, 8, write_default);
    }

    /// Write a `float` field as its IEEE-754 bits.
    pub fn write_float(&mut self, field: u32, value: f32, write_default: bool) {
        if elided(FieldType::Float, value == 0.0, write_default) {
            return;
        }
        self.write_tag(field, FieldType::Float);
        write_little_endian(&mut self.buf, value.to_bits() as u64, 4);
    }

    /// Write a `double` field as its IEEE-754 bits.
    pub fn write_double(&mut self, field: u32, value: f64, write_default: bool) {
        if elided(FieldType::Double, value == 0.0, write_default) {
            return;
        }
        self.write_tag(field, FieldType::Double);
        write_little_endian(&mut self.buf, value.to_bits(), 8);
    }

    // -- Length-delimited --

    /// Write a UTF-8 `string` field as `[tag][varint length][bytes]`.
    pub fn write_string(&mut self, field: u32, value: &str, write_default: bool) {
        self.write_length_delimited(field, FieldType::String, value.as_bytes(), write_default);
    }

    /// Write a `bytes` field as `[tag][varint length][bytes]`.
    pub fn write_bytes(&mut self, field: u32, value: &[u8], write_default: bool) {
        self.write_length_delimited(field, FieldType::Bytes, value, write_default);
    }

    fn write_length_delimited(
        &mut self,
        field: u32,
        ty: FieldType,
        value: &[u8],
        write_default: bool,
    ) {
        if elided(ty, value.is_empty(), write_default) {
            return;
        }
        self.write_tag(field, ty);
        write_bytes(&mut self.buf, value);
    }

    /// Write a nested message as `[tag][varint length][message bytes]`.
    ///
    /// A present message is always written, even when it encodes to nothing.
    /// An absent one is written as an empty message only if `write_default` is set.
    pub fn write_message<M: Message + ?Sized>(
        &mut self,
        field: u32,
        message: Option<&M>,
        write_default: bool,
    ) {
        if message.is_none() && !write_default {
            return;
        }
        self.write_tag(field, FieldType::Message);
        let nested = self.isolated(|enc| {
            if let Some(message) = message {
                message.encode(enc);
            }
        });
        write_bytes(&mut self.buf, &nested);
    }

    // -- Repeated --

    pub fn write_int32_repeated(&mut self, field: u32, values: &[i32]) {
        self.write_packed(field, values, |enc, f, v| enc.write_int32(f, v, true));
    }

    pub fn write_int64_repeated(&mut self, field: u32, values: &[i64]) {
        self.write_packed(field, values, |enc, f, v| enc.write_int64(f, v, true));
    }

    pub fn write_uint32_repeated(&mut self, field: u32, values: &[u32]) {
        self.write_packed(field, values, |enc, f, v| enc.write_uint32(f, v, true));
    }

    pub fn write_uint64_repeated(&mut self, field: u32, values: &[u64]) {
        self.write_packed(field, values, |enc, f, v| enc.write_uint64(f, v, true));
    }

    pub fn write_sint32_repeated(&mut self, field: u32, values: &[i32]) {
        self.write_packed(field, values, |enc, f, v| enc.write_sint32(f, v, true));
    }

    pub fn write_sint64_repeated(&mut self, field: u32, values: &[i64]) {
        self.write_packed(field, values, |enc, f, v| enc.write_sint64(f, v, true));
    }

    pub fn write_fixed32_repeated(&mut self, field: u32, values: &[u32]) {
        self.write_packed(field, values, |enc, f, v| enc.write_fixed32(f, v, true));
    }

    pub fn write_fixed64_repeated(&mut self, field: u32, values: &[u64]) {
        self.write_packed(field, values, |enc, f, v| enc.write_fixed64(f, v, true));
    }

    pub fn write_sfixed32_repeated(&mut self, field: u32, values: &[i32]) {
        self.write_packed(field, values, |enc, f, v| enc.write_sfixed32(f, v, true));
    }

    pub fn write_sfixed64_repeated(&mut self, field: u32, values: &[i64]) {
        self.write_packed(field, values, |enc, f, v| enc.write_sfixed64(f, v, true));
    }

    pub fn write_bool_repeated(&mut self, field: u32, values: &[bool]) {
        self.write_packed(field, values, |enc, f, v| enc.write_bool(f, v, true));
    }

    pub fn write_enum_repeated(&mut self, field: u32, values: &[i32]) {
        self.write_packed(field, values, |enc, f, v| enc.write_enum(f, v, true));
    }

    pub fn write_float_repeated(&mut self, field: u32, values: &[f32]) {
        self.write_packed(field, values, |enc, f, v| enc.write_float(f, v, true));
    }

    pub fn write_double_repeated(&mut self, field: u32, values: &[f64]) {
        self.write_packed(field, values, |enc, f, v| enc.write_double(f, v, true));
    }

    /// Length-delimited types are never packed: one tagged field per element.
    pub fn write_string_repeated<S: AsRef<str>>(&mut self, field: u32, values: &[S]) {
        for value in values {
            self.write_string(field, value.as_ref(), true);
        }
    }

    pub fn write_bytes_repeated<B: AsRef<[u8]>>(&mut self, field: u32, values: &[B]) {
        for value in values {
            self.write_bytes(field, value.as_ref(), true);
        }
    }

    pub fn write_message_repeated<M: Message>(&mut self, field: u32, messages: &[M]) {
        for message in messages {
            self.write_message(field, Some(message), true);
        }
    }
}

/// Whether the presence policy of `ty` drops this value.
fn elided(ty: FieldType, is_default: bool, write_default: bool) -> bool {
    match ty.presence() {
        Presence::ElideDefault => is_default && !write_default,
        Presence::Explicit => false,
    }
}

fn narrow_int32(value: i64) -> i32 {
    let narrowed = value as i32;
    if narrowed as i64 != value {
        warn!(value, narrowed, "int32 overflow on encoding, value truncated");
    }
    narrowed
}

fn narrow_uint32(value: u64) -> u32 {
    let narrowed = value as u32;
    if narrowed as u64 != value {
        warn!(value, narrowed, "uint32 overflow on encoding, value truncated");
    }
    narrowed
}
