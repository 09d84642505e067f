//! Bounded protobuf decoder.
//!
//! A [`Decoder`] reads the window `[offset, end_limit)` of a shared
//! [`Bytes`] buffer. Nested messages get their own decoder over the same
//! buffer with a tighter `end_limit`; no bytes are copied, and decoded
//! `bytes` fields are slices of the input.
//!
//! Every failed read returns a [`DecodeError`] and also raises a sticky flag,
//! so message implementations can ignore individual results and let the
//! caller check [`Decoder::was_decoding_error`] once at the end.

use bytes::Bytes;
use tracing::trace;

use crate::error::DecodeError;
use crate::frame::FRAME_HEADER_LEN;
use crate::message::Message;
use crate::types::{
    FieldType, MAX_FIELD_NUMBER, TAG_TYPE_BITS, Tag, WireType, is_packed_tag, tag_wire_type,
};
use crate::wire::{read_little_endian, read_varint, zigzag_decode};

/// Tag value that disables wire type validation, used for packed elements.
pub const SKIP_TAG_CHECKING: Tag = 0;

/// Reads protobuf fields from a bounded window of a shared buffer.
#[derive(Debug, Clone)]
pub struct Decoder {
    buf: Bytes,
    offset: usize,
    end_limit: usize,
    was_decoding_error: bool,
}

impl Decoder {
    /// Decoder over the whole of `buf`.
    pub fn from_bytes(buf: impl Into<Bytes>) -> Self {
        let buf = buf.into();
        let end_limit = buf.len();
        Self {
            buf,
            offset: 0,
            end_limit,
            was_decoding_error: false,
        }
    }

    /// Decoder over the payload of a gRPC frame, skipping the 5-byte prefix.
    ///
    /// The prefix itself is not validated. A buffer too short to hold it
    /// yields an empty window with the error flag raised.
    pub fn from_framed(buf: impl Into<Bytes>) -> Self {
        let mut decoder = Self::from_bytes(buf);
        if decoder.end_limit < FRAME_HEADER_LEN {
            decoder.offset = decoder.end_limit;
            decoder.was_decoding_error = true;
        } else {
            decoder.offset = FRAME_HEADER_LEN;
        }
        decoder
    }

    /// Decode a whole message from bare protobuf bytes.
    pub fn decode_message<M: Message + Default>(buf: impl Into<Bytes>) -> Result<M, DecodeError> {
        let mut decoder = Self::from_bytes(buf);
        let mut message = M::default();
        message.decode(&mut decoder);
        if decoder.was_decoding_error {
            return Err(DecodeError::FieldErrors);
        }
        Ok(message)
    }

    /// Current read position in the underlying buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Exclusive end of this decoder's window.
    pub fn end_limit(&self) -> usize {
        self.end_limit
    }

    /// Bytes left in the window.
    pub fn remaining(&self) -> usize {
        self.end_limit - self.offset
    }

    /// Whether any read on this decoder (or a nested one) has failed.
    pub fn was_decoding_error(&self) -> bool {
        self.was_decoding_error
    }

    /// Read the next field tag, or `None` at the end of the window.
    ///
    /// A malformed tag, or one naming field 0 or a field above
    /// [`MAX_FIELD_NUMBER`], raises the error flag and abandons the rest of
    /// the window.
    pub fn read_tag(&mut self) -> Option<Tag> {
        if self.offset >= self.end_limit {
            return None;
        }
        match read_varint(&self.buf[..self.end_limit], &mut self.offset) {
            Some(tag) if (1..=MAX_FIELD_NUMBER as u64).contains(&(tag >> TAG_TYPE_BITS)) => {
                Some(tag)
            }
            _ => {
                self.fail(DecodeError::MalformedVarint);
                self.offset = self.end_limit;
                None
            }
        }
    }

    /// Skip the value following `tag` according to the tag's wire type.
    ///
    /// An unknown wire type or a value running past the window raises the
    /// error flag and moves to the end of the window.
    pub fn skip_field(&mut self, tag: Tag) {
        if self.skip_value(tag_wire_type(tag)).is_err() {
            self.offset = self.end_limit;
        }
    }

    // -- Internal --

    fn fail(&mut self, err: DecodeError) -> DecodeError {
        trace!(
            offset = self.offset,
            end_limit = self.end_limit,
            %err,
            "protobuf field decode failed"
        );
        self.was_decoding_error = true;
        err
    }

    fn skip_value(&mut self, wire_type: u8) -> Result<(), DecodeError> {
        match WireType::from_u8(wire_type) {
            Some(WireType::Varint) => self.read_raw_varint().map(drop),
            Some(WireType::Fixed64) => self.advance(8),
            Some(WireType::LengthDelimited) => {
                let len = self.read_length()?;
                self.advance(len)
            }
            Some(WireType::Fixed32) => self.advance(4),
            None => Err(self.fail(DecodeError::UnsupportedWireType(wire_type))),
        }
    }

    /// Validate the wire type of `tag` for a field of type `ty`. A mismatched
    /// value is skipped so the next `read_tag` lands on a tag.
    fn check_wire_type(&mut self, tag: Tag, ty: FieldType) -> Result<(), DecodeError> {
        if tag == SKIP_TAG_CHECKING {
            return Ok(());
        }
        let found = tag_wire_type(tag);
        let Some(expected) = ty.wire_type().map(|w| w as u8) else {
            return Err(self.fail(DecodeError::UnsupportedWireType(found)));
        };
        if found != expected {
            let err = self.fail(DecodeError::WireTypeMismatch { expected, found });
            self.skip_field(tag);
            return Err(err);
        }
        Ok(())
    }

    fn advance(&mut self, len: usize) -> Result<(), DecodeError> {
        if len > self.remaining() {
            return Err(self.fail(DecodeError::Truncated));
        }
        self.offset += len;
        Ok(())
    }

    fn read_raw_varint(&mut self) -> Result<u64, DecodeError> {
        match read_varint(&self.buf[..self.end_limit], &mut self.offset) {
            Some(value) => Ok(value),
            None => Err(self.fail(DecodeError::MalformedVarint)),
        }
    }

    fn read_fixed(&mut self, width: usize) -> Result<u64, DecodeError> {
        match read_little_endian(&self.buf[..self.end_limit], &mut self.offset, width) {
            Some(value) => Ok(value),
            None => Err(self.fail(DecodeError::Truncated)),
        }
    }

    /// Read a varint length prefix that must fit inside the window. A length
    /// running past the window abandons the rest of it.
    fn read_length(&mut self) -> Result<usize, DecodeError> {
        let len = self.read_raw_varint()?;
        let remaining = self.remaining();
        if len > remaining as u64 {
            let err = self.fail(DecodeError::LengthOutOfBounds { len, remaining });
            self.offset = self.end_limit;
            return Err(err);
        }
        Ok(len as usize)
    }

    fn read_varint_field(&mut self, tag: Tag, ty: FieldType) -> Result<u64, DecodeError> {
        self.check_wire_type(tag, ty)?;
        self.read_raw_varint()
    }

    fn read_fixed_field(
        &mut self,
        tag: Tag,
        ty: FieldType,
        width: usize,
    ) -> Result<u64, DecodeError> {
        self.check_wire_type(tag, ty)?;
        self.read_fixed(width)
    }

    fn read_length_delimited(&mut self, tag: Tag, ty: FieldType) -> Result<Bytes, DecodeError> {
        self.check_wire_type(tag, ty)?;
        let len = self.read_length()?;
        let start = self.offset;
        self.offset += len;
        Ok(self.buf.slice(start..self.offset))
    }

    /// Read one element for a non-packed `tag`, or every element of a packed
    /// block. The first failing element ends the read.
    fn read_repeated<T>(
        &mut self,
        tag: Tag,
        out: &mut Vec<T>,
        mut read_one: impl FnMut(&mut Self, Tag) -> Result<T, DecodeError>,
    ) -> Result<(), DecodeError> {
        if !is_packed_tag(tag) {
            out.push(read_one(self, tag)?);
            return Ok(());
        }

        let len = self.read_length()?;
        let end = self.offset + len;
        while self.offset < end {
            out.push(read_one(self, SKIP_TAG_CHECKING)?);
        }
        if self.offset > end {
            return Err(self.fail(DecodeError::PackedOverrun));
        }
        Ok(())
    }

    // -- Scalars --

    /// Read an `int32`; a 64-bit varint keeps its low 32 bits.
    pub fn read_int32(&mut self, tag: Tag) -> Result<i32, DecodeError> {
        Ok(self.read_varint_field(tag, FieldType::Int32)? as i32)
    }

    pub fn read_int64(&mut self, tag: Tag) -> Result<i64, DecodeError> {
        Ok(self.read_varint_field(tag, FieldType::Int64)? as i64)
    }

    pub fn read_uint32(&mut self, tag: Tag) -> Result<u32, DecodeError> {
        Ok(self.read_varint_field(tag, FieldType::Uint32)? as u32)
    }

    pub fn read_uint64(&mut self, tag: Tag) -> Result<u64, DecodeError> {
        self.read_varint_field(tag, FieldType::Uint64)
    }

    pub fn read_sint32(&mut self, tag: Tag) -> Result<i32, DecodeError> {
        Ok(zigzag_decode(self.read_varint_field(tag, FieldType::Sint32)?) as i32)
    }

    pub fn read_sint64(&mut self, tag: Tag) -> Result<i64, DecodeError> {
        Ok(zigzag_decode(self.read_varint_field(tag, FieldType::Sint64)?))
    }

    /// Any non-zero varint is `true`.
    pub fn read_bool(&mut self, tag: Tag) -> Result<bool, DecodeError> {
        Ok(self.read_varint_field(tag, FieldType::Bool)? != 0)
    }

    pub fn read_enum(&mut self, tag: Tag) -> Result<i32, DecodeError> {
        Ok(self.read_varint_field(tag, FieldType::Enum)? as i32)
    }

    pub fn read_fixed32(&mut self, tag: Tag) -> Result<u32, DecodeError> {
        Ok(self.read_fixed_field(tag, FieldType::Fixed32, 4)? as u32)
    }

    pub fn read_fixed64(&mut self, tag: Tag) -> Result<u64, DecodeError> {
        self.read_fixed_field(tag, FieldType::Fixed64, 8)
    }

    pub fn read_sfixed32(&mut self, tag: Tag) -> Result<i32, DecodeError> {
        Ok(self.read_fixed_field(tag, FieldType::Sfixed32, 4)? as u32 as i32)
    }

    pub fn read_sfixed64(&mut self, tag: Tag) -> Result<i64, DecodeError> {
        Ok(self.read_fixed_field(tag, FieldType::Sfixed64, 8)? as i64)
    }

    pub fn read_float(&mut self, tag: Tag) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(self.read_fixed_field(tag, FieldType::Float, 4)? as u32))
    }

    pub fn read_double(&mut self, tag: Tag) -> Result<f64, DecodeError> {
        Ok(f64::from_bits(self.read_fixed_field(tag, FieldType::Double, 8)?))
    }

    // -- Length-delimited --

    pub fn read_string(&mut self, tag: Tag) -> Result<String, DecodeError> {
        let raw = self.read_length_delimited(tag, FieldType::String)?;
        match String::from_utf8(raw.to_vec()) {
            Ok(value) => Ok(value),
            Err(_) => Err(self.fail(DecodeError::InvalidUtf8)),
        }
    }

    /// Read a `bytes` field as a slice of the input buffer.
    pub fn read_bytes(&mut self, tag: Tag) -> Result<Bytes, DecodeError> {
        self.read_length_delimited(tag, FieldType::Bytes)
    }

    /// Decode a nested message into `message`.
    ///
    /// The nested decoder is bounded by the declared length; afterwards this
    /// decoder resumes right after the nested bytes regardless of how far the
    /// nested decode got. Nested failures raise this decoder's flag too.
    pub fn read_message<M: Message + ?Sized>(
        &mut self,
        tag: Tag,
        message: &mut M,
    ) -> Result<(), DecodeError> {
        self.check_wire_type(tag, FieldType::Message)?;
        let len = self.read_length()?;

        let mut nested = Decoder {
            buf: self.buf.clone(),
            offset: self.offset,
            end_limit: self.offset + len,
            was_decoding_error: false,
        };
        message.decode(&mut nested);
        self.offset = nested.end_limit;

        if nested.was_decoding_error {
            self.was_decoding_error = true;
            return Err(DecodeError::FieldErrors);
        }
        Ok(())
    }

    // -- Repeated --

    pub fn read_int32_repeated(&mut self, tag: Tag, out: &mut Vec<i32>) -> Result<(), DecodeError> {
        self.read_repeated(tag, out, Self::read_int32)
    }

    pub fn read_int64_repeated(&mut self, tag: Tag, out: &mut Vec<i64>) -> Result<(), DecodeError> {
        self.read_repeated(tag, out, Self::read_int64)
    }

    pub fn read_uint32_repeated(
        &mut self,
        tag: Tag,
        out: &mut Vec<u32>,
    ) -> Result<(), DecodeError> {
        self.read_repeated(tag, out, Self::read_uint32)
    }

    pub fn read_uint64_repeated(
        &mut self,
        tag: Tag,
        out: &mut Vec<u64>,
    ) -> Result<(), DecodeError> {
        self.read_repeated(tag, out, Self::read_uint64)
    }

    pub fn read_sint32_repeated(
        &mut self,
        tag: Tag,
        out: &mut Vec<i32>,
    ) -> Result<(), DecodeError> {
        self.read_repeated(tag, out, Self::read_sint32)
    }

    pub fn read_sint64_repeated(
        &mut self,
        tag: Tag,
        out: &mut Vec<i64>,
    ) -> Result<(), DecodeError> {
        self.read_repeated(tag, out, Self::read_sint64)
    }

    pub fn read_bool_repeated(&mut self, tag: Tag, out: &mut Vec<bool>) -> Result<(), DecodeError> {
        self.read_repeated(tag, out, Self::read_bool)
    }

    pub fn read_enum_repeated(&mut self, tag: Tag, out: &mut Vec<i32>) -> Result<(), DecodeError> {
        self.read_repeated(tag, out, Self::read_enum)
    }

    pub fn read_fixed32_repeated(
        &mut self,
        tag: Tag,
        out: &mut Vec<u32>,
    ) -> Result<(), DecodeError> {
        self.read_repeated(tag, out, Self::read_fixed32)
    }

    pub fn read_fixed64_repeated(
        &mut self,
        tag: Tag,
        out: &mut Vec<u64>,
    ) -> Result<(), DecodeError> {
        self.read_repeated(tag, out, Self::read_fixed64)
    }

    pub fn read_sfixed32_repeated(
        &mut self,
        tag: Tag,
        out: &mut Vec<i32>,
    ) -> Result<(), DecodeError> {
        self.read_repeated(tag, out, Self::read_sfixed32)
    }

    pub fn read_sfixed64_repeated(
        &mut self,
        tag: Tag,
        out: &mut Vec<i64>,
    ) -> Result<(), DecodeError> {
        self.read_repeated(tag, out, Self::read_sfixed64)
    }

    pub fn read_float_repeated(&mut self, tag: Tag, out: &mut Vec<f32>) -> Result<(), DecodeError> {
        self.read_repeated(tag, out, Self::read_float)
    }

    pub fn read_double_repeated(
        &mut self,
        tag: Tag,
        out: &mut Vec<f64>,
    ) -> Result<(), DecodeError> {
        self.read_repeated(tag, out, Self::read_double)
    }

    /// Strings are never packed: each occurrence carries one element.
    pub fn read_string_repeated(
        &mut self,
        tag: Tag,
        out: &mut Vec<String>,
    ) -> Result<(), DecodeError> {
        out.push(self.read_string(tag)?);
        Ok(())
    }

    pub fn read_bytes_repeated(
        &mut self,
        tag: Tag,
        out: &mut Vec<Bytes>,
    ) -> Result<(), DecodeError> {
        out.push(self.read_bytes(tag)?);
        Ok(())
    }

    /// Decode one occurrence of a repeated message field into a new element.
    ///
    /// The element is kept even when its decode fails part way.
    pub fn read_message_repeated<M: Message + Default>(
        &mut self,
        tag: Tag,
        out: &mut Vec<M>,
    ) -> Result<(), DecodeError> {
        let mut message = M::default();
        let result = self.read_message(tag, &mut message);
        out.push(message);
        result
    }
}
