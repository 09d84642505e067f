//! Logical field types, wire types and tag packing.

/// Number of low bits of a tag holding the wire type.
pub const TAG_TYPE_BITS: u32 = 3;

/// Largest field number a message may declare.
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// A field tag: `field_number << 3 | wire_type`, as read from or written to the wire.
pub type Tag = u64;

/// Wire type for varint (int32, int64, uint32, uint64, sint32, sint64, bool, enum).
pub const WIRE_TYPE_VARINT: u8 = 0;
/// Wire type for 64-bit fixed (fixed64, sfixed64, double).
pub const WIRE_TYPE_FIXED64: u8 = 1;
/// Wire type for length-delimited (string, bytes, embedded messages, packed repeated).
pub const WIRE_TYPE_LEN: u8 = 2;
/// Wire type for 32-bit fixed (fixed32, sfixed32, float).
pub const WIRE_TYPE_FIXED32: u8 = 5;

/// The four wire types used by proto3 encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    Varint = WIRE_TYPE_VARINT,
    Fixed64 = WIRE_TYPE_FIXED64,
    LengthDelimited = WIRE_TYPE_LEN,
    Fixed32 = WIRE_TYPE_FIXED32,
}

impl WireType {
    /// Parse a wire type from its 3-bit code. Groups (3, 4) and reserved codes yield `None`.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            WIRE_TYPE_VARINT => Some(Self::Varint),
            WIRE_TYPE_FIXED64 => Some(Self::Fixed64),
            WIRE_TYPE_LEN => Some(Self::LengthDelimited),
            WIRE_TYPE_FIXED32 => Some(Self::Fixed32),
            _ => None,
        }
    }
}

/// How a writer decides whether a field goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Skipped when equal to the type's zero value unless the caller forces it.
    ElideDefault,
    /// Written whenever a value is present; absence is written only when forced.
    Explicit,
}

/// Logical protobuf field types, numbered as in `descriptor.proto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Double = 1,
    Float = 2,
    Int64 = 3,
    Uint64 = 4,
    Int32 = 5,
    Fixed64 = 6,
    Fixed32 = 7,
    Bool = 8,
    String = 9,
    Group = 10,
    Message = 11,
    Bytes = 12,
    Uint32 = 13,
    Enum = 14,
    Sfixed32 = 15,
    Sfixed64 = 16,
    Sint32 = 17,
    Sint64 = 18,
}

impl FieldType {
    /// Wire type implied by this field type. Groups have none.
    pub const fn wire_type(self) -> Option<WireType> {
        match self {
            Self::Int64
            | Self::Uint64
            | Self::Int32
            | Self::Bool
            | Self::Uint32
            | Self::Enum
            | Self::Sint32
            | Self::Sint64 => Some(WireType::Varint),
            Self::Double | Self::Fixed64 | Self::Sfixed64 => Some(WireType::Fixed64),
            Self::Float | Self::Fixed32 | Self::Sfixed32 => Some(WireType::Fixed32),
            Self::String | Self::Message | Self::Bytes => Some(WireType::LengthDelimited),
            Self::Group => None,
        }
    }

    /// Presence policy applied by the encoder for this field type.
    pub const fn presence(self) -> Presence {
        match self {
            Self::Message | Self::Group => Presence::Explicit,
            _ => Presence::ElideDefault,
        }
    }
}

/// Build the tag for `field_number` holding a value of `field_type`.
#[inline]
pub fn make_tag(field_number: u32, field_type: FieldType) -> Tag {
    let wire = field_type.wire_type().map_or(0, |w| w as u64);
    ((field_number as u64) << TAG_TYPE_BITS) | wire
}

/// Build the tag for a packed repeated block of `field_number`.
#[inline]
pub fn make_packed_tag(field_number: u32) -> Tag {
    ((field_number as u64) << TAG_TYPE_BITS) | WIRE_TYPE_LEN as u64
}

/// Field number carried by `tag`.
#[inline]
pub fn tag_field_number(tag: Tag) -> u32 {
    (tag >> TAG_TYPE_BITS) as u32
}

/// Raw 3-bit wire type code carried by `tag`.
#[inline]
pub fn tag_wire_type(tag: Tag) -> u8 {
    (tag & 0x07) as u8
}

/// Whether `tag` announces a length-delimited block (a packed repeated field
/// when the field type itself is a scalar).
#[inline]
pub fn is_packed_tag(tag: Tag) -> bool {
    tag_wire_type(tag) == WIRE_TYPE_LEN
}
