//! Low-level protobuf wire primitives.
//!
//! Stateless helpers for base-128 varints, zig-zag signed integers,
//! little-endian fixed-width integers and bounded raw slices. Readers take
//! the buffer plus a mutable offset and only advance the offset on success.

/// Maximum encoded size of a 64-bit varint.
pub const MAX_VARINT_BYTES: usize = 10;

/// Append `value` as a base-128 varint.
///
/// Signed values are written through their two's-complement `u64`
/// representation, so negative numbers always take ten bytes.
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Number of bytes `value` occupies when varint-encoded.
pub fn varint_len(value: u64) -> usize {
    // ceil(significant_bits / 7), with zero taking one byte.
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Read a varint starting at `*offset`.
///
/// Returns `None` if the varint runs past the end of `buf` or is longer than
/// [`MAX_VARINT_BYTES`]. `*offset` is left untouched on failure.
pub fn read_varint(buf: &[u8], offset: &mut usize) -> Option<u64> {
    let mut pos = *offset;
    let mut result: u64 = 0;

    for count in 0..MAX_VARINT_BYTES {
        let byte = *buf.get(pos)?;
        pos += 1;
        result |= ((byte & 0x7F) as u64) << (7 * count);
        if byte & 0x80 == 0 {
            *offset = pos;
            return Some(result);
        }
    }
    None
}

/// Append a varint length prefix followed by `bytes`.
pub fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Append the low `width` bytes of `value` in little-endian order.
pub fn write_little_endian(buf: &mut Vec<u8>, value: u64, width: usize) {
    debug_assert!(width == 4 || width == 8);
    buf.extend_from_slice(&value.to_le_bytes()[..width]);
}

/// Read a `width`-byte little-endian integer (4 or 8) at `*offset`.
pub fn read_little_endian(buf: &[u8], offset: &mut usize, width: usize) -> Option<u64> {
    let raw = read_raw(buf, offset, width)?;
    let mut bytes = [0u8; 8];
    bytes[..width].copy_from_slice(raw);
    Some(u64::from_le_bytes(bytes))
}

/// Extract `size` bytes at `*offset`. Fails on zero size or overrun.
pub fn read_raw<'a>(buf: &'a [u8], offset: &mut usize, size: usize) -> Option<&'a [u8]> {
    if size == 0 {
        return None;
    }
    let end = offset.checked_add(size)?;
    let raw = buf.get(*offset..end)?;
    *offset = end;
    Some(raw)
}

/// Map a signed integer onto an unsigned one so small magnitudes stay small.
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
