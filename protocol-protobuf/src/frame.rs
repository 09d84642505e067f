//! gRPC length-prefixed message framing.
//!
//! Format: 1 byte compress flag (0 = uncompressed) + 4 byte big-endian length + payload.

/// Size of the frame prefix.
pub const FRAME_HEADER_LEN: usize = 5;

/// Compress flag value for an uncompressed payload (the only one supported).
pub const FLAG_UNCOMPRESSED: u8 = 0;

/// Parsed 5-byte frame prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub compressed: u8,
    pub length: u32,
}

impl FrameHeader {
    /// Total size of the frame this header announces.
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }
}

/// Overwrite the length field of a frame whose prefix occupies `buf[..5]`.
pub fn patch_length(buf: &mut [u8], payload_len: usize) {
    buf[0] = FLAG_UNCOMPRESSED;
    buf[1..FRAME_HEADER_LEN].copy_from_slice(&(payload_len as u32).to_be_bytes());
}

/// Parse the prefix at the front of `buf`. Returns `None` when fewer than 5 bytes are present.
pub fn read_header(buf: &[u8]) -> Option<FrameHeader> {
    if buf.len() < FRAME_HEADER_LEN {
        return None;
    }
    Some(FrameHeader {
        compressed: buf[0],
        length: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_then_read_header() {
        let mut buf = vec![0xFF; FRAME_HEADER_LEN];
        buf.extend_from_slice(b"hello grpc");
        patch_length(&mut buf, 10);

        let header = read_header(&buf).unwrap();
        assert_eq!(header.compressed, FLAG_UNCOMPRESSED);
        assert_eq!(header.length, 10);
        assert_eq!(header.frame_len(), buf.len());
    }

    #[test]
    fn read_header_short() {
        assert!(read_header(&[]).is_none());
        assert!(read_header(&[0, 0, 0, 0]).is_none());
    }

    #[test]
    fn read_header_keeps_compress_flag() {
        let header = read_header(&[1, 0, 0, 0, 3, b'a']).unwrap();
        assert_eq!(header.compressed, 1);
        assert_eq!(header.frame_len(), 8);
    }

    #[test]
    fn patch_length_big_endian() {
        let mut buf = vec![0xFF; 5];
        patch_length(&mut buf, 0x0102_0304);
        assert_eq!(buf, [0, 1, 2, 3, 4]);
    }
}
