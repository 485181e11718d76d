//! WAL on-disk framing.
//!
//! File layout:
//! - header (8 bytes): magic `b"LWAL"` + page size as u32
//! - page frame: page id (8 bytes) + one full page image
//! - commit record: sentinel id `u64::MAX` + frame count (4 bytes) +
//!   CRC32 (4 bytes) over every frame byte appended since the previous
//!   commit record
//!
//! There is no rollback record: an aborted transaction is erased by
//! truncating the file back to where it began.

use bytes::{Buf, BufMut, BytesMut};
use loam_common::{LoamError, PageId, Result};

/// Magic bytes at the start of every WAL file.
pub const WAL_MAGIC: &[u8; 4] = b"LWAL";

/// Size of the WAL file header: magic + page size.
pub const WAL_HEADER_SIZE: usize = 8;

/// Size of the page id prefixing each page frame.
pub const FRAME_ID_SIZE: usize = 8;

/// Size of a commit record: sentinel id + frame count + CRC32.
pub const COMMIT_RECORD_SIZE: usize = 16;

/// Encodes the WAL file header.
pub fn encode_header(page_size: u32) -> [u8; WAL_HEADER_SIZE] {
    let mut buf = [0u8; WAL_HEADER_SIZE];
    buf[..4].copy_from_slice(WAL_MAGIC);
    buf[4..].copy_from_slice(&page_size.to_le_bytes());
    buf
}

/// Decodes and validates the WAL file header, returning the page size.
pub fn decode_header(data: &[u8]) -> Result<u32> {
    if data.len() < WAL_HEADER_SIZE {
        return Err(LoamError::CorruptWal("file shorter than header".to_string()));
    }
    if &data[..4] != WAL_MAGIC {
        return Err(LoamError::CorruptWal("bad magic".to_string()));
    }
    Ok(u32::from_le_bytes([data[4], data[5], data[6], data[7]]))
}

/// Encodes one page frame: id followed by the page image.
pub fn encode_page_frame(page: PageId, image: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(FRAME_ID_SIZE + image.len());
    buf.put_u64_le(page.0);
    buf.put_slice(image);
    buf
}

/// Encodes a commit record for a transaction of `frame_count` frames.
pub fn encode_commit(frame_count: u32, crc: u32) -> [u8; COMMIT_RECORD_SIZE] {
    let mut buf = [0u8; COMMIT_RECORD_SIZE];
    buf[..8].copy_from_slice(&PageId::COMMIT_SENTINEL.0.to_le_bytes());
    buf[8..12].copy_from_slice(&frame_count.to_le_bytes());
    buf[12..].copy_from_slice(&crc.to_le_bytes());
    buf
}

/// Decodes the tail of a commit record (after the sentinel id).
pub fn decode_commit_tail(mut data: &[u8]) -> (u32, u32) {
    let frame_count = data.get_u32_le();
    let crc = data.get_u32_le();
    (frame_count, crc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let encoded = encode_header(4096);
        assert_eq!(decode_header(&encoded).unwrap(), 4096);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut encoded = encode_header(4096);
        encoded[0] = b'X';
        assert!(matches!(
            decode_header(&encoded),
            Err(LoamError::CorruptWal(_))
        ));
    }

    #[test]
    fn test_header_rejects_short_input() {
        assert!(decode_header(&[0u8; 3]).is_err());
    }

    #[test]
    fn test_page_frame_layout() {
        let image = vec![0xAB; 64];
        let frame = encode_page_frame(PageId(7), &image);
        assert_eq!(frame.len(), FRAME_ID_SIZE + 64);
        assert_eq!(u64::from_le_bytes(frame[..8].try_into().unwrap()), 7);
        assert_eq!(&frame[8..], &image[..]);
    }

    #[test]
    fn test_commit_record_roundtrip() {
        let record = encode_commit(3, 0xDEADBEEF);
        assert_eq!(
            u64::from_le_bytes(record[..8].try_into().unwrap()),
            u64::MAX
        );
        let (count, crc) = decode_commit_tail(&record[8..]);
        assert_eq!(count, 3);
        assert_eq!(crc, 0xDEADBEEF);
    }
}
