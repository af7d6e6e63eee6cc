//! Tuple addressing and the on-disk row image.
//!
//! A stored row is framed as `[row_id: u64][commit_ts: u64][values]`; the
//! values part is the codec from `access::value`. Row images in WAL records
//! carry only the values part, since the record itself names the row id and
//! the commit record names the timestamp.

use crate::error::{DbError, DbResult};
use crate::storage::page::PageId;

/// Physical address of a tuple: page plus slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TupleId {
    pub page_id: PageId,
    pub slot: u16,
}

impl TupleId {
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }
}

impl std::fmt::Display for TupleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, slot {})", self.page_id, self.slot)
    }
}

const ROW_HEADER: usize = 16;

/// A decoded row frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RowImage {
    pub row_id: u64,
    pub commit_ts: u64,
    pub values: Vec<u8>,
}

impl RowImage {
    pub fn encode(row_id: u64, commit_ts: u64, values: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(ROW_HEADER + values.len());
        out.extend_from_slice(&row_id.to_le_bytes());
        out.extend_from_slice(&commit_ts.to_le_bytes());
        out.extend_from_slice(values);
        out
    }

    pub fn decode(bytes: &[u8]) -> DbResult<RowImage> {
        if bytes.len() < ROW_HEADER {
            return Err(DbError::Corruption("row frame shorter than header".into()));
        }
        Ok(RowImage {
            row_id: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            commit_ts: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            values: bytes[ROW_HEADER..].to_vec(),
        })
    }

    /// Reads just the row id without decoding the rest.
    pub fn peek_row_id(bytes: &[u8]) -> DbResult<u64> {
        if bytes.len() < 8 {
            return Err(DbError::Corruption("row frame shorter than header".into()));
        }
        Ok(u64::from_le_bytes(bytes[0..8].try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_image_round_trip() -> DbResult<()> {
        let bytes = RowImage::encode(42, 7, b"payload");
        let image = RowImage::decode(&bytes)?;
        assert_eq!(image.row_id, 42);
        assert_eq!(image.commit_ts, 7);
        assert_eq!(image.values, b"payload");
        assert_eq!(RowImage::peek_row_id(&bytes)?, 42);
        Ok(())
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(RowImage::decode(&[1, 2, 3]).is_err());
    }
}
