//! Page identifiers and the common page header.
//!
//! Every page starts with a fixed 24-byte header:
//!
//! ```text
//! offset 0   page_id   u32
//! offset 4   kind      u8
//! offset 5   flags     u8
//! offset 6   reserved  u16
//! offset 8   checksum  u32   crc32 of the page body
//! offset 12  lsn       u64   WAL position of the last writer
//! offset 20  next_page u32   intra-chain link (0 = none)
//! ```
//!
//! The checksum covers everything after the header and is recomputed by the
//! page store on write and verified on read.

pub mod heap_page;

use crate::error::{DbError, DbResult};

pub use heap_page::HeapPage;

/// Size of the common page header in bytes.
pub const PAGE_HEADER_SIZE: usize = 24;

const KIND_OFFSET: usize = 4;
const CHECKSUM_OFFSET: usize = 8;
const LSN_OFFSET: usize = 12;
const NEXT_PAGE_OFFSET: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Sentinel meaning "no page". Page 0 is the meta page and never a link
    /// target, so 0 is free to act as the null link.
    pub const INVALID: PageId = PageId(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page {}", self.0)
    }
}

/// Discriminates what a page body holds.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Meta = 0,
    Heap = 1,
    BTreeLeaf = 2,
    BTreeInternal = 3,
    Free = 4,
}

impl PageKind {
    pub fn from_u8(value: u8) -> DbResult<Self> {
        match value {
            0 => Ok(PageKind::Meta),
            1 => Ok(PageKind::Heap),
            2 => Ok(PageKind::BTreeLeaf),
            3 => Ok(PageKind::BTreeInternal),
            4 => Ok(PageKind::Free),
            other => Err(DbError::Corruption(format!("unknown page kind {}", other))),
        }
    }
}

/// Writes the fixed header fields into a fresh page buffer.
pub fn init_page(data: &mut [u8], page_id: PageId, kind: PageKind) {
    data[..PAGE_HEADER_SIZE].fill(0);
    data[0..4].copy_from_slice(&page_id.0.to_le_bytes());
    data[KIND_OFFSET] = kind as u8;
}

pub fn page_id_of(data: &[u8]) -> PageId {
    PageId(u32::from_le_bytes(data[0..4].try_into().unwrap()))
}

pub fn kind_of(data: &[u8]) -> DbResult<PageKind> {
    PageKind::from_u8(data[KIND_OFFSET])
}

pub fn lsn_of(data: &[u8]) -> u64 {
    u64::from_le_bytes(data[LSN_OFFSET..LSN_OFFSET + 8].try_into().unwrap())
}

pub fn set_lsn(data: &mut [u8], lsn: u64) {
    data[LSN_OFFSET..LSN_OFFSET + 8].copy_from_slice(&lsn.to_le_bytes());
}

pub fn next_page_of(data: &[u8]) -> PageId {
    PageId(u32::from_le_bytes(
        data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4].try_into().unwrap(),
    ))
}

pub fn set_next_page(data: &mut [u8], next: PageId) {
    data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4].copy_from_slice(&next.0.to_le_bytes());
}

/// Recomputes and stores the body checksum. Called by the page store on
/// every write so in-memory mutation never has to keep it current.
pub fn seal_checksum(data: &mut [u8]) {
    let crc = crc32fast::hash(&data[PAGE_HEADER_SIZE..]);
    data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
}

/// Verifies the stored body checksum against the body contents.
pub fn verify_checksum(data: &[u8]) -> DbResult<()> {
    let stored = u32::from_le_bytes(data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].try_into().unwrap());
    let actual = crc32fast::hash(&data[PAGE_HEADER_SIZE..]);
    if stored != actual {
        let id = page_id_of(data);
        return Err(DbError::Corruption(format!(
            "checksum mismatch on {}: stored {:#010x}, computed {:#010x}",
            id, stored, actual
        )));
    }
    Ok(())
}
