//! Slotted heap page layout.
//!
//! Body layout after the common header: a 4-byte sub-header
//! (`free_space_pointer: u16`, `tuple_count: u16`), tuple bytes growing
//! upward from the sub-header, and a slot array (4 bytes per slot:
//! offset + length) growing downward from the end of the page. A slot of
//! `(0, 0)` marks a deleted tuple; slots are never reordered so a slot id
//! stays stable for the lifetime of the tuple.

use crate::error::{DbError, DbResult};
use crate::storage::page::{self, PageId, PageKind, PAGE_HEADER_SIZE};

const SUB_HEADER_SIZE: usize = 4;
const FREE_PTR_OFFSET: usize = PAGE_HEADER_SIZE;
const TUPLE_COUNT_OFFSET: usize = PAGE_HEADER_SIZE + 2;
const SLOT_SIZE: usize = 4;

pub struct HeapPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeapPage<'a> {
    /// Formats a fresh page as an empty heap page.
    pub fn init(data: &'a mut [u8], page_id: PageId) -> Self {
        page::init_page(data, page_id, PageKind::Heap);
        let free_ptr = (PAGE_HEADER_SIZE + SUB_HEADER_SIZE) as u16;
        data[FREE_PTR_OFFSET..FREE_PTR_OFFSET + 2].copy_from_slice(&free_ptr.to_le_bytes());
        data[TUPLE_COUNT_OFFSET..TUPLE_COUNT_OFFSET + 2].copy_from_slice(&0u16.to_le_bytes());
        Self { data }
    }

    /// Wraps an already-formatted page.
    pub fn from_data(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    /// Space a tuple of `len` bytes consumes, slot entry included.
    pub fn required_space_for(len: usize) -> usize {
        len + SLOT_SIZE
    }

    pub fn insert_tuple(&mut self, tuple: &[u8]) -> DbResult<u16> {
        if tuple.len() > u16::MAX as usize {
            return Err(DbError::InvalidArgument(format!(
                "tuple of {} bytes exceeds the slot length limit",
                tuple.len()
            )));
        }
        if self.free_space() < Self::required_space_for(tuple.len()) {
            return Err(DbError::Capacity(format!(
                "heap page full: need {} bytes, {} free",
                Self::required_space_for(tuple.len()),
                self.free_space()
            )));
        }

        let offset = self.free_space_pointer();
        self.data[offset as usize..offset as usize + tuple.len()].copy_from_slice(tuple);
        self.set_free_space_pointer(offset + tuple.len() as u16);

        let count = self.tuple_count();
        let slot = self.slot_offset(count);
        self.data[slot..slot + 2].copy_from_slice(&offset.to_le_bytes());
        self.data[slot + 2..slot + 4].copy_from_slice(&(tuple.len() as u16).to_le_bytes());
        self.set_tuple_count(count + 1);

        Ok(count)
    }

    /// Returns the tuple bytes, or `None` when the slot was deleted.
    pub fn get_tuple(&self, slot_id: u16) -> DbResult<Option<&[u8]>> {
        if slot_id >= self.tuple_count() {
            return Err(DbError::NotFound(format!(
                "slot {} out of range (page has {})",
                slot_id,
                self.tuple_count()
            )));
        }
        let (offset, len) = self.slot_entry(slot_id);
        if offset == 0 && len == 0 {
            return Ok(None);
        }
        Ok(Some(&self.data[offset as usize..(offset + len) as usize]))
    }

    pub fn delete_tuple(&mut self, slot_id: u16) -> DbResult<()> {
        if slot_id >= self.tuple_count() {
            return Err(DbError::NotFound(format!(
                "slot {} out of range (page has {})",
                slot_id,
                self.tuple_count()
            )));
        }
        let slot = self.slot_offset(slot_id);
        self.data[slot..slot + SLOT_SIZE].fill(0);
        Ok(())
    }

    pub fn tuple_count(&self) -> u16 {
        u16::from_le_bytes(
            self.data[TUPLE_COUNT_OFFSET..TUPLE_COUNT_OFFSET + 2]
                .try_into()
                .unwrap(),
        )
    }

    /// Bytes still available between tuple data and the slot array.
    pub fn free_space(&self) -> usize {
        let slot_array_start = self.data.len() - self.tuple_count() as usize * SLOT_SIZE;
        slot_array_start.saturating_sub(self.free_space_pointer() as usize)
    }

    pub fn page_id(&self) -> PageId {
        page::page_id_of(self.data)
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        let next = page::next_page_of(self.data);
        next.is_valid().then_some(next)
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        page::set_next_page(self.data, next);
    }

    fn slot_offset(&self, slot_id: u16) -> usize {
        self.data.len() - (slot_id as usize + 1) * SLOT_SIZE
    }

    fn slot_entry(&self, slot_id: u16) -> (u16, u16) {
        let slot = self.slot_offset(slot_id);
        let offset = u16::from_le_bytes(self.data[slot..slot + 2].try_into().unwrap());
        let len = u16::from_le_bytes(self.data[slot + 2..slot + 4].try_into().unwrap());
        (offset, len)
    }

    fn free_space_pointer(&self) -> u16 {
        u16::from_le_bytes(
            self.data[FREE_PTR_OFFSET..FREE_PTR_OFFSET + 2]
                .try_into()
                .unwrap(),
        )
    }

    fn set_free_space_pointer(&mut self, ptr: u16) {
        self.data[FREE_PTR_OFFSET..FREE_PTR_OFFSET + 2].copy_from_slice(&ptr.to_le_bytes());
    }

    fn set_tuple_count(&mut self, count: u16) {
        self.data[TUPLE_COUNT_OFFSET..TUPLE_COUNT_OFFSET + 2].copy_from_slice(&count.to_le_bytes());
    }
}

/// Read-only views over an immutable page buffer, for scan paths that hold a
/// shared guard.
pub mod view {
    use super::*;

    pub fn tuple_count(data: &[u8]) -> u16 {
        u16::from_le_bytes(
            data[TUPLE_COUNT_OFFSET..TUPLE_COUNT_OFFSET + 2]
                .try_into()
                .unwrap(),
        )
    }

    pub fn get_tuple(data: &[u8], slot_id: u16) -> DbResult<Option<&[u8]>> {
        if slot_id >= tuple_count(data) {
            return Err(DbError::NotFound(format!(
                "slot {} out of range (page has {})",
                slot_id,
                tuple_count(data)
            )));
        }
        let slot = data.len() - (slot_id as usize + 1) * SLOT_SIZE;
        let offset = u16::from_le_bytes(data[slot..slot + 2].try_into().unwrap());
        let len = u16::from_le_bytes(data[slot + 2..slot + 4].try_into().unwrap());
        if offset == 0 && len == 0 {
            return Ok(None);
        }
        Ok(Some(&data[offset as usize..(offset + len) as usize]))
    }

    pub fn next_page_id(data: &[u8]) -> Option<PageId> {
        let next = page::next_page_of(data);
        next.is_valid().then_some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_SIZE: usize = 1024;

    #[test]
    fn test_init_and_insert() -> DbResult<()> {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut p = HeapPage::init(&mut data, PageId(3));

        let s0 = p.insert_tuple(b"first")?;
        let s1 = p.insert_tuple(b"second tuple")?;
        assert_eq!((s0, s1), (0, 1));
        assert_eq!(p.get_tuple(0)?, Some(&b"first"[..]));
        assert_eq!(p.get_tuple(1)?, Some(&b"second tuple"[..]));
        assert_eq!(p.tuple_count(), 2);
        assert_eq!(p.page_id(), PageId(3));
        Ok(())
    }

    #[test]
    fn test_delete_marks_slot() -> DbResult<()> {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut p = HeapPage::init(&mut data, PageId(1));
        let slot = p.insert_tuple(b"doomed")?;
        p.delete_tuple(slot)?;
        assert_eq!(p.get_tuple(slot)?, None);
        // Slot ids after a delete stay stable.
        let slot2 = p.insert_tuple(b"alive")?;
        assert_eq!(slot2, 1);
        assert_eq!(p.get_tuple(slot2)?, Some(&b"alive"[..]));
        Ok(())
    }

    #[test]
    fn test_page_full() -> DbResult<()> {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut p = HeapPage::init(&mut data, PageId(1));
        let big = vec![0xAA; 200];
        let mut inserted = 0;
        while p.free_space() >= HeapPage::required_space_for(big.len()) {
            p.insert_tuple(&big)?;
            inserted += 1;
        }
        assert!(inserted > 0);
        assert!(matches!(p.insert_tuple(&big), Err(DbError::Capacity(_))));
        Ok(())
    }

    #[test]
    fn test_out_of_range_slot() {
        let mut data = vec![0u8; PAGE_SIZE];
        let p = HeapPage::init(&mut data, PageId(1));
        assert!(p.get_tuple(0).is_err());
    }

    #[test]
    fn test_next_page_link() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut p = HeapPage::init(&mut data, PageId(1));
        assert_eq!(p.next_page_id(), None);
        p.set_next_page_id(PageId(9));
        assert_eq!(p.next_page_id(), Some(PageId(9)));
    }
}
