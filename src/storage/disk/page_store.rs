//! Page-granular file storage with a free list.
//!
//! The store owns a single data file of fixed-size pages. Page 0 is the meta
//! page: it records the magic, the page size the file was created with, the
//! free-list head and the page count. Released pages are threaded onto the
//! free list through their `next_page` header field and handed out again by
//! `allocate_page`, so dropping a table does not grow the file.
//!
//! Checksums are sealed here on every write and verified on every read;
//! a mismatch surfaces as `DbError::Corruption` and is left to the caller
//! (recovery can re-derive a page from the WAL, everyone else treats it as
//! fatal).

use crate::error::{DbError, DbResult};
use crate::storage::page::{self, PageId, PageKind, PAGE_HEADER_SIZE};
use crate::storage::MIN_PAGE_SIZE;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const MAGIC: u32 = 0x504C_5944; // "PLYD"
const FORMAT_VERSION: u16 = 1;

const META_MAGIC_OFFSET: usize = PAGE_HEADER_SIZE;
const META_VERSION_OFFSET: usize = PAGE_HEADER_SIZE + 4;
const META_PAGE_SIZE_OFFSET: usize = PAGE_HEADER_SIZE + 6;
const META_FREE_HEAD_OFFSET: usize = PAGE_HEADER_SIZE + 10;
const META_PAGE_COUNT_OFFSET: usize = PAGE_HEADER_SIZE + 14;

pub struct PageStore {
    file: File,
    page_size: usize,
    free_head: PageId,
    page_count: u32,
}

impl PageStore {
    /// Creates a new page file with the given page size and an initialized
    /// meta page.
    pub fn create(path: &Path, page_size: usize) -> DbResult<Self> {
        if page_size < MIN_PAGE_SIZE || !page_size.is_power_of_two() {
            return Err(DbError::InvalidArgument(format!(
                "page size {} must be a power of two >= {}",
                page_size, MIN_PAGE_SIZE
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut store = Self {
            file,
            page_size,
            free_head: PageId::INVALID,
            page_count: 1,
        };
        store.persist_meta()?;
        Ok(store)
    }

    /// Opens an existing page file, validating the meta page.
    pub fn open(path: &Path) -> DbResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        // The meta page must be read before we know the page size; probe the
        // smallest legal size first, then re-read at the recorded size.
        let mut probe = vec![0u8; MIN_PAGE_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut probe)?;
        let magic = u32::from_le_bytes(probe[META_MAGIC_OFFSET..META_MAGIC_OFFSET + 4].try_into().unwrap());
        if magic != MAGIC {
            return Err(DbError::Corruption(
                "data file has no valid meta page".into(),
            ));
        }
        let version = u16::from_le_bytes(
            probe[META_VERSION_OFFSET..META_VERSION_OFFSET + 2].try_into().unwrap(),
        );
        if version != FORMAT_VERSION {
            return Err(DbError::Corruption(format!(
                "unsupported data file format version {}",
                version
            )));
        }
        let page_size = u32::from_le_bytes(
            probe[META_PAGE_SIZE_OFFSET..META_PAGE_SIZE_OFFSET + 4].try_into().unwrap(),
        ) as usize;

        let mut meta = vec![0u8; page_size];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut meta)?;
        page::verify_checksum(&meta)?;

        let free_head = PageId(u32::from_le_bytes(
            meta[META_FREE_HEAD_OFFSET..META_FREE_HEAD_OFFSET + 4].try_into().unwrap(),
        ));
        let page_count = u32::from_le_bytes(
            meta[META_PAGE_COUNT_OFFSET..META_PAGE_COUNT_OFFSET + 4].try_into().unwrap(),
        );

        Ok(Self {
            file,
            page_size,
            free_head,
            page_count,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Reads a page into `buf`, verifying its checksum.
    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> DbResult<()> {
        self.check_buf(buf.len())?;
        if page_id.0 >= self.page_count {
            return Err(DbError::NotFound(format!("{} does not exist", page_id)));
        }
        self.file.seek(SeekFrom::Start(self.offset_of(page_id)))?;
        self.file.read_exact(buf)?;
        page::verify_checksum(buf)?;
        Ok(())
    }

    /// Seals the checksum and writes the page. Durability is deferred to
    /// `sync`; the WAL covers anything written between syncs.
    pub fn write_page(&mut self, page_id: PageId, buf: &mut [u8]) -> DbResult<()> {
        self.check_buf(buf.len())?;
        if page_id.0 >= self.page_count {
            return Err(DbError::NotFound(format!(
                "{} was never allocated",
                page_id
            )));
        }
        page::seal_checksum(buf);
        self.file.seek(SeekFrom::Start(self.offset_of(page_id)))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Pops the free list, or extends the file by one page.
    pub fn allocate_page(&mut self) -> DbResult<PageId> {
        if self.free_head.is_valid() {
            let id = self.free_head;
            let mut buf = vec![0u8; self.page_size];
            self.read_page(id, &mut buf)?;
            self.free_head = page::next_page_of(&buf);
            self.persist_meta()?;
            return Ok(id);
        }

        let id = PageId(self.page_count);
        self.page_count += 1;
        self.file
            .set_len(self.page_count as u64 * self.page_size as u64)?;
        // Seal a blank page so an immediate read-back passes verification.
        let mut buf = vec![0u8; self.page_size];
        page::init_page(&mut buf, id, PageKind::Free);
        self.write_page(id, &mut buf)?;
        self.persist_meta()?;
        Ok(id)
    }

    /// Returns a page to the free list for reuse.
    pub fn free_page(&mut self, page_id: PageId) -> DbResult<()> {
        if !page_id.is_valid() || page_id.0 >= self.page_count {
            return Err(DbError::InvalidArgument(format!(
                "cannot free {}",
                page_id
            )));
        }
        let mut buf = vec![0u8; self.page_size];
        page::init_page(&mut buf, page_id, PageKind::Free);
        page::set_next_page(&mut buf, self.free_head);
        self.write_page(page_id, &mut buf)?;
        self.free_head = page_id;
        self.persist_meta()
    }

    /// Flushes file contents to stable storage.
    pub fn sync(&mut self) -> DbResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn persist_meta(&mut self) -> DbResult<()> {
        let mut meta = vec![0u8; self.page_size];
        page::init_page(&mut meta, PageId(0), PageKind::Meta);
        meta[META_MAGIC_OFFSET..META_MAGIC_OFFSET + 4].copy_from_slice(&MAGIC.to_le_bytes());
        meta[META_VERSION_OFFSET..META_VERSION_OFFSET + 2]
            .copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        meta[META_PAGE_SIZE_OFFSET..META_PAGE_SIZE_OFFSET + 4]
            .copy_from_slice(&(self.page_size as u32).to_le_bytes());
        meta[META_FREE_HEAD_OFFSET..META_FREE_HEAD_OFFSET + 4]
            .copy_from_slice(&self.free_head.0.to_le_bytes());
        meta[META_PAGE_COUNT_OFFSET..META_PAGE_COUNT_OFFSET + 4]
            .copy_from_slice(&self.page_count.to_le_bytes());
        page::seal_checksum(&mut meta);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&meta)?;
        Ok(())
    }

    fn check_buf(&self, len: usize) -> DbResult<()> {
        if len != self.page_size {
            return Err(DbError::InvalidArgument(format!(
                "buffer of {} bytes does not match page size {}",
                len, self.page_size
            )));
        }
        Ok(())
    }

    fn offset_of(&self, page_id: PageId) -> u64 {
        page_id.0 as u64 * self.page_size as u64
    }
}
