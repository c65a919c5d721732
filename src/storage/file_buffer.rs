//! A chunk's byte stream over epoch-versioned pages
//!
//! Physical page layout:
//! ```text
//! +--------------------------------+---------------------------+
//! | header (reserved_header_size)  | payload (page_data_size)  |
//! +--------------------------------+---------------------------+
//!
//! Header (i32 each, little-endian, padded to a multiple of 32 bytes):
//! - header_size_bytes
//! - chunk_key[0..k-1]
//! - page_id   (-1 for metadata pages)
//! - epoch
//! ```
//!
//! Appends land on the latest version of each logical page; point updates
//! copy-on-write any page whose latest version predates the current epoch,
//! so committed epochs stay intact until a checkpoint advances past them.

use crate::storage::encoder::{self, ChunkMetadata, Encoder};
use crate::storage::file_mgr::FileMgr;
use crate::storage::page::{ChunkKey, HeaderInfo, MultiPage, Page, PageVersion};
use crate::storage::{HEADER_BUFFER_OFFSET, METADATA_PAGE_SIZE, METADATA_VERSION, NUM_METADATA};
use crate::types::SqlTypeInfo;
use crate::{Result, StrataError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rayon::prelude::*;
use std::io::Cursor;
use std::sync::Arc;

/// Memory level a chunk read or write targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLevel {
    Cpu,
    Gpu,
}

/// One chunk presented as a byte-addressable stream backed by pages with
/// per-page version history keyed by epoch
pub struct FileBuffer {
    mgr: Arc<FileMgr>,
    chunk_key: ChunkKey,
    page_size: usize,
    reserved_header_size: usize,
    page_data_size: usize,
    multi_pages: Vec<MultiPage>,
    metadata_pages: MultiPage,
    size: usize,
    sql_type: SqlTypeInfo,
    encoder: Option<Box<dyn Encoder>>,
    is_dirty: bool,
    is_appended: bool,
    is_updated: bool,
}

impl std::fmt::Debug for FileBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBuffer")
            .field("chunk_key", &self.chunk_key)
            .field("page_size", &self.page_size)
            .field("reserved_header_size", &self.reserved_header_size)
            .field("page_data_size", &self.page_data_size)
            .field("size", &self.size)
            .field("sql_type", &self.sql_type)
            .field("is_dirty", &self.is_dirty)
            .field("is_appended", &self.is_appended)
            .field("is_updated", &self.is_updated)
            .finish()
    }
}

/// Smallest multiple of 32 that fits `(key_len + 3)` i32 header words
fn reserved_header_size(key_len: usize) -> usize {
    let raw = (key_len + 3) * std::mem::size_of::<i32>();
    raw.div_ceil(HEADER_BUFFER_OFFSET) * HEADER_BUFFER_OFFSET
}

impl FileBuffer {
    /// Create an empty chunk buffer. No pages are allocated until the first
    /// `reserve`, `write` or `append`.
    pub fn new(mgr: Arc<FileMgr>, page_size: usize, chunk_key: ChunkKey, sql_type: SqlTypeInfo) -> Self {
        let reserved = reserved_header_size(chunk_key.len());
        assert!(page_size > reserved, "page size must exceed the reserved header");
        let encoder = encoder::create(&sql_type);
        Self {
            mgr,
            chunk_key,
            page_size,
            reserved_header_size: reserved,
            page_data_size: page_size - reserved,
            multi_pages: Vec::new(),
            metadata_pages: MultiPage::new(),
            size: 0,
            sql_type,
            encoder,
            is_dirty: false,
            is_appended: false,
            is_updated: false,
        }
    }

    /// Rebuild a chunk buffer from the page-header records found on disk,
    /// ordered by page id then epoch. Metadata records (`page_id == -1`)
    /// must precede data records; a gap in page ids is corruption.
    pub fn from_headers(mgr: Arc<FileMgr>, chunk_key: ChunkKey, headers: &[HeaderInfo]) -> Result<Self> {
        let reserved = reserved_header_size(chunk_key.len());
        let mut buffer = Self {
            mgr,
            chunk_key,
            page_size: 0,
            reserved_header_size: reserved,
            page_data_size: 0,
            multi_pages: Vec::new(),
            metadata_pages: MultiPage::new(),
            size: 0,
            sql_type: SqlTypeInfo::default(),
            encoder: None,
            is_dirty: false,
            is_appended: false,
            is_updated: false,
        };

        let mut last_page_id = -1;
        for info in headers {
            if info.page_id == -1 {
                buffer.metadata_pages.push(info.epoch, info.page);
                continue;
            }
            if info.page_id != last_page_id {
                if info.page_id != last_page_id + 1 {
                    return Err(StrataError::CorruptChunk(format!(
                        "page id {} follows {} in chunk {:?}",
                        info.page_id, last_page_id, buffer.chunk_key
                    )));
                }
                if last_page_id == -1 {
                    let metadata_page = buffer.latest_metadata_page()?;
                    buffer.read_metadata(metadata_page)?;
                }
                buffer.multi_pages.push(MultiPage::new());
                last_page_id = info.page_id;
            }
            if let Some(multi_page) = buffer.multi_pages.last_mut() {
                multi_page.push(info.epoch, info.page);
            }
        }
        if last_page_id == -1 && !buffer.metadata_pages.is_empty() {
            let metadata_page = buffer.latest_metadata_page()?;
            buffer.read_metadata(metadata_page)?;
        }
        Ok(buffer)
    }

    fn latest_metadata_page(&self) -> Result<Page> {
        let version = self.metadata_pages.current().ok_or_else(|| {
            StrataError::CorruptChunk(format!(
                "chunk {:?} has data pages but no metadata page",
                self.chunk_key
            ))
        })?;
        if !version.page.is_initialized() {
            return Err(StrataError::CorruptChunk(format!(
                "uninitialized metadata page in chunk {:?}",
                self.chunk_key
            )));
        }
        Ok(version.page)
    }

    pub fn chunk_key(&self) -> &ChunkKey {
        &self.chunk_key
    }

    /// Number of logical bytes currently valid
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_data_size(&self) -> usize {
        self.page_data_size
    }

    pub fn reserved_header_size(&self) -> usize {
        self.reserved_header_size
    }

    /// Number of logical pages
    pub fn page_count(&self) -> usize {
        self.multi_pages.len()
    }

    pub fn multi_pages(&self) -> &[MultiPage] {
        &self.multi_pages
    }

    pub fn metadata_pages(&self) -> &MultiPage {
        &self.metadata_pages
    }

    pub fn sql_type(&self) -> &SqlTypeInfo {
        &self.sql_type
    }

    pub fn has_encoder(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn encoder(&self) -> Option<&dyn Encoder> {
        self.encoder.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn is_appended(&self) -> bool {
        self.is_appended
    }

    pub fn is_updated(&self) -> bool {
        self.is_updated
    }

    pub fn clear_dirty_bits(&mut self) {
        self.is_dirty = false;
        self.is_appended = false;
        self.is_updated = false;
    }

    /// Ensure at least `ceil(num_bytes / page_size)` logical pages exist.
    /// Does not change the valid size.
    pub fn reserve(&mut self, num_bytes: usize) -> Result<()> {
        let num_pages_requested = num_bytes.div_ceil(self.page_size);
        let epoch = self.mgr.epoch();
        for page_id in self.multi_pages.len()..num_pages_requested {
            let page = self.add_new_multi_page(epoch)?;
            self.write_header(page, page_id as i32, epoch, false)?;
        }
        Ok(())
    }

    /// Write `src` at the end of the chunk
    pub fn append(&mut self, src: &[u8]) -> Result<()> {
        self.is_dirty = true;
        self.is_appended = true;

        let num_bytes = src.len();
        let start_page = self.size / self.page_data_size;
        let start_page_offset = self.size % self.page_data_size;
        let num_pages_to_write = (num_bytes + start_page_offset).div_ceil(self.page_data_size);
        let initial_num_pages = self.multi_pages.len();
        self.size += num_bytes;
        let epoch = self.mgr.epoch();

        let mut cur = src;
        for page_id in start_page..start_page + num_pages_to_write {
            let page = if page_id >= initial_num_pages {
                let page = self.add_new_multi_page(epoch)?;
                self.write_header(page, page_id as i32, epoch, false)?;
                page
            } else {
                // appends go to the page's latest version as-is
                self.current_version(page_id)?.page
            };
            let page_offset = if page_id == start_page { start_page_offset } else { 0 };
            let num_to_write = (self.page_data_size - page_offset).min(cur.len());
            let file_info = self.mgr.get_file_info(page.file_id)?;
            file_info.write(self.payload_offset(page, page_offset), num_to_write, cur)?;
            cur = &cur[num_to_write..];
        }
        debug_assert!(cur.is_empty());
        Ok(())
    }

    /// Point-update `src.len()` bytes at `offset`, copy-on-writing any page
    /// whose latest version predates the current epoch. Extends the chunk if
    /// the write runs past the end.
    pub fn write(&mut self, src: &[u8], offset: usize) -> Result<()> {
        let num_bytes = src.len();
        self.is_dirty = true;
        let mut grows = false;
        if offset < self.size {
            self.is_updated = true;
        }
        if offset + num_bytes > self.size {
            grows = true;
            self.is_appended = true;
            self.size = offset + num_bytes;
        }

        let start_page = offset / self.page_data_size;
        let start_page_offset = offset % self.page_data_size;
        let num_pages_to_write = (num_bytes + start_page_offset).div_ceil(self.page_data_size);
        let epoch = self.mgr.epoch();

        // fill any gap between the existing pages and the write start
        for page_id in self.multi_pages.len()..start_page {
            let page = self.add_new_multi_page(epoch)?;
            self.write_header(page, page_id as i32, epoch, false)?;
        }

        let mut cur = src;
        for page_id in start_page..start_page + num_pages_to_write {
            let page_offset = if page_id == start_page { start_page_offset } else { 0 };
            let num_to_write = (self.page_data_size - page_offset).min(cur.len());
            let page = if page_id >= self.multi_pages.len() {
                let page = self.add_new_multi_page(epoch)?;
                self.write_header(page, page_id as i32, epoch, false)?;
                page
            } else {
                let last = self.current_version(page_id)?;
                if last.epoch < epoch {
                    // the latest version belongs to a committed epoch and
                    // cannot be overwritten in place
                    let page = self.mgr.request_free_page(self.page_size, false)?;
                    self.multi_pages[page_id].push(epoch, page);
                    if page_offset > 0 {
                        self.copy_page(last.page, page, page_offset, 0)?;
                    }
                    let write_end = page_offset + num_to_write;
                    if write_end < self.page_data_size {
                        self.copy_page(last.page, page, self.page_data_size - write_end, write_end)?;
                    }
                    self.write_header(page, page_id as i32, epoch, false)?;
                    page
                } else {
                    last.page
                }
            };
            let file_info = self.mgr.get_file_info(page.file_id)?;
            file_info.write(self.payload_offset(page, page_offset), num_to_write, cur)?;
            cur = &cur[num_to_write..];

            if grows && page_id == start_page + num_pages_to_write - 1 {
                // re-anchor the chunk: page 0's header keeps its own last
                // epoch so the valid size at checkpoint stays recoverable
                let first = self.current_version(0)?;
                self.write_header(first.page, 0, first.epoch, false)?;
            }
        }
        debug_assert!(cur.is_empty());
        Ok(())
    }

    /// Read `dst.len()` bytes starting at `offset`, fanning the page reads
    /// out over up to the manager's reader-thread count
    pub fn read(&self, dst: &mut [u8], offset: usize, dst_buffer_type: MemoryLevel) -> Result<()> {
        if dst_buffer_type != MemoryLevel::Cpu {
            return Err(StrataError::UnsupportedBufferType);
        }
        let num_bytes = dst.len();
        if num_bytes == 0 {
            return Ok(());
        }
        let start_page = offset / self.page_data_size;
        let start_page_offset = offset % self.page_data_size;
        let num_pages_to_read = (num_bytes + start_page_offset).div_ceil(self.page_data_size);
        if start_page + num_pages_to_read > self.multi_pages.len() {
            return Err(StrataError::CorruptChunk(format!(
                "read past the end of chunk {:?}",
                self.chunk_key
            )));
        }

        struct ReadSlice<'a> {
            start_page: usize,
            end_page: usize,
            start_page_offset: usize,
            dst: &'a mut [u8],
        }

        let num_threads = self.mgr.num_reader_threads().min(num_pages_to_read);
        let pages_per_thread = num_pages_to_read / num_threads;
        let mut extra_pages = num_pages_to_read % num_threads;

        let mut slices = Vec::with_capacity(num_threads);
        let mut remaining = dst;
        let mut next_page = start_page;
        let mut page_offset = start_page_offset;
        let mut bytes_left = num_bytes;
        for _ in 0..num_threads {
            let mut num_pages = pages_per_thread;
            if extra_pages > 0 {
                num_pages += 1;
                extra_pages -= 1;
            }
            let span = (num_pages * self.page_data_size - page_offset).min(bytes_left);
            let (head, tail) = std::mem::take(&mut remaining).split_at_mut(span);
            slices.push(ReadSlice {
                start_page: next_page,
                end_page: next_page + num_pages,
                start_page_offset: page_offset,
                dst: head,
            });
            remaining = tail;
            next_page += num_pages;
            page_offset = 0;
            bytes_left -= span;
        }

        let read_slice = |slice: &mut ReadSlice| -> Result<usize> {
            let mut pos = 0;
            let mut page_offset = slice.start_page_offset;
            for page_id in slice.start_page..slice.end_page {
                let version = self.current_version(page_id)?;
                let file_info = self.mgr.get_file_info(version.page.file_id)?;
                let num_to_read = (self.page_data_size - page_offset).min(slice.dst.len() - pos);
                let n = file_info.read(
                    self.payload_offset(version.page, page_offset),
                    num_to_read,
                    &mut slice.dst[pos..],
                )?;
                pos += n;
                page_offset = 0;
            }
            Ok(pos)
        };

        let total: usize = if slices.len() == 1 {
            read_slice(&mut slices[0])?
        } else {
            slices
                .par_iter_mut()
                .map(read_slice)
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .sum()
        };
        if total != num_bytes {
            return Err(StrataError::ShortIo { expected: num_bytes, actual: total });
        }
        Ok(())
    }

    /// Copy `num_bytes` of payload at `offset` from one physical page to
    /// another through a scratch buffer
    fn copy_page(&self, src: Page, dst: Page, num_bytes: usize, offset: usize) -> Result<()> {
        debug_assert!(offset + num_bytes <= self.page_data_size);
        let src_file = self.mgr.get_file_info(src.file_id)?;
        let dst_file = self.mgr.get_file_info(dst.file_id)?;
        let mut scratch = vec![0u8; num_bytes];
        src_file.read(self.payload_offset(src, offset), num_bytes, &mut scratch)?;
        dst_file.write(self.payload_offset(dst, offset), num_bytes, &scratch)?;
        Ok(())
    }

    /// Write this chunk's metadata onto a fresh metadata page at `epoch`
    pub fn write_metadata(&mut self, epoch: i32) -> Result<()> {
        let page = self.mgr.request_free_page(METADATA_PAGE_SIZE, true)?;
        self.write_header(page, -1, epoch, true)?;

        let mut payload = Vec::with_capacity(128);
        payload.write_u64::<LittleEndian>(self.page_size as u64)?;
        payload.write_u64::<LittleEndian>(self.size as u64)?;
        let mut type_data = [0i32; NUM_METADATA];
        type_data[0] = METADATA_VERSION;
        type_data[1] = self.encoder.is_some() as i32;
        if self.encoder.is_some() {
            self.sql_type.fill_type_data(&mut type_data[2..]);
        }
        for value in type_data {
            payload.write_i32::<LittleEndian>(value)?;
        }
        if let Some(encoder) = &self.encoder {
            encoder.write_metadata(&mut payload)?;
        }

        let file_info = self.mgr.get_file_info(page.file_id)?;
        file_info.write(
            page.page_num as u64 * METADATA_PAGE_SIZE as u64 + self.reserved_header_size as u64,
            payload.len(),
            &payload,
        )?;
        self.metadata_pages.push(epoch, page);
        Ok(())
    }

    /// Load chunk metadata from the given metadata page, recovering page
    /// size, valid size, column type and encoder state
    pub fn read_metadata(&mut self, page: Page) -> Result<()> {
        let file_info = self.mgr.get_file_info(page.file_id)?;
        let mut payload = vec![0u8; METADATA_PAGE_SIZE - self.reserved_header_size];
        file_info.read(
            page.page_num as u64 * METADATA_PAGE_SIZE as u64 + self.reserved_header_size as u64,
            payload.len(),
            &mut payload,
        )?;

        let mut cursor = Cursor::new(&payload[..]);
        self.page_size = cursor.read_u64::<LittleEndian>()? as usize;
        self.size = cursor.read_u64::<LittleEndian>()? as usize;
        let mut type_data = [0i32; NUM_METADATA];
        for value in &mut type_data {
            *value = cursor.read_i32::<LittleEndian>()?;
        }
        if type_data[0] != METADATA_VERSION {
            return Err(StrataError::VersionMismatch {
                expected: METADATA_VERSION as u32,
                actual: type_data[0] as u32,
            });
        }
        if type_data[1] != 0 {
            self.sql_type = SqlTypeInfo::from_type_data(&type_data[2..])?;
            let mut encoder = encoder::create(&self.sql_type).ok_or_else(|| {
                StrataError::CorruptChunk(format!(
                    "metadata of chunk {:?} names an encoder for a type without one",
                    self.chunk_key
                ))
            })?;
            encoder.read_metadata(&mut cursor)?;
            self.encoder = Some(encoder);
        }
        if self.page_size <= self.reserved_header_size {
            return Err(StrataError::CorruptChunk(format!(
                "metadata of chunk {:?} records page size {}",
                self.chunk_key, self.page_size
            )));
        }
        self.page_data_size = self.page_size - self.reserved_header_size;
        Ok(())
    }

    /// Transcode values through this chunk's encoder into the buffer.
    /// See [`Encoder::append_data`] for the `src`/`offset` contract.
    pub fn append_encoded(
        &mut self,
        src: &mut &[u8],
        num_elems: usize,
        replicating: bool,
        offset: i64,
    ) -> Result<ChunkMetadata> {
        let mut encoder = self.encoder.take().ok_or_else(|| {
            StrataError::CorruptChunk(format!("chunk {:?} has no encoder", self.chunk_key))
        })?;
        let result = encoder.append_data(self, src, num_elems, replicating, offset);
        self.encoder = Some(encoder);
        result
    }

    /// Return every physical page of every version to its file's free list
    /// and clear the version histories. Returns the number of pages freed.
    pub fn free_pages(&mut self) -> Result<usize> {
        let mut num_freed = 0;
        for version in self.metadata_pages.take_versions() {
            let file_info = self.mgr.get_file_info(version.page.file_id)?;
            file_info.free_page(version.page.page_num)?;
            num_freed += 1;
        }
        for mut multi_page in std::mem::take(&mut self.multi_pages) {
            for version in multi_page.take_versions() {
                let file_info = self.mgr.get_file_info(version.page.file_id)?;
                file_info.free_page(version.page.page_num)?;
                num_freed += 1;
            }
        }
        self.size = 0;
        Ok(num_freed)
    }

    fn current_version(&self, page_id: usize) -> Result<PageVersion> {
        let version = self
            .multi_pages
            .get(page_id)
            .and_then(|mp| mp.current())
            .ok_or_else(|| {
                StrataError::CorruptChunk(format!(
                    "missing logical page {page_id} in chunk {:?}",
                    self.chunk_key
                ))
            })?;
        if !version.page.is_initialized() {
            return Err(StrataError::CorruptChunk(format!(
                "uninitialized page {page_id} in chunk {:?}",
                self.chunk_key
            )));
        }
        Ok(version)
    }

    fn add_new_multi_page(&mut self, epoch: i32) -> Result<Page> {
        let page = self.mgr.request_free_page(self.page_size, false)?;
        let mut multi_page = MultiPage::new();
        multi_page.push(epoch, page);
        self.multi_pages.push(multi_page);
        Ok(page)
    }

    fn payload_offset(&self, page: Page, page_offset: usize) -> u64 {
        page.page_num as u64 * self.page_size as u64
            + page_offset as u64
            + self.reserved_header_size as u64
    }

    fn write_header(&self, page: Page, page_id: i32, epoch: i32, is_metadata: bool) -> Result<()> {
        let int_header_size = self.chunk_key.len() + 3;
        let mut header = Vec::with_capacity(int_header_size * 4);
        // the recorded size leaves out the size word itself
        header.write_i32::<LittleEndian>(((int_header_size - 1) * 4) as i32)?;
        for key_component in &self.chunk_key {
            header.write_i32::<LittleEndian>(*key_component)?;
        }
        header.write_i32::<LittleEndian>(page_id)?;
        header.write_i32::<LittleEndian>(epoch)?;

        let page_size = if is_metadata { METADATA_PAGE_SIZE } else { self.page_size };
        let file_info = self.mgr.get_file_info(page.file_id)?;
        file_info.write(page.page_num as u64 * page_size as u64, header.len(), &header)?;
        Ok(())
    }
}
