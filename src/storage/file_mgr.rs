//! Page-file set, free-page allocation, and the epoch superblock
//!
//! The manager owns every page file in a storage directory and hands out
//! free pages of a requested size, growing the directory by whole files.
//! The current epoch (a monotonic commit counter) is persisted in a small
//! checksummed superblock; on open, every page header in the directory is
//! scanned and pages from epochs at or past the superblock epoch are rolled
//! back as uncommitted.
//!
//! Superblock format (`strata.meta`):
//! ```text
//! magic         : 8 bytes  "STRABASE"
//! version_major : u16
//! version_minor : u16
//! epoch         : i32
//! created_at    : i64 (unix seconds)
//! modified_at   : i64
//! checksum      : u32 (crc32 of all preceding bytes)
//! ```

use crate::storage::file_buffer::FileBuffer;
use crate::storage::file_info::FileInfo;
use crate::storage::page::{ChunkKey, HeaderInfo, Page};
use crate::storage::{DATA_FILE_PAGES, METADATA_FILE_PAGES};
use crate::{Result, StrataError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Superblock magic bytes
const SUPERBLOCK_MAGIC: &[u8; 8] = b"STRABASE";
/// Superblock file name inside the storage directory
const SUPERBLOCK_FILE: &str = "strata.meta";
const SUPERBLOCK_SIZE: usize = 36;
const VERSION_MAJOR: u16 = 1;
const VERSION_MINOR: u16 = 0;
/// Upper bound on chunk-key length accepted from disk
const MAX_CHUNK_KEY_LEN: usize = 16;

/// Chunk buffers recovered by [`FileMgr::open`], keyed by chunk key
pub type ChunkBufferMap = HashMap<ChunkKey, FileBuffer, ahash::RandomState>;

type FileMap = HashMap<i32, Arc<FileInfo>, ahash::RandomState>;

/// Configuration for a storage directory
#[derive(Debug, Clone)]
pub struct FileMgrConfig {
    pub base_path: PathBuf,
    pub num_reader_threads: usize,
    pub max_files: usize,
}

impl FileMgrConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            num_reader_threads: 4,
            max_files: 1024,
        }
    }

    pub fn with_reader_threads(mut self, num_reader_threads: usize) -> Self {
        self.num_reader_threads = num_reader_threads.max(1);
        self
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }
}

/// Owns the set of page files, the epoch counter and the reader-thread
/// budget shared by every chunk buffer of one storage directory
pub struct FileMgr {
    base_path: PathBuf,
    files: RwLock<FileMap>,
    next_file_id: AtomicI32,
    epoch: AtomicI32,
    created_at: i64,
    num_reader_threads: usize,
    max_files: usize,
    /// Serializes free-page searches against file creation
    alloc_lock: Mutex<()>,
}

impl FileMgr {
    /// Create a fresh storage directory at epoch 0
    pub fn init(config: FileMgrConfig) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.base_path)?;
        let mgr = Arc::new(Self {
            base_path: config.base_path,
            files: RwLock::new(FileMap::default()),
            next_file_id: AtomicI32::new(0),
            epoch: AtomicI32::new(0),
            created_at: chrono::Utc::now().timestamp(),
            num_reader_threads: config.num_reader_threads.max(1),
            max_files: config.max_files,
            alloc_lock: Mutex::new(()),
        });
        mgr.write_superblock()?;
        Ok(mgr)
    }

    /// Open an existing storage directory, scanning every page header to
    /// rebuild chunk buffers and free lists. Pages written at or past the
    /// superblock epoch never committed and are rolled back.
    pub fn open(config: FileMgrConfig) -> Result<(Arc<Self>, ChunkBufferMap)> {
        let superblock = Superblock::read(&config.base_path.join(SUPERBLOCK_FILE))?;

        let mut files = FileMap::default();
        let mut max_file_id = -1;
        for entry in std::fs::read_dir(&config.base_path)? {
            let path = entry?.path();
            let Some((file_id, page_size)) = parse_data_file_name(&path) else {
                continue;
            };
            files.insert(file_id, Arc::new(FileInfo::open(file_id, &path, page_size)?));
            max_file_id = max_file_id.max(file_id);
        }

        let mgr = Arc::new(Self {
            base_path: config.base_path,
            files: RwLock::new(files),
            next_file_id: AtomicI32::new(max_file_id + 1),
            epoch: AtomicI32::new(superblock.epoch),
            created_at: superblock.created_at,
            num_reader_threads: config.num_reader_threads.max(1),
            max_files: config.max_files,
            alloc_lock: Mutex::new(()),
        });

        let headers = mgr.scan_page_headers()?;
        let mut buffers = ChunkBufferMap::default();
        let mut start = 0;
        while start < headers.len() {
            let key = headers[start].chunk_key.clone();
            let end = start
                + headers[start..]
                    .iter()
                    .take_while(|h| h.chunk_key == key)
                    .count();
            let buffer = FileBuffer::from_headers(Arc::clone(&mgr), key.clone(), &headers[start..end])?;
            buffers.insert(key, buffer);
            start = end;
        }
        info!(
            "opened storage at {} (epoch {}, {} chunks)",
            mgr.base_path.display(),
            superblock.epoch,
            buffers.len()
        );
        Ok((mgr, buffers))
    }

    /// Current epoch. Bumped by [`increment_epoch`](Self::increment_epoch)
    /// when a commit completes.
    pub fn epoch(&self) -> i32 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Advance the epoch and persist it. The caller must have quiesced
    /// writers first.
    pub fn increment_epoch(&self) -> Result<i32> {
        let new_epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.write_superblock()?;
        info!("epoch advanced to {new_epoch}");
        Ok(new_epoch)
    }

    pub fn num_reader_threads(&self) -> usize {
        self.num_reader_threads
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Look up a page file by id
    pub fn get_file_info(&self, file_id: i32) -> Result<Arc<FileInfo>> {
        self.files
            .read()
            .get(&file_id)
            .cloned()
            .ok_or_else(|| StrataError::CorruptChunk(format!("page references unknown file {file_id}")))
    }

    /// Return a free page of the requested size, extending the directory by
    /// a new page file if every existing one is full
    pub fn request_free_page(&self, page_size: usize, is_metadata: bool) -> Result<Page> {
        let _guard = self.alloc_lock.lock();
        {
            let files = self.files.read();
            for file_info in files.values() {
                if file_info.page_size() != page_size {
                    continue;
                }
                if let Some(page_num) = file_info.get_free_page() {
                    return Ok(Page::new(file_info.file_id(), page_num));
                }
            }
        }
        let num_pages = if is_metadata { METADATA_FILE_PAGES } else { DATA_FILE_PAGES };
        let file_info = self.create_file(page_size, num_pages)?;
        let page_num = file_info.get_free_page().ok_or(StrataError::StorageExhausted)?;
        Ok(Page::new(file_info.file_id(), page_num))
    }

    /// Write metadata for every dirty buffer at the current epoch, flush all
    /// page files, then advance the epoch. Returns the new epoch.
    pub fn checkpoint<'a>(
        &self,
        buffers: impl IntoIterator<Item = &'a mut FileBuffer>,
    ) -> Result<i32> {
        let epoch = self.epoch();
        for buffer in buffers {
            if buffer.is_dirty() {
                buffer.write_metadata(epoch)?;
                buffer.clear_dirty_bits();
            }
        }
        for file_info in self.files.read().values() {
            file_info.sync()?;
        }
        self.increment_epoch()
    }

    fn create_file(&self, page_size: usize, num_pages: usize) -> Result<Arc<FileInfo>> {
        let mut files = self.files.write();
        if files.len() >= self.max_files {
            return Err(StrataError::StorageExhausted);
        }
        let file_id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        let path = self.base_path.join(format!("{file_id}.{page_size}.data"));
        let file_info = Arc::new(FileInfo::create(file_id, &path, page_size, num_pages)?);
        debug!(
            "created page file {} ({num_pages} pages of {page_size} bytes)",
            path.display()
        );
        files.insert(file_id, Arc::clone(&file_info));
        Ok(file_info)
    }

    /// Scan every page of every file, collecting committed page headers in
    /// (chunk key, page id, epoch) order and rebuilding the free lists
    fn scan_page_headers(&self) -> Result<Vec<HeaderInfo>> {
        let current_epoch = self.epoch();
        let mut headers = Vec::new();
        for file_info in self.files.read().values() {
            let page_size = file_info.page_size() as u64;
            for page_num in 0..file_info.num_pages() as u32 {
                let offset = page_num as u64 * page_size;
                let mut word = [0u8; 4];
                file_info.read(offset, word.len(), &mut word)?;
                let header_size = i32::from_le_bytes(word);
                if header_size == 0 {
                    file_info.mark_page_free(page_num);
                    continue;
                }
                let key_len = header_size / 4 - 2;
                if header_size < 0
                    || header_size % 4 != 0
                    || !(1..=MAX_CHUNK_KEY_LEN as i32).contains(&key_len)
                {
                    return Err(StrataError::CorruptChunk(format!(
                        "bad page header size {header_size} in file {}",
                        file_info.file_id()
                    )));
                }
                let mut rest = vec![0u8; header_size as usize];
                file_info.read(offset + 4, rest.len(), &mut rest)?;
                let mut cursor = Cursor::new(&rest[..]);
                let mut chunk_key = ChunkKey::with_capacity(key_len as usize);
                for _ in 0..key_len {
                    chunk_key.push(cursor.read_i32::<LittleEndian>()?);
                }
                let page_id = cursor.read_i32::<LittleEndian>()?;
                let epoch = cursor.read_i32::<LittleEndian>()?;
                if epoch >= current_epoch {
                    // leftovers from an epoch that never committed
                    debug!(
                        "rolling back page {page_num} of file {} (epoch {epoch})",
                        file_info.file_id()
                    );
                    file_info.free_page(page_num)?;
                    continue;
                }
                headers.push(HeaderInfo {
                    chunk_key,
                    page_id,
                    epoch,
                    page: Page::new(file_info.file_id(), page_num),
                });
            }
        }
        headers.sort_by(|a, b| {
            (&a.chunk_key, a.page_id, a.epoch).cmp(&(&b.chunk_key, b.page_id, b.epoch))
        });
        Ok(headers)
    }

    fn write_superblock(&self) -> Result<()> {
        let mut buf = Vec::with_capacity(SUPERBLOCK_SIZE);
        buf.extend_from_slice(SUPERBLOCK_MAGIC);
        buf.write_u16::<LittleEndian>(VERSION_MAJOR)?;
        buf.write_u16::<LittleEndian>(VERSION_MINOR)?;
        buf.write_i32::<LittleEndian>(self.epoch())?;
        buf.write_i64::<LittleEndian>(self.created_at)?;
        buf.write_i64::<LittleEndian>(chrono::Utc::now().timestamp())?;
        let checksum = crc32fast::hash(&buf);
        buf.write_u32::<LittleEndian>(checksum)?;
        std::fs::write(self.base_path.join(SUPERBLOCK_FILE), &buf)?;
        Ok(())
    }
}

/// Parse `{file_id}.{page_size}.data` names; anything else is ignored
fn parse_data_file_name(path: &Path) -> Option<(i32, usize)> {
    let name = path.file_name()?.to_str()?;
    let mut parts = name.split('.');
    let file_id = parts.next()?.parse().ok()?;
    let page_size = parts.next()?.parse().ok()?;
    if parts.next()? != "data" || parts.next().is_some() {
        return None;
    }
    Some((file_id, page_size))
}

struct Superblock {
    epoch: i32,
    created_at: i64,
}

impl Superblock {
    fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < SUPERBLOCK_SIZE {
            return Err(StrataError::InvalidFileFormat);
        }
        if &bytes[..8] != SUPERBLOCK_MAGIC {
            return Err(StrataError::InvalidFileFormat);
        }
        let mut cursor = Cursor::new(&bytes[8..]);
        let version_major = cursor.read_u16::<LittleEndian>()?;
        let _version_minor = cursor.read_u16::<LittleEndian>()?;
        if version_major > VERSION_MAJOR {
            return Err(StrataError::VersionMismatch {
                expected: VERSION_MAJOR as u32,
                actual: version_major as u32,
            });
        }
        let epoch = cursor.read_i32::<LittleEndian>()?;
        let created_at = cursor.read_i64::<LittleEndian>()?;
        let _modified_at = cursor.read_i64::<LittleEndian>()?;
        let checksum = cursor.read_u32::<LittleEndian>()?;
        if crc32fast::hash(&bytes[..SUPERBLOCK_SIZE - 4]) != checksum {
            return Err(StrataError::InvalidFileFormat);
        }
        Ok(Self { epoch, created_at })
    }
}
