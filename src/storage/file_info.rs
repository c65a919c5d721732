//! A single fixed-size page file with its free-page set

use crate::{Result, StrataError};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// One page file on disk, divided into uniform pages.
///
/// Reads and writes are positioned and take `&self`; callers guarantee that
/// no two writers target the same byte range concurrently.
pub struct FileInfo {
    file_id: i32,
    file: File,
    path: PathBuf,
    page_size: usize,
    num_pages: usize,
    free_pages: Mutex<BTreeSet<u32>>,
}

impl FileInfo {
    /// Create a new page file of `num_pages` pages, all free
    pub fn create(file_id: i32, path: &Path, page_size: usize, num_pages: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((page_size * num_pages) as u64)?;

        let free_pages = (0..num_pages as u32).collect();
        Ok(Self {
            file_id,
            file,
            path: path.to_path_buf(),
            page_size,
            num_pages,
            free_pages: Mutex::new(free_pages),
        })
    }

    /// Open an existing page file. The free set starts empty; the recovery
    /// scan repopulates it from page headers.
    pub fn open(file_id: i32, path: &Path, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if page_size == 0 || len % page_size != 0 {
            return Err(StrataError::InvalidFileFormat);
        }
        Ok(Self {
            file_id,
            file,
            path: path.to_path_buf(),
            page_size,
            num_pages: len / page_size,
            free_pages: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn file_id(&self) -> i32 {
        self.file_id
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Random-access read of `num_bytes` into the front of `dst`.
    /// Returns the number of bytes read.
    pub fn read(&self, offset: u64, num_bytes: usize, dst: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        while total < num_bytes {
            let n = self.file.read_at(&mut dst[total..num_bytes], offset + total as u64)?;
            if n == 0 {
                return Err(StrataError::ShortIo { expected: num_bytes, actual: total });
            }
            total += n;
        }
        Ok(total)
    }

    /// Random-access write of the first `num_bytes` of `src`.
    /// Returns the number of bytes written.
    pub fn write(&self, offset: u64, num_bytes: usize, src: &[u8]) -> Result<usize> {
        self.file.write_all_at(&src[..num_bytes], offset)?;
        Ok(num_bytes)
    }

    /// Return a page to the free set, zeroing its header word so the page
    /// also reads as free after a restart
    pub fn free_page(&self, page_num: u32) -> Result<()> {
        let zero = [0u8; 4];
        self.write(page_num as u64 * self.page_size as u64, zero.len(), &zero)?;
        self.free_pages.lock().insert(page_num);
        Ok(())
    }

    /// Take the lowest-numbered free page, if any
    pub(crate) fn get_free_page(&self) -> Option<u32> {
        let mut free = self.free_pages.lock();
        let page = free.iter().next().copied()?;
        free.remove(&page);
        Some(page)
    }

    /// Mark a page free in memory only; used by the recovery scan, which
    /// reads the free state from disk
    pub(crate) fn mark_page_free(&self, page_num: u32) {
        self.free_pages.lock().insert(page_num);
    }

    pub fn num_free_pages(&self) -> usize {
        self.free_pages.lock().len()
    }

    /// Flush file contents to stable storage
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
