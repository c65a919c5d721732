//! Page identifiers and per-logical-page version history

/// Ordered sequence of small integers uniquely identifying a chunk,
/// e.g. `{db, table, column, fragment}`. Fixed length for the life of
/// a chunk buffer.
pub type ChunkKey = Vec<i32>;

/// Identifies one physical page within one page file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub file_id: i32,
    pub page_num: u32,
}

impl Page {
    pub fn new(file_id: i32, page_num: u32) -> Self {
        Self { file_id, page_num }
    }

    /// An uninitialized page has `file_id == -1`
    pub fn is_initialized(&self) -> bool {
        self.file_id >= 0
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { file_id: -1, page_num: 0 }
    }
}

/// One committed version of a logical page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageVersion {
    pub epoch: i32,
    pub page: Page,
}

/// Version history of one logical page, oldest first.
///
/// Reads always go through [`current`](Self::current); older versions exist
/// only so an epoch rollback can discard everything written after the
/// rollback target.
#[derive(Debug, Clone, Default)]
pub struct MultiPage {
    versions: Vec<PageVersion>,
}

impl MultiPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest version of this logical page
    pub fn current(&self) -> Option<PageVersion> {
        self.versions.last().copied()
    }

    /// Record a new version. Epochs must arrive in increasing order.
    pub fn push(&mut self, epoch: i32, page: Page) {
        debug_assert!(self.versions.last().map_or(true, |v| v.epoch < epoch));
        self.versions.push(PageVersion { epoch, page });
    }

    pub fn versions(&self) -> &[PageVersion] {
        &self.versions
    }

    pub fn last_epoch(&self) -> Option<i32> {
        self.versions.last().map(|v| v.epoch)
    }

    /// Drop every version written after `epoch` (rollback)
    pub fn truncate_to_epoch(&mut self, epoch: i32) -> Vec<PageVersion> {
        let keep = self.versions.iter().take_while(|v| v.epoch <= epoch).count();
        self.versions.split_off(keep)
    }

    /// Take the whole history, leaving the page empty
    pub fn take_versions(&mut self) -> Vec<PageVersion> {
        std::mem::take(&mut self.versions)
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }
}

/// Page-header record recovered from disk, used to rebuild a chunk buffer
/// on startup. `page_id == -1` marks a metadata page.
#[derive(Debug, Clone)]
pub struct HeaderInfo {
    pub chunk_key: ChunkKey,
    pub page_id: i32,
    pub epoch: i32,
    pub page: Page,
}
