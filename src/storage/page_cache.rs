use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    storage::cache::{CacheBackend, RefCountCache},
    types::{DB_SUFFIX, PAGE_SIZE, PageNo, error::DatabaseError, page::Page, suffixed_path},
};

pub const MIN_RESIDENT_PAGES: usize = 10;

fn page_offset(page_no: PageNo) -> u64 {
    (page_no as u64 - 1) * PAGE_SIZE as u64
}

/// The `.db` file, addressed in whole pages.
struct PageFile {
    path: PathBuf,
    file: Mutex<File>,
    page_count: AtomicU32,
}

impl PageFile {
    fn write_page(&self, page_no: PageNo, data: &[u8]) -> Result<(), DatabaseError> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_offset(page_no)))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }
}

impl CacheBackend<Page> for PageFile {
    fn fetch(&self, key: u64) -> Result<Page, DatabaseError> {
        let page_no = key as PageNo;
        let mut buffer = vec![0u8; PAGE_SIZE];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(page_offset(page_no)))?;
            file.read_exact(&mut buffer)?;
        }
        Ok(Page::new(page_no, buffer))
    }

    fn write_back(&self, page: &Page) -> Result<(), DatabaseError> {
        if page.is_dirty() {
            self.write_page(page.page_no(), &page.read())?;
            page.set_dirty(false);
            debug!(page_no = page.page_no(), "flushed dirty page");
        }
        Ok(())
    }
}

/// Fixed-capacity pinning cache over the page file.
pub struct PageCache {
    file: PageFile,
    cache: RefCountCache<Page>,
}

impl PageCache {
    fn capacity_for(memory: u64) -> Result<usize, DatabaseError> {
        let pages = (memory / PAGE_SIZE as u64) as usize;
        if pages < MIN_RESIDENT_PAGES {
            return Err(DatabaseError::MemoryTooSmall {
                pages,
                min: MIN_RESIDENT_PAGES,
            });
        }
        Ok(pages)
    }

    pub fn create<P: AsRef<Path>>(path: P, memory: u64) -> Result<Self, DatabaseError> {
        let capacity = Self::capacity_for(memory)?;
        let path = suffixed_path(path, DB_SUFFIX);
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;
        info!(path = %path.display(), capacity, "created page file");
        Ok(Self::with_file(path, file, 0, capacity))
    }

    pub fn open<P: AsRef<Path>>(path: P, memory: u64) -> Result<Self, DatabaseError> {
        let capacity = Self::capacity_for(memory)?;
        let path = suffixed_path(path, DB_SUFFIX);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let page_count = (file.metadata()?.len() / PAGE_SIZE as u64) as PageNo;
        info!(path = %path.display(), capacity, page_count, "opened page file");
        Ok(Self::with_file(path, file, page_count, capacity))
    }

    fn with_file(path: PathBuf, file: File, page_count: PageNo, capacity: usize) -> Self {
        Self {
            file: PageFile {
                path,
                file: Mutex::new(file),
                page_count: AtomicU32::new(page_count),
            },
            cache: RefCountCache::new(capacity),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    pub fn page_count(&self) -> PageNo {
        self.file.page_count.load(Ordering::Acquire)
    }

    pub fn resident_pages(&self) -> usize {
        self.cache.len()
    }

    /// Appends a page holding `init` and writes it through to disk.
    pub fn new_page(&self, init: &[u8]) -> Result<PageNo, DatabaseError> {
        let page_no = self.file.page_count.fetch_add(1, Ordering::AcqRel) + 1;
        let mut data = init.to_vec();
        data.resize(PAGE_SIZE, 0);
        self.file.write_page(page_no, &data)?;
        debug!(page_no, "allocated page");
        Ok(page_no)
    }

    /// Pins a page, reading it from disk if it is not resident.
    pub fn get(&self, page_no: PageNo) -> Result<Arc<Page>, DatabaseError> {
        if page_no == 0 || page_no > self.page_count() {
            return Err(DatabaseError::CorruptedPage {
                page_no,
                reason: format!("page is outside the file ({} pages)", self.page_count()),
            });
        }
        self.cache.get(page_no as u64, &self.file)
    }

    /// Drops a pin. The last pin flushes a dirty page and evicts it.
    pub fn release(&self, page: &Page) -> Result<(), DatabaseError> {
        self.cache.release(page.page_no() as u64, &self.file)
    }

    /// Writes a page to disk immediately, keeping it resident.
    pub fn flush_page(&self, page: &Page) -> Result<(), DatabaseError> {
        self.file.write_page(page.page_no(), &page.read())?;
        page.set_dirty(false);
        Ok(())
    }

    /// Cuts (or zero-extends) the file to exactly `max_page_no` pages.
    pub fn truncate_by_page_no(&self, max_page_no: PageNo) -> Result<(), DatabaseError> {
        let len = max_page_no as u64 * PAGE_SIZE as u64;
        {
            let file = self.file.file.lock();
            file.set_len(len)?;
            file.sync_all()?;
        }
        self.file.page_count.store(max_page_no, Ordering::Release);
        info!(max_page_no, "truncated page file");
        Ok(())
    }

    pub fn close(&self) -> Result<(), DatabaseError> {
        self.cache.close(&self.file)?;
        self.file.file.lock().sync_all()?;
        info!(path = %self.file.path.display(), "closed page file");
        Ok(())
    }
}
