use std::{path::Path, sync::Arc};

use tracing::{debug, info};

use crate::{
    storage::{
        cache::{CacheBackend, RefCountCache},
        data_item::{DataItem, wrap_item_raw},
        header::{LumbungHeader, check_stamp, init_page_one, set_close_stamp, set_open_stamp},
        ledger::TransactionLedger,
        log_record::insert_record,
        page_cache::PageCache,
        page_index::{PageIndex, PageInfo},
        recovery::{self, RecoveryStats},
        wal::Wal,
    },
    types::{
        PAGE_SIZE, PageNo, Uid, Xid, address_to_uid,
        error::DatabaseError,
        page::{
            FREE_OFFSET_SIZE, MAX_FREE_SPACE, Page, append_item, free_space_offset, init_data_page,
        },
        uid_to_address,
    },
};

const NEW_PAGE_ATTEMPTS: usize = 5;
// page 1 holds the header
const FIRST_DATA_PAGE: PageNo = 2;

struct ItemLoader {
    page_cache: Arc<PageCache>,
    wal: Arc<Wal>,
}

impl CacheBackend<DataItem> for ItemLoader {
    fn fetch(&self, uid: u64) -> Result<DataItem, DatabaseError> {
        let (page_no, offset) = uid_to_address(uid);
        let page = self.page_cache.get(page_no)?;
        match DataItem::parse(Arc::clone(&page), offset, uid, Arc::clone(&self.wal)) {
            Ok(item) => Ok(item),
            Err(e) => {
                self.page_cache.release(&page)?;
                Err(e)
            }
        }
    }

    fn write_back(&self, item: &DataItem) -> Result<(), DatabaseError> {
        self.page_cache.release(item.page())
    }
}

/// Record storage over the page cache, with every mutation logged first.
pub struct DataManager {
    loader: ItemLoader,
    ledger: Arc<TransactionLedger>,
    page_index: PageIndex,
    items: RefCountCache<DataItem>,
    page_one: Arc<Page>,
    recovery: Option<RecoveryStats>,
}

impl DataManager {
    pub fn create<P: AsRef<Path>>(
        path: P,
        memory: u64,
        ledger: Arc<TransactionLedger>,
    ) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let page_cache = Arc::new(PageCache::create(path, memory)?);
        let wal = Arc::new(Wal::create(path)?);

        let page_no = page_cache.new_page(&init_page_one())?;
        let page_one = page_cache.get(page_no)?;
        page_cache.flush_page(&page_one)?;
        info!(path = %path.display(), "created data manager");

        Ok(Self {
            loader: ItemLoader { page_cache, wal },
            ledger,
            page_index: PageIndex::new(),
            items: RefCountCache::unbounded(),
            page_one,
            recovery: None,
        })
    }

    /// Opens existing files, recovering first if the last run crashed.
    pub fn open<P: AsRef<Path>>(
        path: P,
        memory: u64,
        ledger: Arc<TransactionLedger>,
    ) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let page_cache = Arc::new(PageCache::open(path, memory)?);
        let wal = Arc::new(Wal::open(path)?);

        let page_one = page_cache.get(1)?;
        let clean = {
            let data = page_one.read();
            LumbungHeader::from_page(&data)?;
            check_stamp(&data)
        };
        let recovery = if clean {
            None
        } else {
            info!(path = %path.display(), "unclean shutdown detected");
            Some(recovery::recover(&ledger, &wal, &page_cache)?)
        };

        let dm = Self {
            loader: ItemLoader { page_cache, wal },
            ledger,
            page_index: PageIndex::new(),
            items: RefCountCache::unbounded(),
            page_one,
            recovery,
        };
        dm.fill_page_index()?;

        set_open_stamp(&mut dm.page_one.lock());
        dm.loader.page_cache.flush_page(&dm.page_one)?;
        info!(
            path = %path.display(),
            pages = dm.loader.page_cache.page_count(),
            recovered = !clean,
            "opened data manager"
        );
        Ok(dm)
    }

    fn fill_page_index(&self) -> Result<(), DatabaseError> {
        let page_cache = &self.loader.page_cache;
        for page_no in FIRST_DATA_PAGE..=page_cache.page_count() {
            let page = page_cache.get(page_no)?;
            self.page_index.add(page_no, page.free_space());
            page_cache.release(&page)?;
        }
        Ok(())
    }

    pub fn ledger(&self) -> &Arc<TransactionLedger> {
        &self.ledger
    }

    pub fn page_cache(&self) -> &Arc<PageCache> {
        &self.loader.page_cache
    }

    pub fn wal(&self) -> &Arc<Wal> {
        &self.loader.wal
    }

    /// Statistics of the recovery run during `open`, if one was needed.
    pub fn recovery_stats(&self) -> Option<&RecoveryStats> {
        self.recovery.as_ref()
    }

    /// Pins the item at `uid`. Invalidated items and uids that point
    /// outside the data pages read as absent.
    pub fn read(&self, uid: Uid) -> Result<Option<Arc<DataItem>>, DatabaseError> {
        if !self.addressable(uid) {
            debug!(uid, "uid outside data pages");
            return Ok(None);
        }
        let item = self.items.get(uid, &self.loader)?;
        if !item.is_valid() {
            self.items.release(uid, &self.loader)?;
            return Ok(None);
        }
        Ok(Some(item))
    }

    fn addressable(&self, uid: Uid) -> bool {
        let (page_no, offset) = uid_to_address(uid);
        address_to_uid(page_no, offset) == uid
            && (FIRST_DATA_PAGE..=self.loader.page_cache.page_count()).contains(&page_no)
            && (FREE_OFFSET_SIZE..PAGE_SIZE).contains(&(offset as usize))
    }

    pub fn release(&self, item: &DataItem) -> Result<(), DatabaseError> {
        self.items.release(item.uid(), &self.loader)
    }

    /// Stores `data` as a new item and returns its uid.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid, DatabaseError> {
        let raw = wrap_item_raw(data);
        if raw.len() > MAX_FREE_SPACE {
            return Err(DatabaseError::DataTooLarge {
                size: raw.len(),
                max: MAX_FREE_SPACE,
            });
        }

        let page_cache = &self.loader.page_cache;
        let mut selected = None;
        for _ in 0..NEW_PAGE_ATTEMPTS {
            selected = self.page_index.select(raw.len());
            if selected.is_some() {
                break;
            }
            let page_no = page_cache.new_page(&init_data_page())?;
            self.page_index.add(page_no, MAX_FREE_SPACE);
        }
        let PageInfo {
            page_no,
            free_space,
        } = selected.ok_or(DatabaseError::DataTooLarge {
            size: raw.len(),
            max: MAX_FREE_SPACE,
        })?;

        let page = match page_cache.get(page_no) {
            Ok(page) => page,
            Err(e) => {
                self.page_index.add(page_no, free_space);
                return Err(e);
            }
        };
        let appended = self.append_logged(xid, &page, &raw);
        self.page_index.add(page_no, page.free_space());
        page_cache.release(&page)?;

        let offset = appended?;
        debug!(xid, page_no, offset, size = data.len(), "inserted item");
        Ok(address_to_uid(page_no, offset))
    }

    fn append_logged(&self, xid: Xid, page: &Page, raw: &[u8]) -> Result<u16, DatabaseError> {
        let page_no: PageNo = page.page_no();
        let mut data = page.lock();
        let offset = free_space_offset(&data);
        self.loader
            .wal
            .log(&insert_record(xid, page_no, offset, raw))?;
        let offset = append_item(page_no, &mut data, raw)?;
        page.set_dirty(true);
        Ok(offset)
    }

    /// Flushes every cached item, stamps page 1 as cleanly closed and
    /// closes the files.
    pub fn close(&self) -> Result<(), DatabaseError> {
        let page_cache = &self.loader.page_cache;
        self.items.close(&self.loader)?;
        self.loader.wal.close()?;

        set_close_stamp(&mut self.page_one.lock());
        page_cache.flush_page(&self.page_one)?;
        page_cache.release(&self.page_one)?;
        page_cache.close()?;
        info!(path = %page_cache.path().display(), "closed data manager");
        Ok(())
    }
}
