use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{PAGE_SIZE, PageNo, error::DatabaseError, read_u16};

/*
 * Data Page Layout on Disk (every page except page 1)
 * ┌─────────────────────────────────────────────────────────────────┐
 * │  free_space_offset(2)                                           │
 * ├─────────────────────────────────────────────────────────────────┤
 * │  [item 0][item 1] ... [item N]          (grows upward)          │
 * ├─────────────────────────────────────────────────────────────────┤
 * │                    FREE SPACE                                   │
 * └─────────────────────────────────────────────────────────────────┘
 * Items are never moved or erased once written, so an item's offset
 * is a stable address for the lifetime of the file.
 */

pub const FREE_OFFSET_SIZE: usize = 2;
pub const MAX_FREE_SPACE: usize = PAGE_SIZE - FREE_OFFSET_SIZE;

/// A resident page. The byte buffer doubles as the page lock: writers
/// hold [`Page::lock`] across any read-modify-write of the buffer.
pub struct Page {
    page_no: PageNo,
    dirty: AtomicBool,
    data: RwLock<Box<[u8]>>,
}

impl Page {
    pub fn new(page_no: PageNo, mut data: Vec<u8>) -> Self {
        data.resize(PAGE_SIZE, 0);
        Self {
            page_no,
            dirty: AtomicBool::new(false),
            data: RwLock::new(data.into_boxed_slice()),
        }
    }

    pub fn page_no(&self) -> PageNo {
        self.page_no
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    pub fn lock(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().to_vec()
    }

    /// Bytes still available for new items.
    pub fn free_space(&self) -> usize {
        PAGE_SIZE - free_space_offset(&self.read()) as usize
    }

    /// Writes `raw` at `offset` during redo and moves the free offset past
    /// it when needed.
    pub fn recover_insert(&self, raw: &[u8], offset: u16) -> Result<(), DatabaseError> {
        let mut data = self.lock();
        write_at(self.page_no, &mut data, raw, offset)?;
        let end = offset as usize + raw.len();
        if (free_space_offset(&data) as usize) < end {
            set_free_space_offset(&mut data, end as u16);
        }
        self.set_dirty(true);
        Ok(())
    }

    /// Writes `raw` at `offset` without touching the free offset.
    pub fn recover_update(&self, raw: &[u8], offset: u16) -> Result<(), DatabaseError> {
        let mut data = self.lock();
        write_at(self.page_no, &mut data, raw, offset)?;
        self.set_dirty(true);
        Ok(())
    }
}

/// Raw bytes of an empty data page.
pub fn init_data_page() -> Vec<u8> {
    let mut raw = vec![0u8; PAGE_SIZE];
    set_free_space_offset(&mut raw, FREE_OFFSET_SIZE as u16);
    raw
}

pub fn free_space_offset(data: &[u8]) -> u16 {
    read_u16(data, 0)
}

fn set_free_space_offset(data: &mut [u8], offset: u16) {
    data[0..FREE_OFFSET_SIZE].copy_from_slice(&offset.to_be_bytes());
}

/// Appends `raw` at the free offset of a locked data page and returns the
/// offset it landed at.
pub fn append_item(page_no: PageNo, data: &mut [u8], raw: &[u8]) -> Result<u16, DatabaseError> {
    let offset = free_space_offset(data);
    if (offset as usize) < FREE_OFFSET_SIZE || offset as usize > PAGE_SIZE {
        return Err(DatabaseError::CorruptedPage {
            page_no,
            reason: format!("Invalid free_space_offset: {}", offset),
        });
    }
    write_at(page_no, data, raw, offset)?;
    set_free_space_offset(data, offset + raw.len() as u16);
    Ok(offset)
}

fn write_at(page_no: PageNo, data: &mut [u8], raw: &[u8], offset: u16) -> Result<(), DatabaseError> {
    let start = offset as usize;
    let end = start + raw.len();
    if start < FREE_OFFSET_SIZE || end > PAGE_SIZE {
        return Err(DatabaseError::CorruptedPage {
            page_no,
            reason: format!(
                "Item at offset {} with length {} exceeds page boundary",
                offset,
                raw.len()
            ),
        });
    }
    data[start..end].copy_from_slice(raw);
    Ok(())
}
