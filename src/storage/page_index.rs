use parking_lot::Mutex;

use crate::types::{PAGE_SIZE, PageNo};

const INTERVALS_NO: usize = 40;
const THRESHOLD: usize = PAGE_SIZE / INTERVALS_NO;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page_no: PageNo,
    pub free_space: usize,
}

/// Buckets data pages by free space so inserts can find a host page.
///
/// `select` hands a page out exclusively; the caller adds it back once the
/// insert is done, under whatever bucket its new free space falls into.
pub struct PageIndex {
    // INTERVALS_NO regular buckets plus one overflow bucket
    buckets: Mutex<Vec<Vec<PageInfo>>>,
}

impl Default for PageIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl PageIndex {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![Vec::new(); INTERVALS_NO + 1]),
        }
    }

    pub fn add(&self, page_no: PageNo, free_space: usize) {
        let bucket = (free_space / THRESHOLD).min(INTERVALS_NO);
        self.buckets.lock()[bucket].push(PageInfo {
            page_no,
            free_space,
        });
    }

    /// Takes a page with at least `space_size` free bytes out of the index.
    pub fn select(&self, space_size: usize) -> Option<PageInfo> {
        let mut buckets = self.buckets.lock();
        let mut number = space_size / THRESHOLD;
        if number < INTERVALS_NO {
            number += 1;
        }
        while number < INTERVALS_NO {
            if let Some(info) = buckets[number].pop() {
                return Some(info);
            }
            number += 1;
        }
        let overflow = &mut buckets[INTERVALS_NO];
        let position = overflow
            .iter()
            .position(|info| info.free_space >= space_size)?;
        Some(overflow.swap_remove(position))
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
