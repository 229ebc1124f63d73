use crate::{
    storage::{LUMBUNG_MAGIC, OF_VC, VC_LEN},
    types::{PAGE_SIZE, error::DatabaseError, read_u16},
};

/*
 * Page 1 Layout
 * ┌───────────┬──────────────┬─────────────┬─────────────────┬──────────────────┬─────────┐
 * │ magic(16) │ page_size(2) │ version(1)  │ ... unused ...  │ open stamp(8)    │ close   │
 * │ 0..16     │ 16..18       │ 18          │ 19..100         │ 100..108         │ 108..116│
 * └───────────┴──────────────┴─────────────┴─────────────────┴──────────────────┴─────────┘
 * A fresh random open stamp is written every time the file is opened for
 * writing and copied into the close slot on a clean shutdown.
 */
const OF_PAGE_SIZE: usize = 16;
const OF_VERSION: usize = 18;
const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LumbungHeader {
    pub magic: [u8; 16],
    pub page_size: u16,
    pub format_version: u8,
}

impl Default for LumbungHeader {
    fn default() -> Self {
        Self {
            magic: *LUMBUNG_MAGIC,
            page_size: PAGE_SIZE as u16,
            format_version: FORMAT_VERSION,
        }
    }
}

impl LumbungHeader {
    pub fn write_to(&self, page: &mut [u8]) {
        page[..16].copy_from_slice(&self.magic);
        page[OF_PAGE_SIZE..OF_PAGE_SIZE + 2].copy_from_slice(&self.page_size.to_be_bytes());
        page[OF_VERSION] = self.format_version;
    }

    pub fn from_page(page: &[u8]) -> Result<Self, DatabaseError> {
        let mut magic = [0u8; 16];
        magic.copy_from_slice(&page[..16]);
        if &magic != LUMBUNG_MAGIC {
            return Err(DatabaseError::CorruptedPage {
                page_no: 1,
                reason: "bad magic".to_string(),
            });
        }
        let header = Self {
            magic,
            page_size: read_u16(page, OF_PAGE_SIZE),
            format_version: page[OF_VERSION],
        };
        if header.page_size as usize != PAGE_SIZE || header.format_version > FORMAT_VERSION {
            return Err(DatabaseError::CorruptedPage {
                page_no: 1,
                reason: format!(
                    "unsupported page size {} or format version {}",
                    header.page_size, header.format_version
                ),
            });
        }
        Ok(header)
    }
}

/// Raw bytes of a brand-new page 1, already stamped as open.
pub fn init_page_one() -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE];
    LumbungHeader::default().write_to(&mut page);
    set_open_stamp(&mut page);
    page
}

pub fn set_open_stamp(page: &mut [u8]) {
    let stamp: [u8; VC_LEN] = rand::random();
    page[OF_VC..OF_VC + VC_LEN].copy_from_slice(&stamp);
}

pub fn set_close_stamp(page: &mut [u8]) {
    page.copy_within(OF_VC..OF_VC + VC_LEN, OF_VC + VC_LEN);
}

/// True when the previous run shut down cleanly.
pub fn check_stamp(page: &[u8]) -> bool {
    page[OF_VC..OF_VC + VC_LEN] == page[OF_VC + VC_LEN..OF_VC + 2 * VC_LEN]
}
