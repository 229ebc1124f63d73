use std::path::{Path, PathBuf};

pub mod entry;
pub mod error;
pub mod page;

// Common type aliases
pub type PageNo = u32;
pub type Uid = u64;
pub type Xid = u64;

// Constants shared by every on-disk structure
pub const PAGE_SIZE: usize = 8192;
pub const SUPER_XID: Xid = 0; // always committed, owns index nodes

pub const XID_SUFFIX: &str = "xid";
pub const DB_SUFFIX: &str = "db";
pub const LOG_SUFFIX: &str = "log";
pub const BOOT_SUFFIX: &str = "bt";
pub const BOOT_TMP_SUFFIX: &str = "bt_tmp";

/// `<base>.<suffix>`, keeping any extension `base` already has.
pub fn suffixed_path<P: AsRef<Path>>(base: P, suffix: &str) -> PathBuf {
    let mut path = base.as_ref().as_os_str().to_os_string();
    path.push(".");
    path.push(suffix);
    PathBuf::from(path)
}

/// Packs a page number and an in-page offset into a single uid.
pub fn address_to_uid(page_no: PageNo, offset: u16) -> Uid {
    ((page_no as u64) << 32) | offset as u64
}

/// Splits a uid back into `(page_no, offset)`.
pub fn uid_to_address(uid: Uid) -> (PageNo, u16) {
    let offset = (uid & 0xFFFF) as u16;
    let page_no = (uid >> 32) as PageNo;
    (page_no, offset)
}

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_be_bytes(buf)
}
