pub mod booter;
pub mod bplus_tree;
pub mod cache;
pub mod data_item;
pub mod data_manager;
pub mod header;
pub mod ledger;
pub mod log_record;
pub mod node;
pub mod page_cache;
pub mod page_index;
pub mod recovery;
pub mod storage_manager;
pub mod wal;

const LUMBUNG_MAGIC: &[u8; 16] = b"LUMBUNG DB v0.1\0";

// validity stamp on page 1
const OF_VC: usize = 100;
const VC_LEN: usize = 8;
