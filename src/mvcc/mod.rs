pub mod lock_table;
pub mod transaction;
pub mod version_manager;
pub mod visibility;
