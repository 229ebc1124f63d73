use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{mvcc::transaction::IsolationLevel, types::error::DatabaseError};

pub const KB: u64 = 1 << 10;
pub const MB: u64 = 1 << 20;
pub const GB: u64 = 1 << 30;

pub const DEFAULT_MEMORY: u64 = 64 * MB;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base path; the engine's files share it with different extensions.
    pub path: PathBuf,
    /// Page cache budget in bytes.
    pub memory: u64,
    /// Isolation level used when a transaction does not ask for one.
    pub isolation: IsolationLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("lumbung"),
            memory: DEFAULT_MEMORY,
            isolation: IsolationLevel::default(),
        }
    }
}

impl EngineConfig {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_memory(mut self, memory: u64) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }
}

/// Parses sizes such as `64MB`, `512KB` or `1GB`.
pub fn parse_memory(value: &str) -> Result<u64, DatabaseError> {
    let invalid = || DatabaseError::InvalidMemory {
        value: value.to_string(),
    };
    let trimmed = value.trim();
    if trimmed.len() < 3 || !trimmed.is_char_boundary(trimmed.len() - 2) {
        return Err(invalid());
    }
    let (digits, unit) = trimmed.split_at(trimmed.len() - 2);
    let number: u64 = digits.trim().parse().map_err(|_| invalid())?;
    let scale = match unit.to_ascii_uppercase().as_str() {
        "KB" => KB,
        "MB" => MB,
        "GB" => GB,
        _ => return Err(invalid()),
    };
    number.checked_mul(scale).ok_or_else(invalid)
}
