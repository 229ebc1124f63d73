use crate::types::{Xid, error::DatabaseError, read_u64};

/*
 * Entry layout (the payload of a data item)
 * ┌──────────┬──────────┬──────────────────────────┐
 * │ xmin(8)  │ xmax(8)  │ payload ...              │
 * └──────────┴──────────┴──────────────────────────┘
 */

pub const OF_XMIN: usize = 0;
pub const OF_XMAX: usize = OF_XMIN + 8;
pub const OF_PAYLOAD: usize = OF_XMAX + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionHeader {
    pub xmin: Xid,
    pub xmax: Xid,
}

impl VersionHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatabaseError> {
        if bytes.len() < OF_PAYLOAD {
            return Err(DatabaseError::CorruptedEntry {
                reason: format!("Entry too short: {} bytes", bytes.len()),
            });
        }
        Ok(Self {
            xmin: read_u64(bytes, OF_XMIN),
            xmax: read_u64(bytes, OF_XMAX),
        })
    }
}

/// Serializes a fresh version created by `xid` (xmax = 0).
pub fn wrap_entry(xid: Xid, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(OF_PAYLOAD + payload.len());
    bytes.extend_from_slice(&xid.to_be_bytes());
    bytes.extend_from_slice(&0u64.to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Stamps `xmax` into an entry buffer in place.
pub fn set_xmax(bytes: &mut [u8], xmax: Xid) {
    bytes[OF_XMAX..OF_PAYLOAD].copy_from_slice(&xmax.to_be_bytes());
}
