use crate::types::{
    PageNo, Uid, Xid, address_to_uid, error::DatabaseError, read_u16, read_u32, read_u64,
    uid_to_address,
};

/*
 * Insert record: [type=0][xid:8][page_no:4][offset:2][raw ...]
 * Update record: [type=1][xid:8][uid:8][old_raw ...][new_raw ...]
 * old_raw and new_raw always have the same length.
 */
const LOG_TYPE_INSERT: u8 = 0;
const LOG_TYPE_UPDATE: u8 = 1;

const OF_TYPE: usize = 0;
const OF_XID: usize = OF_TYPE + 1;
const OF_INSERT_PAGE_NO: usize = OF_XID + 8;
const OF_INSERT_OFFSET: usize = OF_INSERT_PAGE_NO + 4;
const OF_INSERT_RAW: usize = OF_INSERT_OFFSET + 2;
const OF_UPDATE_UID: usize = OF_XID + 8;
const OF_UPDATE_RAW: usize = OF_UPDATE_UID + 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Insert {
        xid: Xid,
        page_no: PageNo,
        offset: u16,
        raw: Vec<u8>,
    },
    Update {
        xid: Xid,
        uid: Uid,
        old_raw: Vec<u8>,
        new_raw: Vec<u8>,
    },
}

impl LogRecord {
    pub fn xid(&self) -> Xid {
        match self {
            LogRecord::Insert { xid, .. } | LogRecord::Update { xid, .. } => *xid,
        }
    }

    pub fn page_no(&self) -> PageNo {
        match self {
            LogRecord::Insert { page_no, .. } => *page_no,
            LogRecord::Update { uid, .. } => uid_to_address(*uid).0,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            LogRecord::Insert {
                xid,
                page_no,
                offset,
                raw,
            } => {
                let mut bytes = Vec::with_capacity(OF_INSERT_RAW + raw.len());
                bytes.push(LOG_TYPE_INSERT);
                bytes.extend_from_slice(&xid.to_be_bytes());
                bytes.extend_from_slice(&page_no.to_be_bytes());
                bytes.extend_from_slice(&offset.to_be_bytes());
                bytes.extend_from_slice(raw);
                bytes
            }
            LogRecord::Update {
                xid,
                uid,
                old_raw,
                new_raw,
            } => {
                let mut bytes = Vec::with_capacity(OF_UPDATE_RAW + old_raw.len() * 2);
                bytes.push(LOG_TYPE_UPDATE);
                bytes.extend_from_slice(&xid.to_be_bytes());
                bytes.extend_from_slice(&uid.to_be_bytes());
                bytes.extend_from_slice(old_raw);
                bytes.extend_from_slice(new_raw);
                bytes
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatabaseError> {
        let too_short = || DatabaseError::CorruptedLog {
            reason: format!("record of {} bytes is too short", bytes.len()),
        };
        match bytes.first() {
            Some(&LOG_TYPE_INSERT) => {
                if bytes.len() < OF_INSERT_RAW {
                    return Err(too_short());
                }
                Ok(LogRecord::Insert {
                    xid: read_u64(bytes, OF_XID),
                    page_no: read_u32(bytes, OF_INSERT_PAGE_NO),
                    offset: read_u16(bytes, OF_INSERT_OFFSET),
                    raw: bytes[OF_INSERT_RAW..].to_vec(),
                })
            }
            Some(&LOG_TYPE_UPDATE) => {
                if bytes.len() < OF_UPDATE_RAW || (bytes.len() - OF_UPDATE_RAW) % 2 != 0 {
                    return Err(too_short());
                }
                let half = (bytes.len() - OF_UPDATE_RAW) / 2;
                let middle = OF_UPDATE_RAW + half;
                Ok(LogRecord::Update {
                    xid: read_u64(bytes, OF_XID),
                    uid: read_u64(bytes, OF_UPDATE_UID),
                    old_raw: bytes[OF_UPDATE_RAW..middle].to_vec(),
                    new_raw: bytes[middle..].to_vec(),
                })
            }
            Some(other) => Err(DatabaseError::CorruptedLog {
                reason: format!("unknown record type {}", other),
            }),
            None => Err(too_short()),
        }
    }
}

pub fn insert_record(xid: Xid, page_no: PageNo, offset: u16, raw: &[u8]) -> Vec<u8> {
    LogRecord::Insert {
        xid,
        page_no,
        offset,
        raw: raw.to_vec(),
    }
    .to_bytes()
}

pub fn update_record(xid: Xid, page_no: PageNo, offset: u16, old_raw: &[u8], new_raw: &[u8]) -> Vec<u8> {
    LogRecord::Update {
        xid,
        uid: address_to_uid(page_no, offset),
        old_raw: old_raw.to_vec(),
        new_raw: new_raw.to_vec(),
    }
    .to_bytes()
}
