use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::{
    types::{LOG_SUFFIX, error::DatabaseError, read_u32, suffixed_path},
    utils::hash::rolling_checksum,
};

/*
 * Log file
 * ┌──────────────┬──────────────────────────────┬──────────────────────────────┬─────┐
 * │ checksum(4)  │ size(4) checksum(4) payload  │ size(4) checksum(4) payload  │ ... │
 * └──────────────┴──────────────────────────────┴──────────────────────────────┴─────┘
 * The header checksum folds in every complete record, framing included.
 * A record's own checksum covers its payload only.
 */
const HEADER_SIZE: u64 = 4;
const OF_SIZE: usize = 0;
const OF_CHECKSUM: usize = OF_SIZE + 4;
const OF_DATA: usize = OF_CHECKSUM + 4;

struct LogFile {
    file: File,
    checksum: u32,
    file_size: u64,
    position: u64,
}

impl LogFile {
    /// Reads the whole framed record at `position`, or `None` when it is
    /// torn or fails its checksum.
    fn read_record(&mut self, position: u64) -> Result<Option<Vec<u8>>, DatabaseError> {
        if position + OF_DATA as u64 > self.file_size {
            return Ok(None);
        }
        let mut frame = [0u8; OF_DATA];
        self.file.seek(SeekFrom::Start(position))?;
        self.file.read_exact(&mut frame)?;
        let size = read_u32(&frame, OF_SIZE) as u64;
        if position + OF_DATA as u64 + size > self.file_size {
            return Ok(None);
        }

        let mut record = vec![0u8; OF_DATA + size as usize];
        record[..OF_DATA].copy_from_slice(&frame);
        self.file.read_exact(&mut record[OF_DATA..])?;
        if rolling_checksum(0, &record[OF_DATA..]) != read_u32(&frame, OF_CHECKSUM) {
            return Ok(None);
        }
        Ok(Some(record))
    }

    fn write_header(&mut self) -> Result<(), DatabaseError> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.checksum.to_be_bytes())?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Append-only, checksummed write-ahead log.
pub struct Wal {
    path: PathBuf,
    inner: Mutex<LogFile>,
}

impl Wal {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = suffixed_path(path, LOG_SUFFIX);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.write_all(&0u32.to_be_bytes())?;
        file.sync_all()?;
        info!(path = %path.display(), "created log");
        Ok(Self {
            path,
            inner: Mutex::new(LogFile {
                file,
                checksum: 0,
                file_size: HEADER_SIZE,
                position: HEADER_SIZE,
            }),
        })
    }

    /// Opens the log, dropping any torn or unacknowledged tail.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = suffixed_path(path, LOG_SUFFIX);
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE {
            return Err(DatabaseError::BadLogFile {
                reason: format!("file is {} bytes, shorter than its header", file_size),
            });
        }
        let mut header = [0u8; HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;

        let mut log = LogFile {
            file,
            checksum: u32::from_be_bytes(header),
            file_size,
            position: HEADER_SIZE,
        };
        Self::check_and_remove_tail(&mut log)?;
        info!(path = %path.display(), size = log.file_size, "opened log");
        Ok(Self {
            path,
            inner: Mutex::new(log),
        })
    }

    fn check_and_remove_tail(log: &mut LogFile) -> Result<(), DatabaseError> {
        let stored = log.checksum;
        let mut checksum = 0u32;
        let mut position = HEADER_SIZE;
        // start offset of the last complete record and the checksum before it
        let mut last: Option<(u64, u32)> = None;

        while let Some(record) = log.read_record(position)? {
            last = Some((position, checksum));
            checksum = rolling_checksum(checksum, &record);
            position += record.len() as u64;
        }

        let end = if checksum == stored {
            position
        } else {
            match last {
                Some((start, before)) if before == stored => {
                    warn!(offset = start, "dropping unacknowledged log record");
                    checksum = before;
                    start
                }
                _ => {
                    return Err(DatabaseError::BadLogFile {
                        reason: format!(
                            "header checksum {:#010x} does not match replayed {:#010x}",
                            stored, checksum
                        ),
                    });
                }
            }
        };

        if end < log.file_size {
            warn!(from = log.file_size, to = end, "truncating log tail");
            log.file.set_len(end)?;
            log.file.sync_all()?;
        }
        log.checksum = checksum;
        log.file_size = end;
        log.position = HEADER_SIZE;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record and makes it durable before returning.
    pub fn log(&self, payload: &[u8]) -> Result<(), DatabaseError> {
        let mut record = Vec::with_capacity(OF_DATA + payload.len());
        record.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        record.extend_from_slice(&rolling_checksum(0, payload).to_be_bytes());
        record.extend_from_slice(payload);

        let mut log = self.inner.lock();
        let end = log.file_size;
        log.file.seek(SeekFrom::Start(end))?;
        log.file.write_all(&record)?;
        log.file.sync_data()?;
        log.file_size = end + record.len() as u64;
        log.checksum = rolling_checksum(log.checksum, &record);
        log.write_header()
    }

    /// Payload of the record under the cursor, advancing past it.
    pub fn next(&self) -> Result<Option<Vec<u8>>, DatabaseError> {
        let mut log = self.inner.lock();
        let position = log.position;
        match log.read_record(position)? {
            Some(record) => {
                log.position = position + record.len() as u64;
                Ok(Some(record[OF_DATA..].to_vec()))
            }
            None => Ok(None),
        }
    }

    pub fn rewind(&self) {
        self.inner.lock().position = HEADER_SIZE;
    }

    pub fn size(&self) -> u64 {
        self.inner.lock().file_size
    }

    pub fn close(&self) -> Result<(), DatabaseError> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}
