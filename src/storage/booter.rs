use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::types::{BOOT_SUFFIX, BOOT_TMP_SUFFIX, error::DatabaseError, suffixed_path};

/// Small file holding the engine's startup pointers, replaced atomically.
pub struct Booter {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl Booter {
    fn paths(path: &Path) -> (PathBuf, PathBuf) {
        (suffixed_path(path, BOOT_SUFFIX), suffixed_path(path, BOOT_TMP_SUFFIX))
    }

    fn remove_bad_tmp(tmp_path: &Path) -> Result<(), DatabaseError> {
        if tmp_path.exists() {
            warn!(path = %tmp_path.display(), "removing stale boot tmp file");
            fs::remove_file(tmp_path)?;
        }
        Ok(())
    }

    pub fn create<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<Self, DatabaseError> {
        let (path, tmp_path) = Self::paths(path.as_ref());
        Self::remove_bad_tmp(&tmp_path)?;
        if path.exists() {
            return Err(DatabaseError::BootFile {
                reason: format!("{} already exists", path.display()),
            });
        }
        let booter = Self { path, tmp_path };
        booter.update(data)?;
        info!(path = %booter.path.display(), "created boot file");
        Ok(booter)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let (path, tmp_path) = Self::paths(path.as_ref());
        Self::remove_bad_tmp(&tmp_path)?;
        if !path.exists() {
            return Err(DatabaseError::BootFile {
                reason: format!("{} does not exist", path.display()),
            });
        }
        Ok(Self { path, tmp_path })
    }

    pub fn load(&self) -> Result<Vec<u8>, DatabaseError> {
        Ok(fs::read(&self.path)?)
    }

    /// Writes `data` to the tmp file, syncs it and renames it over the
    /// boot file.
    pub fn update(&self, data: &[u8]) -> Result<(), DatabaseError> {
        let mut tmp = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.tmp_path)?;
        tmp.write_all(data)?;
        tmp.sync_all()?;
        drop(tmp);
        fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }
}
