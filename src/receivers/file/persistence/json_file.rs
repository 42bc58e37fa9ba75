// SPDX-License-Identifier: Apache-2.0

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use portable_atomic::{AtomicU64, Ordering};
use serde::Serialize;

use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::persistence::schema::StateMap;

/// The on-disk state file.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved state. A missing file is an empty state.
    pub fn load(&self) -> Result<StateMap> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StateMap::new()),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "failed to open state file {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| {
            Error::Persistence(format!(
                "failed to parse state file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    pub fn save(&self, state: &StateMap) -> Result<()> {
        atomic_write(&self.path, state)
    }
}

/// Write `value` as JSON next to `path` and rename it into place.
pub fn atomic_write<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    // pid and counter keep concurrent writers off each other's temp files
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let res = write_synced(&temp_path, value).and_then(|_| {
        fs::rename(&temp_path, path)
            .map_err(|e| Error::Persistence(format!("failed to rename state file: {}", e)))
    });
    if res.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    res
}

fn write_synced<T: Serialize + ?Sized>(temp_path: &Path, value: &T) -> Result<()> {
    let file = File::create(temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| Error::Persistence(format!("failed to write state: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush state: {}", e)))?;

    let file = writer
        .into_inner()
        .map_err(|e| Error::Persistence(format!("failed to flush state: {}", e.error())))?;
    file.sync_all()
        .map_err(|e| Error::Persistence(format!("failed to sync state: {}", e)))?;

    Ok(())
}
