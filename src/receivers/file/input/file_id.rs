// SPDX-License-Identifier: Apache-2.0

//! Platform file identity.
//!
//! A path can be renamed, rotated or replaced while the agent runs, so files
//! are tracked by the identity the OS assigns to the underlying file: device
//! and inode on Unix, volume serial and file index on Windows.

use serde::{Deserialize, Serialize};
use std::fs::{File, Metadata};
use std::io;
use std::path::Path;

/// Opaque identity of an on-disk file, stable across renames.
///
/// The field names double as the keys of the persisted state file.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId {
    #[serde(default)]
    inode: u64,
    #[serde(default)]
    device: u64,
}

/// Opaque identity of an on-disk file, stable across renames.
///
/// The field names double as the keys of the persisted state file.
#[cfg(windows)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId {
    #[serde(default)]
    vol: u32,
    #[serde(default)]
    idxhi: u32,
    #[serde(default)]
    idxlo: u32,
}

impl FileId {
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            inode: metadata.ino(),
            device: metadata.dev(),
        }
    }

    #[cfg(unix)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        Ok(Self::from_metadata(&file.metadata()?))
    }

    #[cfg(windows)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            BY_HANDLE_FILE_INFORMATION, GetFileInformationByHandle,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };

        let result = unsafe { GetFileInformationByHandle(handle, &mut info) };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            vol: info.dwVolumeSerialNumber,
            idxhi: info.nFileIndexHigh,
            idxlo: info.nFileIndexLow,
        })
    }

    /// Identity of the file at `path`, given metadata already obtained for it.
    ///
    /// Unix reads the identity straight from the metadata. Windows only
    /// exposes the file index through an open handle.
    #[cfg(unix)]
    pub fn for_path(_path: &Path, metadata: &Metadata) -> io::Result<Self> {
        Ok(Self::from_metadata(metadata))
    }

    #[cfg(windows)]
    pub fn for_path(path: &Path, _metadata: &Metadata) -> io::Result<Self> {
        Self::from_path(path)
    }

    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }
}

impl std::fmt::Display for FileId {
    #[cfg(unix)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.device, self.inode)
    }

    #[cfg(windows)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.vol, self.idxhi, self.idxlo)
    }
}
