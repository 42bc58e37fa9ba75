// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::receivers::file::event::FileEvent;
use crate::receivers::file::input::FileId;

/// Persisted position of one file.
///
/// Serialized as `{"source": ..., "offset": ..., "inode": ..., "device": ...}`
/// on Unix and with `vol`, `idxhi` and `idxlo` on Windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub source: String,
    #[serde(default)]
    pub offset: i64,
    #[serde(flatten)]
    pub file_id: FileId,
}

impl FileState {
    /// Position just past `event`, or `None` for events that carry no file
    /// identity (standard input).
    pub fn after(event: &FileEvent) -> Option<Self> {
        if event.is_stdin() {
            return None;
        }
        let file_id = event.file_id?;
        Some(Self {
            source: event.source.to_string(),
            offset: event.end_offset(),
            file_id,
        })
    }
}

/// Full persisted state, keyed by source path.
pub type StateMap = BTreeMap<String, FileState>;
