// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::receivers::file::input::FileId;

/// Source name used for events read from standard input.
pub const STDIN_SOURCE: &str = "-";

/// One line read by a harvester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Path the line was read from, or `-` for standard input
    pub source: Arc<str>,
    /// Byte offset of the start of the line
    pub offset: i64,
    /// 1-based line number within the harvester's lifetime
    pub line: u64,
    /// Line contents without the terminator
    pub text: Bytes,
    /// Length of the terminator that followed `text`
    pub terminator_len: u8,
    /// Field tags configured for the file group
    pub fields: Arc<BTreeMap<String, String>>,
    /// Identity of the file when the harvester opened it
    pub file_id: Option<FileId>,
}

impl FileEvent {
    /// Offset just past this line, where a restarted harvester should resume.
    pub fn end_offset(&self) -> i64 {
        self.offset + self.text.len() as i64 + self.terminator_len as i64
    }

    pub fn is_stdin(&self) -> bool {
        &*self.source == STDIN_SOURCE
    }
}
