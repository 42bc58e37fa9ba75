// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

/// Failures inside the file input stages.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file error: {0}")]
    Persistence(String),

    #[error("invalid file group: {0}")]
    Config(String),

    #[error("{} is not a regular file", .0.display())]
    NotRegularFile(PathBuf),

    /// The spooler went away; harvesters treat this as a shutdown.
    #[error("event queue closed")]
    ChannelSend,
}

impl From<crate::bounded_channel::SendError> for Error {
    fn from(_: crate::bounded_channel::SendError) -> Self {
        Error::ChannelSend
    }
}

pub type Result<T> = std::result::Result<T, Error>;
