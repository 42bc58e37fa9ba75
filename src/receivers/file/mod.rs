// SPDX-License-Identifier: Apache-2.0

//! Log file input.
//!
//! Prospectors discover files matching glob patterns and start one harvester
//! per file. Harvesters read lines and hand them to the spooler as
//! [`FileEvent`]s. The registrar records acknowledged positions so a restart
//! resumes where delivery left off.
//!
//! Files are tracked by identity (device and inode on Unix, volume and index
//! on Windows) so renames and rotations are followed without re-reading.

pub mod config;
pub mod error;
pub mod event;
pub mod harvester;
pub mod input;
pub mod persistence;
pub mod prospector;
pub mod registrar;

pub use config::{HarvesterConfig, ProspectorConfig, StartAt};
pub use error::{Error, Result};
pub use event::{FileEvent, STDIN_SOURCE};
pub use harvester::{Harvester, HarvesterHandle};
pub use input::{FileFinder, FileId, Line, LineReader};
pub use persistence::{FileState, StateFile, StateMap};
pub use prospector::Prospector;
pub use registrar::Registrar;
