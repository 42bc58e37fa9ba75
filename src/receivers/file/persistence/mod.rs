// SPDX-License-Identifier: Apache-2.0

//! Durable record of how far each file has been delivered.
//!
//! The state file is a single JSON object keyed by source path. It is only
//! ever replaced wholesale through an atomic rename, so readers see either the
//! previous or the next complete state.

mod json_file;
mod schema;

pub use json_file::{StateFile, atomic_write};
pub use schema::{FileState, StateMap};
