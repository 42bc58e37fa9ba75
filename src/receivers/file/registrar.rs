// SPDX-License-Identifier: Apache-2.0

//! Registrar: the single writer of the state file.
//!
//! Receives batches only after the collector acknowledged them, so the
//! offsets it saves never run ahead of delivery. Each save replaces the whole
//! file atomically.

use std::error::Error as StdError;

use tracing::{debug, error, info};

use crate::bounded_channel::BoundedReceiver;
use crate::receivers::file::event::FileEvent;
use crate::receivers::file::persistence::{FileState, StateFile, StateMap};

pub struct Registrar {
    state_file: StateFile,
    state: StateMap,
    batches_rx: BoundedReceiver<Vec<FileEvent>>,
    dirty: bool,
}

impl Registrar {
    /// `initial` holds the states the prospectors resumed from; they are kept
    /// until newer positions replace them.
    pub fn new(
        state_file: StateFile,
        initial: Vec<FileState>,
        batches_rx: BoundedReceiver<Vec<FileEvent>>,
    ) -> Self {
        let state = initial
            .into_iter()
            .map(|s| (s.source.clone(), s))
            .collect::<StateMap>();

        Self {
            state_file,
            dirty: !state.is_empty(),
            state,
            batches_rx,
        }
    }

    pub async fn run(mut self) -> Result<(), Box<dyn StdError + Send + Sync>> {
        info!(path = %self.state_file.path().display(), "Registrar started.");

        while let Some(batch) = self.batches_rx.next().await {
            let updated = self.record(&batch);
            debug!(events = batch.len(), files = updated, "Registrar received batch.");

            if updated > 0 || self.dirty {
                self.persist();
            }
        }

        debug!("Batch queue closed, stopping registrar.");
        Ok(())
    }

    /// Fold a batch into the state map. Later events for a file overwrite
    /// earlier ones. Returns the number of events that carried a position.
    ///
    /// After a rotation the renamed file and its replacement both report the
    /// path they were opened under. The identity last seen at that path owns
    /// the path key; the other one is kept under [`displaced_key`] so its
    /// position still survives a restart.
    pub fn record(&mut self, batch: &[FileEvent]) -> usize {
        let mut updated = 0;
        for event in batch {
            if let Some(state) = FileState::after(event) {
                self.insert(state);
                updated += 1;
            }
        }
        updated
    }

    fn insert(&mut self, state: FileState) {
        self.state.remove(&displaced_key(&state));

        let file_id = state.file_id;
        if let Some(previous) = self.state.insert(state.source.clone(), state) {
            if previous.file_id != file_id {
                debug!(
                    source = %previous.source,
                    file_id = %previous.file_id,
                    "Keeping position of a file displaced from its path."
                );
                self.state.insert(displaced_key(&previous), previous);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &StateMap {
        &self.state
    }

    fn persist(&mut self) {
        match self.state_file.save(&self.state) {
            Ok(()) => self.dirty = false,
            Err(e) => {
                // keep the in-memory state; the next batch tries again
                error!(path = %self.state_file.path().display(), error = %e, "Failed to save state.");
                self.dirty = true;
            }
        }
    }
}

/// Key for a file whose path now belongs to another file.
fn displaced_key(state: &FileState) -> String {
    format!("{}#{}", state.source, state.file_id)
}
