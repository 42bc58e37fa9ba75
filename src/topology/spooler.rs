// SPDX-License-Identifier: Apache-2.0

use std::error::Error;

use tokio::select;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::bounded_channel::{BoundedReceiver, BoundedSender};
use crate::receivers::file::FileEvent;
use crate::topology::batch::{Spool, SpoolConfig};

/// Collects events from every harvester into batches for the publisher.
pub struct Spooler {
    config: SpoolConfig,
    events_rx: BoundedReceiver<FileEvent>,
    batches_tx: BoundedSender<Vec<FileEvent>>,
}

impl Spooler {
    pub fn new(
        config: SpoolConfig,
        events_rx: BoundedReceiver<FileEvent>,
        batches_tx: BoundedSender<Vec<FileEvent>>,
    ) -> Self {
        Self {
            config,
            events_rx,
            batches_tx,
        }
    }

    pub async fn run(mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut spool = Spool::<FileEvent>::new(&self.config);
        let mut flush_timer = tokio::time::interval(spool.tick_interval());
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            max_size = self.config.max_size,
            idle_timeout = ?self.config.idle_timeout,
            "Spooler started."
        );

        loop {
            select! {
                biased;

                _ = flush_timer.tick() => {
                    if spool.should_flush(Instant::now()) {
                        let batch = spool.take_batch();
                        debug!(batch_size = batch.len(), "Flushing spool on idle timeout.");
                        self.batches_tx.send(batch).await?;
                    }
                },

                event = self.events_rx.next() => {
                    let Some(event) = event else {
                        debug!("Event queue closed, flushing spool and exiting.");
                        if !spool.is_empty() {
                            self.batches_tx.send(spool.take_batch()).await?;
                        }
                        return Ok(());
                    };

                    if let Some(batch) = spool.offer(event) {
                        debug!(batch_size = batch.len(), "Flushing full spool.");
                        self.batches_tx.send(batch).await?;
                    }
                },
            }
        }
    }
}
