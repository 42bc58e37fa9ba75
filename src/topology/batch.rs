// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct SpoolConfig {
    pub max_size: usize,
    pub idle_timeout: Duration,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            max_size: 1024,
            idle_timeout: Duration::from_secs(5),
        }
    }
}

/// Fixed-capacity buffer of pending items with an idle deadline.
///
/// Items keep arrival order. A batch is released either when the buffer
/// reaches `max_size` or, through [`Spool::should_flush`], once the idle
/// deadline has passed with items still waiting.
pub(crate) struct Spool<T> {
    items: Vec<T>,
    max_size: usize,
    idle_timeout: Duration,
    next_flush: Instant,
}

impl<T> Spool<T> {
    pub(crate) fn new(config: &SpoolConfig) -> Spool<T> {
        let max_size = config.max_size.max(1);
        Self {
            items: Vec::with_capacity(max_size),
            max_size,
            idle_timeout: config.idle_timeout,
            next_flush: Instant::now() + config.idle_timeout,
        }
    }

    /// Timer period for the owning task, half the idle interval.
    pub(crate) fn tick_interval(&self) -> Duration {
        (self.idle_timeout / 2).max(Duration::from_millis(1))
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn take_batch(&mut self) -> Vec<T> {
        self.next_flush = Instant::now() + self.idle_timeout;
        std::mem::replace(&mut self.items, Vec::with_capacity(self.max_size))
    }

    pub(crate) fn should_flush(&self, now: Instant) -> bool {
        !self.items.is_empty() && now >= self.next_flush
    }

    /// Append one item, returning a full batch when capacity is reached.
    pub(crate) fn offer(&mut self, item: T) -> Option<Vec<T>> {
        self.items.push(item);
        if self.items.len() >= self.max_size {
            return Some(self.take_batch());
        }
        None
    }
}
