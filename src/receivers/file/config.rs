// SPDX-License-Identifier: Apache-2.0

//! Runtime settings for prospectors and harvesters.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Where to start reading a file that has no resume offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartAt {
    /// Start reading from the beginning of the file
    Beginning,
    /// Start reading from the end of the file (only new content)
    #[default]
    End,
}

/// Tuning shared by every harvester of a file group
#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    /// Read buffer size in bytes
    pub buffer_size: usize,
    /// Delay between attempts to open a file that cannot be opened
    pub open_retry_interval: Duration,
    /// How often to check for more data once the end of file is reached
    pub eof_poll_interval: Duration,
    /// How long to wait for more data before treating the file as at EOF
    pub eof_timeout: Duration,
    /// A harvester that has read nothing for this long stops
    pub dead_time: Duration,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            buffer_size: 16 << 10,
            open_retry_interval: Duration::from_secs(5),
            eof_poll_interval: Duration::from_secs(1),
            eof_timeout: Duration::from_secs(10),
            dead_time: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Settings for the prospector of one file group
#[derive(Debug, Clone)]
pub struct ProspectorConfig {
    /// Glob patterns, or `-` for standard input
    pub paths: Vec<String>,
    /// Extra key/value pairs attached to every event of this group
    pub fields: Arc<BTreeMap<String, String>>,
    /// Interval between filesystem scans
    pub scan_interval: Duration,
    /// Start policy for files found on the first scan without saved state
    pub start_at: StartAt,
    /// Seek to the end of files that appear after startup, including
    /// replacements of rotated files
    pub tail_on_rotate: bool,
    pub harvester: HarvesterConfig,
}

impl Default for ProspectorConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            fields: Arc::new(BTreeMap::new()),
            scan_interval: Duration::from_secs(10),
            start_at: StartAt::End,
            tail_on_rotate: false,
            harvester: HarvesterConfig::default(),
        }
    }
}

impl ProspectorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.paths.is_empty() {
            return Err("At least one path must be specified per file group".to_string());
        }
        if self.scan_interval.is_zero() {
            return Err("Scan interval must be greater than zero".to_string());
        }
        if self.harvester.buffer_size == 0 {
            return Err("Harvester buffer size must be greater than zero".to_string());
        }
        Ok(())
    }

    /// The dead time doubles as the age limit for files first seen by a scan.
    pub fn dead_time(&self) -> Duration {
        self.harvester.dead_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ProspectorConfig::default();
        assert_eq!(Duration::from_secs(10), cfg.scan_interval);
        assert_eq!(Duration::from_secs(86400), cfg.dead_time());
        assert_eq!(16384, cfg.harvester.buffer_size);
        assert_eq!(StartAt::End, cfg.start_at);
    }

    #[test]
    fn validate_requires_paths() {
        let mut cfg = ProspectorConfig::default();
        assert!(cfg.validate().is_err());

        cfg.paths = vec!["/var/log/*.log".to_string()];
        assert!(cfg.validate().is_ok());

        cfg.scan_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }
}
