// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::receivers::file::StartAt;

/// Where to start reading files found at startup without saved state
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum StartAtArg {
    /// Read the whole file
    Beginning,
    /// Only read lines written from now on
    #[default]
    End,
}

impl From<StartAtArg> for StartAt {
    fn from(s: StartAtArg) -> Self {
        match s {
            StartAtArg::Beginning => StartAt::Beginning,
            StartAtArg::End => StartAt::End,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// Config file, or directory of config files
    #[arg(long, env = "LOGSHIP_CONFIG")]
    pub config: PathBuf,

    /// Events per batch sent to the collector
    #[arg(long, env = "LOGSHIP_SPOOL_SIZE", default_value = "1024")]
    pub spool_size: usize,

    /// Harvester read buffer size in bytes
    #[arg(long, env = "LOGSHIP_HARVEST_BUFFER_SIZE", default_value = "16384")]
    pub harvest_buffer_size: usize,

    /// Send a partial batch after this many milliseconds
    #[arg(long, env = "LOGSHIP_IDLE_TIMEOUT_MS", default_value = "5000")]
    pub idle_timeout_ms: u64,

    /// How often to look for new files, in milliseconds
    #[arg(long, env = "LOGSHIP_SCAN_INTERVAL_MS", default_value = "10000")]
    pub scan_interval_ms: u64,

    /// Start position for files found at startup
    #[arg(value_enum, long, env = "LOGSHIP_START_AT", default_value = "end")]
    pub start_at: StartAtArg,

    /// Start rotated and newly created files at their end
    #[arg(long, env = "LOGSHIP_TAIL", default_value = "false")]
    pub tail: bool,

    /// Where delivered file positions are saved
    #[arg(long, env = "LOGSHIP_STATE_FILE", default_value = ".logship")]
    pub state_file: PathBuf,

    /// Only log warnings and errors
    #[arg(long, env = "LOGSHIP_QUIET", default_value = "false")]
    pub quiet: bool,

    /// Log debug output
    #[arg(long, env = "LOGSHIP_DEBUG", default_value = "false", conflicts_with = "quiet")]
    pub debug: bool,
}

impl AgentRun {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}
