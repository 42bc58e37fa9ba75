// SPDX-License-Identifier: Apache-2.0

//! Tails a single file on a dedicated thread.
//!
//! A harvester opens its file (retrying until it can), seeks to its starting
//! offset and emits one [`FileEvent`] per line into the spooler queue. The
//! blocking send is what throttles file reads to the pace of delivery.
//!
//! A harvester survives truncation by rewinding to the start of the file. It
//! stops once the file has produced nothing for the configured dead time, and
//! reports the offset it reached so the prospector can resume the file later.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{self, BoundedReceiver, BoundedSender, TryRecv};
use crate::receivers::file::config::{HarvesterConfig, StartAt};
use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::event::{FileEvent, STDIN_SOURCE};
use crate::receivers::file::input::{FileId, Line, LineReader};

pub struct Harvester {
    source: Arc<str>,
    path: PathBuf,
    offset: i64,
    start_at: StartAt,
    config: HarvesterConfig,
    fields: Arc<BTreeMap<String, String>>,
    events_tx: BoundedSender<FileEvent>,
    line: u64,
    last_read: Instant,
}

impl Harvester {
    /// Create a harvester for `path`. A positive `offset` resumes at that
    /// byte; otherwise `start_at` picks the initial position.
    pub fn new(
        path: impl Into<PathBuf>,
        offset: i64,
        start_at: StartAt,
        config: HarvesterConfig,
        fields: Arc<BTreeMap<String, String>>,
        events_tx: BoundedSender<FileEvent>,
    ) -> Self {
        let path = path.into();
        let source: Arc<str> = Arc::from(path.to_string_lossy().as_ref());
        Self {
            source,
            path,
            offset: offset.max(0),
            start_at,
            config,
            fields,
            events_tx,
            line: 0,
            last_read: Instant::now(),
        }
    }

    /// Run the harvester on its own named thread.
    pub fn spawn(self) -> io::Result<HarvesterHandle> {
        let (finished_tx, finished_rx) = bounded_channel::bounded(1);
        let name = format!("harvester:{}", self.source);

        std::thread::Builder::new().name(name).spawn(move || {
            let offset = self.run();
            let _ = finished_tx.send_blocking(offset);
        })?;

        Ok(HarvesterHandle {
            finished_rx,
            state: HarvesterState::Running,
        })
    }

    /// Harvest until the file goes stale or an unrecoverable error occurs,
    /// returning the offset reached.
    pub fn run(mut self) -> i64 {
        let res = if &*self.source == STDIN_SOURCE {
            self.harvest_stdin()
        } else {
            self.harvest_file()
        };

        match res {
            Ok(()) => {}
            Err(Error::ChannelSend) => {
                debug!(source = %self.source, "Event queue closed, stopping harvester.")
            }
            Err(e) => {
                error!(source = %self.source, offset = self.offset, error = %e, "Harvester failed.")
            }
        }

        self.offset
    }

    fn harvest_file(&mut self) -> Result<()> {
        let file = self.open();

        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(Error::NotRegularFile(self.path.clone()));
        }
        let file_id = FileId::from_file(&file)?;

        let mut reader = LineReader::new(
            file,
            self.config.buffer_size,
            self.config.eof_poll_interval,
            self.config.eof_timeout,
        );

        if self.offset > 0 {
            info!(source = %self.source, offset = self.offset, "Resuming harvester.");
            reader.seek_to(self.offset as u64)?;
        } else if self.start_at == StartAt::End {
            self.offset = reader.seek_to_end()? as i64;
            info!(source = %self.source, offset = self.offset, "Started harvester at end of file.");
        } else {
            info!(source = %self.source, "Started harvester at beginning of file.");
        }

        self.last_read = Instant::now();
        loop {
            match reader.read_line()? {
                Some(line) => {
                    self.last_read = Instant::now();
                    self.emit(line, Some(file_id))?;
                }
                None => {
                    let size = reader.get_ref().metadata()?.len() as i64;
                    if size < self.offset {
                        warn!(
                            source = %self.source,
                            size,
                            offset = self.offset,
                            "File truncated, seeking to beginning."
                        );
                        reader.seek_to(0)?;
                        self.offset = 0;
                        continue;
                    }

                    if self.is_stale() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn harvest_stdin(&mut self) -> Result<()> {
        info!("Started harvester on standard input.");

        let mut reader = LineReader::new(
            io::stdin(),
            self.config.buffer_size,
            self.config.eof_poll_interval,
            self.config.eof_timeout,
        );

        self.last_read = Instant::now();
        loop {
            match reader.read_line()? {
                Some(line) => {
                    self.last_read = Instant::now();
                    self.emit(line, None)?;
                }
                None => {
                    if self.is_stale() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Open the file, retrying until it succeeds.
    fn open(&self) -> File {
        loop {
            match File::open(&self.path) {
                Ok(file) => return file,
                Err(e) => {
                    warn!(
                        source = %self.source,
                        error = %e,
                        retry_in = ?self.config.open_retry_interval,
                        "Failed to open file, will retry."
                    );
                    std::thread::sleep(self.config.open_retry_interval);
                }
            }
        }
    }

    fn is_stale(&self) -> bool {
        let idle = self.last_read.elapsed();
        if idle > self.config.dead_time {
            info!(
                source = %self.source,
                offset = self.offset,
                idle = ?idle,
                "Stopping harvester, file has not changed within dead time."
            );
            return true;
        }
        false
    }

    fn emit(&mut self, line: Line, file_id: Option<FileId>) -> Result<()> {
        self.line += 1;
        let consumed = line.len() as i64;

        let event = FileEvent {
            source: self.source.clone(),
            offset: self.offset,
            line: self.line,
            text: Bytes::from(line.text),
            terminator_len: line.terminator_len,
            fields: self.fields.clone(),
            file_id,
        };
        self.events_tx.send_blocking(event)?;
        self.offset += consumed;

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HarvesterState {
    Running,
    Finished(Option<i64>),
}

/// The prospector's view of a running harvester.
pub struct HarvesterHandle {
    finished_rx: BoundedReceiver<i64>,
    state: HarvesterState,
}

impl HarvesterHandle {
    /// A handle for a file that is tracked but not being harvested, such as
    /// an old file skipped by a scan. `offset` is where harvesting should
    /// resume if the file changes.
    pub fn idle(offset: i64) -> Self {
        let (_, finished_rx) = bounded_channel::bounded(1);
        Self {
            finished_rx,
            state: HarvesterState::Finished(Some(offset)),
        }
    }

    pub fn is_finished(&mut self) -> bool {
        self.poll();
        matches!(self.state, HarvesterState::Finished(_))
    }

    /// Offset the harvester stopped at, once it has stopped.
    pub fn finished_offset(&mut self) -> Option<i64> {
        self.poll();
        match self.state {
            HarvesterState::Finished(offset) => offset,
            HarvesterState::Running => None,
        }
    }

    fn poll(&mut self) {
        if self.state != HarvesterState::Running {
            return;
        }
        match self.finished_rx.try_recv() {
            TryRecv::Item(offset) => self.state = HarvesterState::Finished(Some(offset)),
            // the thread went away without reporting
            TryRecv::Disconnected => self.state = HarvesterState::Finished(None),
            TryRecv::Empty => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    fn fast_config() -> HarvesterConfig {
        HarvesterConfig {
            buffer_size: 64,
            open_retry_interval: Duration::from_millis(10),
            eof_poll_interval: Duration::from_millis(5),
            eof_timeout: Duration::from_millis(20),
            dead_time: Duration::from_secs(60),
        }
    }

    fn append(path: &std::path::Path, data: &[u8]) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(data).unwrap();
    }

    fn start(
        path: &std::path::Path,
        offset: i64,
        start_at: StartAt,
        config: HarvesterConfig,
    ) -> (HarvesterHandle, BoundedReceiver<FileEvent>) {
        let (tx, rx) = bounded_channel::bounded(16);
        let mut fields = BTreeMap::new();
        fields.insert("type".to_string(), "syslog".to_string());
        let handle = Harvester::new(path, offset, start_at, config, Arc::new(fields), tx)
            .spawn()
            .unwrap();
        (handle, rx)
    }

    #[test]
    fn reads_lines_from_beginning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"first\nsecond\r\nthird\n");

        let (_handle, rx) = start(&path, 0, StartAt::Beginning, fast_config());

        let e1 = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        let e2 = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        let e3 = rx.recv_timeout(RECV_TIMEOUT).unwrap();

        assert_eq!((0, 1, &b"first"[..]), (e1.offset, e1.line, &e1.text[..]));
        assert_eq!((6, 2, &b"second"[..]), (e2.offset, e2.line, &e2.text[..]));
        assert_eq!((14, 3, &b"third"[..]), (e3.offset, e3.line, &e3.text[..]));
        assert_eq!(20, e3.end_offset());

        assert_eq!(path.to_string_lossy(), &*e1.source);
        assert_eq!(Some("syslog"), e1.fields.get("type").map(String::as_str));
        assert_eq!(Some(FileId::from_path(&path).unwrap()), e1.file_id);
    }

    #[test]
    fn resumes_from_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"first\nsecond\n");

        let (_handle, rx) = start(&path, 6, StartAt::Beginning, fast_config());

        let e = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(6, e.offset);
        assert_eq!(1, e.line);
        assert_eq!(&b"second"[..], &e.text[..]);
    }

    #[test]
    fn start_at_end_skips_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"old line\n");

        let (_handle, rx) = start(&path, 0, StartAt::End, fast_config());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_none());

        append(&path, b"new line\n");
        let e = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(9, e.offset);
        assert_eq!(&b"new line"[..], &e.text[..]);
    }

    #[test]
    fn waits_for_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("later.log");

        let (_handle, rx) = start(&path, 0, StartAt::Beginning, fast_config());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_none());

        append(&path, b"hello\n");
        let e = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(&b"hello"[..], &e.text[..]);
    }

    #[test]
    fn recovers_from_truncation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"aaaaaaaaaa\nbbbbbbbbbb\n");

        let (mut handle, rx) = start(&path, 0, StartAt::Beginning, fast_config());
        rx.recv_timeout(RECV_TIMEOUT).unwrap();
        let e2 = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(22, e2.end_offset());

        std::fs::write(&path, b"c\n").unwrap();

        let e3 = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(0, e3.offset);
        assert_eq!(3, e3.line, "same harvester keeps counting lines");
        assert_eq!(&b"c"[..], &e3.text[..]);
        assert!(!handle.is_finished());
    }

    #[test]
    fn stops_after_dead_time() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"one\ntwo\n");

        let config = HarvesterConfig {
            dead_time: Duration::from_millis(30),
            ..fast_config()
        };
        let (mut handle, rx) = start(&path, 0, StartAt::Beginning, config);
        rx.recv_timeout(RECV_TIMEOUT).unwrap();
        rx.recv_timeout(RECV_TIMEOUT).unwrap();

        let deadline = Instant::now() + RECV_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(Some(8), handle.finished_offset());
    }

    #[cfg(unix)]
    #[test]
    fn directory_is_rejected() {
        let dir = TempDir::new().unwrap();

        let (mut handle, _rx) = start(dir.path(), 0, StartAt::Beginning, fast_config());

        let deadline = Instant::now() + RECV_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(Some(0), handle.finished_offset());
    }

    #[test]
    fn idle_handle_reports_offset() {
        let mut handle = HarvesterHandle::idle(42);
        assert!(handle.is_finished());
        assert_eq!(Some(42), handle.finished_offset());
    }
}
