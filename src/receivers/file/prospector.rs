// SPDX-License-Identifier: Apache-2.0

//! File discovery for one file group.
//!
//! Architecture:
//! - The prospector owns a registry of every path it has seen, keyed by path
//!   and holding the OS identity of the file last seen there
//! - Each scan expands the group's globs and compares the identity at each
//!   path with the registry to tell new, renamed and rotated files apart
//! - Every live file gets exactly one harvester thread; the prospector keeps
//!   a handle to learn when (and at which offset) it stopped
//!
//! The first scan runs against the persisted state so files resume where the
//! last acknowledged batch left them, including files renamed while the
//! agent was down.

use std::collections::HashMap;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::SystemTime;

use tracing::{debug, error, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::receivers::file::config::{ProspectorConfig, StartAt};
use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::event::{FileEvent, STDIN_SOURCE};
use crate::receivers::file::harvester::{Harvester, HarvesterHandle};
use crate::receivers::file::input::{FileFinder, FileId};
use crate::receivers::file::persistence::{FileState, StateMap};

/// What the prospector knows about one path.
struct ProspectorInfo {
    file_id: FileId,
    modified: Option<SystemTime>,
    harvester: HarvesterHandle,
    last_seen: u32,
}

pub struct Prospector {
    config: ProspectorConfig,
    finder: FileFinder,
    read_stdin: bool,
    events_tx: BoundedSender<FileEvent>,
    registry: HashMap<PathBuf, ProspectorInfo>,
    iteration: u32,
    last_scan: SystemTime,
    resumed: Vec<FileState>,
}

impl Prospector {
    pub fn new(config: ProspectorConfig, events_tx: BoundedSender<FileEvent>) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let read_stdin = config.paths.iter().any(|p| p == STDIN_SOURCE);
        let patterns = config
            .paths
            .iter()
            .filter(|p| p.as_str() != STDIN_SOURCE)
            .cloned()
            .collect();

        Ok(Self {
            config,
            finder: FileFinder::new(patterns),
            read_stdin,
            events_tx,
            registry: HashMap::new(),
            iteration: 0,
            last_scan: SystemTime::now(),
            resumed: Vec::new(),
        })
    }

    /// First scan. Starts harvesters for every matching file, resuming from
    /// `state` where the file identity still matches, and returns the
    /// persisted states that were resumed so they can be saved again.
    pub fn init(&mut self, state: &StateMap) -> Vec<FileState> {
        info!(paths = ?self.config.paths, "Starting prospector.");

        if self.read_stdin {
            let harvester = Harvester::new(
                STDIN_SOURCE,
                0,
                StartAt::Beginning,
                self.config.harvester.clone(),
                self.config.fields.clone(),
                self.events_tx.clone(),
            );
            // harvested once; the handle is not tracked like file harvesters
            if let Err(e) = harvester.spawn() {
                error!(error = %e, "Failed to start harvester for standard input.");
            }
        }

        self.scan_with(Some(state));
        std::mem::take(&mut self.resumed)
    }

    /// Periodic rescan.
    pub fn scan(&mut self) {
        self.scan_with(None)
    }

    /// Rescan on a dedicated thread until the event queue closes.
    pub fn spawn(mut self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("prospector".to_string())
            .spawn(move || {
                loop {
                    std::thread::sleep(self.config.scan_interval);
                    if self.events_tx.is_closed() {
                        debug!(paths = ?self.config.paths, "Event queue closed, stopping prospector.");
                        return;
                    }
                    self.scan();
                }
            })
    }

    fn scan_with(&mut self, resume: Option<&StateMap>) {
        let scan_started = SystemTime::now();
        self.iteration = self.iteration.wrapping_add(1);

        // entries displaced from their path during this scan, by identity
        let mut missing: HashMap<FileId, (PathBuf, ProspectorInfo)> = HashMap::new();

        for path in self.finder.find_files() {
            let metadata = match fs::metadata(&path) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to stat file, skipping.");
                    continue;
                }
            };
            if metadata.is_dir() {
                debug!(path = %path.display(), "Skipping directory.");
                continue;
            }
            let file_id = match FileId::for_path(&path, &metadata) {
                Ok(id) => id,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to identify file, skipping.");
                    continue;
                }
            };

            self.check_file(path, file_id, &metadata, resume, &mut missing);
        }

        let iteration = self.iteration;
        self.registry.retain(|path, info| {
            if info.last_seen != iteration && info.harvester.is_finished() {
                debug!(path = %path.display(), "Forgetting file no longer being harvested.");
                return false;
            }
            true
        });

        self.last_scan = scan_started;
    }

    fn check_file(
        &mut self,
        path: PathBuf,
        file_id: FileId,
        metadata: &Metadata,
        resume: Option<&StateMap>,
        missing: &mut HashMap<FileId, (PathBuf, ProspectorInfo)>,
    ) {
        let modified = metadata.modified().ok();

        let harvester = match self.registry.remove(&path) {
            None => {
                if self.is_old(modified) {
                    match resume.and_then(|r| self.resume_offset(&path, file_id, r)) {
                        Some(offset) => {
                            info!(path = %path.display(), offset, "Resuming harvester on a previously harvested file.");
                            self.start_harvester(&path, offset, StartAt::Beginning)
                        }
                        None => {
                            info!(
                                path = %path.display(),
                                dead_time = ?self.config.dead_time(),
                                "Skipping file older than dead time."
                            );
                            HarvesterHandle::idle(metadata.len() as i64)
                        }
                    }
                } else if let Some((previous, info)) = self.take_renamed(&path, file_id, missing) {
                    info!(from = %previous.display(), to = %path.display(), "File was renamed.");
                    info.harvester
                } else {
                    match resume.and_then(|r| self.resume_offset(&path, file_id, r)) {
                        Some(offset) => {
                            info!(path = %path.display(), offset, "Resuming harvester on a previously harvested file.");
                            self.start_harvester(&path, offset, StartAt::Beginning)
                        }
                        None => {
                            info!(path = %path.display(), "Launching harvester on new file.");
                            let start_at = self.new_file_start(resume.is_some());
                            self.start_harvester(&path, 0, start_at)
                        }
                    }
                }
            }
            Some(last) if last.file_id != file_id => {
                let harvester = match self.take_renamed(&path, file_id, missing) {
                    Some((previous, info)) => {
                        info!(from = %previous.display(), to = %path.display(), "File was renamed onto a tracked path.");
                        info.harvester
                    }
                    None => {
                        info!(path = %path.display(), "File was rotated, launching harvester on new file.");
                        let start_at = self.new_file_start(false);
                        self.start_harvester(&path, 0, start_at)
                    }
                };
                missing.insert(last.file_id, (path.clone(), last));
                harvester
            }
            Some(mut last) => {
                if last.modified != modified && last.harvester.is_finished() {
                    let offset = last.harvester.finished_offset().unwrap_or(0);
                    info!(path = %path.display(), offset, "Resuming harvester on an old file that was just modified.");
                    self.start_harvester(&path, offset, StartAt::Beginning)
                } else {
                    last.harvester
                }
            }
        };

        self.registry.insert(
            path,
            ProspectorInfo {
                file_id,
                modified,
                harvester,
                last_seen: self.iteration,
            },
        );
    }

    /// Find the entry a renamed file came from: another tracked path with
    /// the same identity, or an entry displaced earlier in this scan.
    fn take_renamed(
        &mut self,
        path: &Path,
        file_id: FileId,
        missing: &mut HashMap<FileId, (PathBuf, ProspectorInfo)>,
    ) -> Option<(PathBuf, ProspectorInfo)> {
        let previous = self
            .registry
            .iter()
            .find(|(p, info)| info.file_id == file_id && p.as_path() != path)
            .map(|(p, _)| p.clone());

        if let Some(previous) = previous {
            return self.registry.remove(&previous).map(|info| (previous, info));
        }

        missing.remove(&file_id)
    }

    /// Offset to resume `path` from, if the persisted state knows this file
    /// under the same path, under the name it had before a rename, or as a
    /// file that was displaced from its path by a rotation.
    fn resume_offset(&mut self, path: &Path, file_id: FileId, state: &StateMap) -> Option<i64> {
        let source = path.to_string_lossy();

        if let Some(saved) = state.get(source.as_ref()) {
            if saved.file_id == file_id {
                self.resumed.push(saved.clone());
                return Some(saved.offset);
            }
        }

        let found = state.values().find(|saved| saved.file_id == file_id)?;
        if found.source != source.as_ref() {
            info!(from = %found.source, to = %source, "Detected rename of a previously harvested file.");
        }

        let mut saved = found.clone();
        saved.source = source.to_string();
        self.resumed.push(saved.clone());
        Some(saved.offset)
    }

    fn is_old(&self, modified: Option<SystemTime>) -> bool {
        let Some(modified) = modified else {
            return false;
        };
        if modified >= self.last_scan {
            return false;
        }
        match modified.elapsed() {
            Ok(age) => age > self.config.dead_time(),
            Err(_) => false,
        }
    }

    /// Start position for files that have no resume offset.
    fn new_file_start(&self, initial_scan: bool) -> StartAt {
        if initial_scan {
            self.config.start_at
        } else if self.config.tail_on_rotate {
            StartAt::End
        } else {
            StartAt::Beginning
        }
    }

    fn start_harvester(&self, path: &Path, offset: i64, start_at: StartAt) -> HarvesterHandle {
        let harvester = Harvester::new(
            path,
            offset,
            start_at,
            self.config.harvester.clone(),
            self.config.fields.clone(),
            self.events_tx.clone(),
        );
        match harvester.spawn() {
            Ok(handle) => handle,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to start harvester.");
                HarvesterHandle::idle(offset)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::{self, BoundedReceiver};
    use crate::receivers::file::config::HarvesterConfig;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    fn test_config(dir: &TempDir) -> ProspectorConfig {
        ProspectorConfig {
            paths: vec![format!("{}/*", dir.path().display())],
            scan_interval: Duration::from_millis(50),
            start_at: StartAt::Beginning,
            harvester: HarvesterConfig {
                buffer_size: 64,
                open_retry_interval: Duration::from_millis(10),
                eof_poll_interval: Duration::from_millis(5),
                eof_timeout: Duration::from_millis(20),
                dead_time: Duration::from_secs(3600),
            },
            ..Default::default()
        }
    }

    fn prospector(config: ProspectorConfig) -> (Prospector, BoundedReceiver<FileEvent>) {
        let (tx, rx) = bounded_channel::bounded(16);
        (Prospector::new(config, tx).unwrap(), rx)
    }

    fn append(path: &Path, data: &[u8]) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(data).unwrap();
    }

    fn recv(rx: &BoundedReceiver<FileEvent>) -> FileEvent {
        rx.recv_timeout(RECV_TIMEOUT).expect("expected an event")
    }

    fn source(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }

    #[test]
    fn new_files_are_harvested() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"hello\n");
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let (mut p, rx) = prospector(test_config(&dir));
        assert!(p.init(&StateMap::new()).is_empty());

        let e = recv(&rx);
        assert_eq!(source(&path), &*e.source);
        assert_eq!(0, e.offset);
        assert_eq!(1, p.registry.len());
    }

    #[test]
    fn resumes_from_saved_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"first\nsecond\n");

        let saved = FileState {
            source: source(&path),
            offset: 6,
            file_id: FileId::from_path(&path).unwrap(),
        };
        let mut state = StateMap::new();
        state.insert(saved.source.clone(), saved.clone());

        let (mut p, rx) = prospector(test_config(&dir));
        assert_eq!(vec![saved], p.init(&state));

        let e = recv(&rx);
        assert_eq!(6, e.offset);
        assert_eq!(&b"second"[..], &e.text[..]);
    }

    #[test]
    fn resumes_file_renamed_while_stopped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log.1");
        append(&path, b"first\nsecond\n");

        let old_name = source(&dir.path().join("app.log"));
        let mut state = StateMap::new();
        state.insert(
            old_name.clone(),
            FileState {
                source: old_name,
                offset: 6,
                file_id: FileId::from_path(&path).unwrap(),
            },
        );

        let (mut p, rx) = prospector(test_config(&dir));
        let resumed = p.init(&state);
        assert_eq!(1, resumed.len());
        assert_eq!(source(&path), resumed[0].source);
        assert_eq!(6, resumed[0].offset);

        let e = recv(&rx);
        assert_eq!(&b"second"[..], &e.text[..]);
    }

    #[test]
    fn state_for_replaced_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let other = dir.path().join("other.bin");
        append(&path, b"first\n");
        // identity that no longer lives at `path`
        append(&other, b"");
        let other_id = FileId::from_path(&other).unwrap();
        std::fs::remove_file(&other).unwrap();

        let mut state = StateMap::new();
        state.insert(
            source(&path),
            FileState {
                source: source(&path),
                offset: 3,
                file_id: other_id,
            },
        );

        let (mut p, rx) = prospector(test_config(&dir));
        assert!(p.init(&state).is_empty());
        assert_eq!(0, recv(&rx).offset);
    }

    #[test]
    fn start_at_end_on_first_scan_only() {
        let dir = TempDir::new().unwrap();
        let existing = dir.path().join("existing.log");
        append(&existing, b"old\n");

        let config = ProspectorConfig {
            start_at: StartAt::End,
            ..test_config(&dir)
        };
        let (mut p, rx) = prospector(config);
        p.init(&StateMap::new());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_none());

        let later = dir.path().join("later.log");
        append(&later, b"from the start\n");
        p.scan();

        let e = recv(&rx);
        assert_eq!(source(&later), &*e.source);
        assert_eq!(0, e.offset);
    }

    #[test]
    fn rename_and_recreate_tracks_both_files() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("log.1");
        let bak = dir.path().join("log.1.bak");
        append(&log, b"one\n");

        let (mut p, rx) = prospector(test_config(&dir));
        p.init(&StateMap::new());
        let e = recv(&rx);
        assert_eq!(source(&log), &*e.source);
        let original_id = FileId::from_path(&log).unwrap();

        std::fs::rename(&log, &bak).unwrap();
        append(&log, b"new one\n");
        p.scan();

        assert_eq!(2, p.registry.len());
        assert_eq!(original_id, p.registry[&bak].file_id);
        assert_ne!(original_id, p.registry[&log].file_id);

        let e = recv(&rx);
        assert_eq!(source(&log), &*e.source);
        assert_eq!((0, 1), (e.offset, e.line));

        // the original harvester keeps following the renamed file
        append(&bak, b"two\n");
        let e = recv(&rx);
        // events keep the name the file was opened under
        assert_eq!(source(&log), &*e.source);
        assert_eq!((4, 2), (e.offset, e.line));
        assert_eq!(Some(original_id), e.file_id);
    }

    #[test]
    fn rename_without_replacement_moves_entry() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("app.log");
        let moved = dir.path().join("app.log.1");
        append(&log, b"one\n");

        let (mut p, rx) = prospector(test_config(&dir));
        p.init(&StateMap::new());
        recv(&rx);

        std::fs::rename(&log, &moved).unwrap();
        p.scan();

        assert_eq!(1, p.registry.len());
        assert!(p.registry.contains_key(&moved));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_none());
    }

    #[test]
    fn old_files_are_skipped_until_modified() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ancient.log");
        append(&path, b"ancient history\n");
        let f = OpenOptions::new().append(true).open(&path).unwrap();
        f.set_modified(SystemTime::now() - Duration::from_secs(7200))
            .unwrap();

        let (mut p, rx) = prospector(test_config(&dir));
        p.init(&StateMap::new());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_none());
        assert!(p.registry.get_mut(&path).unwrap().harvester.is_finished());

        append(&path, b"fresh\n");
        p.scan();

        let e = recv(&rx);
        assert_eq!(16, e.offset);
        assert_eq!(&b"fresh"[..], &e.text[..]);
    }

    #[test]
    fn forgets_deleted_files_once_harvester_stops() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"one\n");

        let mut config = test_config(&dir);
        config.harvester.dead_time = Duration::from_millis(30);
        let (mut p, rx) = prospector(config);
        p.init(&StateMap::new());
        recv(&rx);

        std::fs::remove_file(&path).unwrap();
        let deadline = std::time::Instant::now() + RECV_TIMEOUT;
        while !p.registry.is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
            p.scan();
        }
        assert!(p.registry.is_empty());
    }

    #[test]
    fn stdin_is_not_globbed() {
        let dir = TempDir::new().unwrap();
        let config = ProspectorConfig {
            paths: vec!["-".to_string(), format!("{}/*.log", dir.path().display())],
            ..test_config(&dir)
        };
        let (tx, _rx) = bounded_channel::bounded(1);
        let p = Prospector::new(config, tx).unwrap();

        assert!(p.read_stdin);
        assert_eq!(1, p.finder.patterns().len());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let (tx, _rx) = bounded_channel::bounded(1);
        assert!(Prospector::new(ProspectorConfig::default(), tx).is_err());
    }

    #[test]
    fn restart_after_rotation_resumes_both_files() {
        use crate::receivers::file::persistence::StateFile;
        use crate::receivers::file::registrar::Registrar;
        use bytes::Bytes;
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let log = dir.path().join("log.1");
        let bak = dir.path().join("log.1.bak");
        append(&log, b"a1\n");
        let rotated_id = FileId::from_path(&log).unwrap();
        std::fs::rename(&log, &bak).unwrap();
        append(&log, b"b1\n");
        let replacement_id = FileId::from_path(&log).unwrap();

        // both harvesters reported the path they opened
        let delivered = |file_id, text: &'static str| FileEvent {
            source: Arc::from(source(&log).as_str()),
            offset: 0,
            line: 1,
            text: Bytes::from_static(text.as_bytes()),
            terminator_len: 1,
            fields: Arc::new(Default::default()),
            file_id: Some(file_id),
        };
        let (_acked_tx, acked_rx) = bounded_channel::bounded(1);
        let mut registrar = Registrar::new(StateFile::new(dir.path().join(".state")), vec![], acked_rx);
        registrar.record(&[delivered(rotated_id, "a1"), delivered(replacement_id, "b1")]);
        let state = registrar.state().clone();

        append(&bak, b"a2\n");
        append(&log, b"b2\n");

        let config = ProspectorConfig {
            paths: vec![format!("{}/log.1*", dir.path().display())],
            start_at: StartAt::End,
            ..test_config(&dir)
        };
        let (mut p, rx) = prospector(config);
        assert_eq!(2, p.init(&state).len());

        let mut got: Vec<_> = (0..2).map(|_| recv(&rx)).collect();
        got.sort_by(|a, b| a.source.cmp(&b.source));
        assert_eq!((source(&log), 3, &b"b2"[..]), (got[0].source.to_string(), got[0].offset, &got[0].text[..]));
        assert_eq!((source(&bak), 3, &b"a2"[..]), (got[1].source.to_string(), got[1].offset, &got[1].text[..]));
    }
}
