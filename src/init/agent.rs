// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::bounded;
use crate::crypto::init_crypto_provider;
use crate::exporters::lumberjack::{
    Connector, Publisher, PublisherConfig, TlsConfig, TlsTcpConnector,
};
use crate::init::args::AgentRun;
use crate::init::config::AgentConfig;
use crate::init::wait;
use crate::receivers::file::{
    FileEvent, HarvesterConfig, Prospector, ProspectorConfig, Registrar, StateFile, StateMap,
};
use crate::topology::{SpoolConfig, Spooler};

const EVENTS_QUEUE_SIZE: usize = 16;
const BATCHES_QUEUE_SIZE: usize = 1;
const ACKED_QUEUE_SIZE: usize = 1;

pub struct Agent {
    args: AgentRun,
    config: AgentConfig,
    hostname: String,
}

impl Agent {
    pub fn new(args: AgentRun, config: AgentConfig) -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        Self {
            args,
            config,
            hostname,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Run until cancelled or a stage fails.
    pub async fn run<C>(
        self,
        connector: C,
        agent_cancel: CancellationToken,
    ) -> Result<(), Box<dyn Error + Send + Sync>>
    where
        C: Connector + 'static,
    {
        info!(hostname = %self.hostname, "Starting logship.");

        let publisher_config = PublisherConfig::new(self.config.servers.clone(), self.hostname.clone())
            .with_timeout(self.config.timeout);

        let (events_tx, events_rx) = bounded::<FileEvent>(EVENTS_QUEUE_SIZE);
        let (batches_tx, batches_rx) = bounded::<Vec<FileEvent>>(BATCHES_QUEUE_SIZE);
        let (acked_tx, acked_rx) = bounded::<Vec<FileEvent>>(ACKED_QUEUE_SIZE);

        // fail on bad servers before any file is opened
        let publisher = Publisher::new(
            publisher_config,
            connector,
            StdRng::from_entropy(),
            batches_rx,
            acked_tx,
        )?;

        let state_file = StateFile::new(&self.args.state_file);
        let state = load_state(&state_file);

        let mut resumed = Vec::new();
        for group in &self.config.files {
            let config = ProspectorConfig {
                paths: group.paths.clone(),
                fields: Arc::new(group.fields.clone()),
                scan_interval: self.args.scan_interval(),
                start_at: self.args.start_at.into(),
                tail_on_rotate: self.args.tail,
                harvester: HarvesterConfig {
                    buffer_size: self.args.harvest_buffer_size,
                    dead_time: group.dead_time,
                    ..Default::default()
                },
            };

            let mut prospector = Prospector::new(config, events_tx.clone())?;
            resumed.extend(prospector.init(&state));
            prospector.spawn()?;
        }
        // only harvesters and prospectors hold the event queue now
        drop(events_tx);

        debug!(
            saved = state.len(),
            resumed = resumed.len(),
            "Resumed file positions."
        );

        let spooler = Spooler::new(
            SpoolConfig {
                max_size: self.args.spool_size,
                idle_timeout: self.args.idle_timeout(),
            },
            events_rx,
            batches_tx,
        );
        let registrar = Registrar::new(state_file, resumed, acked_rx);

        let mut task_set = JoinSet::new();
        task_set.spawn(spooler.run());
        task_set.spawn(publisher.run());
        task_set.spawn(registrar.run());

        select! {
            _ = agent_cancel.cancelled() => {
                info!("Agent cancelled, stopping.");
                task_set.abort_all();
                Ok(())
            },
            res = wait::wait_for_any_task(&mut task_set) => {
                match res {
                    Ok(()) => Err("pipeline stage exited unexpectedly".into()),
                    Err(e) => {
                        error!(error = %e, "Pipeline stage failed.");
                        Err(e)
                    }
                }
            },
        }
    }
}

/// TLS connector built from the configured CA, certificate and key files.
pub fn tls_connector(config: &AgentConfig) -> Result<TlsTcpConnector, Box<dyn Error + Send + Sync>> {
    // Initialize the TLS library
    init_crypto_provider()?;

    let mut tls = TlsConfig::builder();
    if let Some(ca) = &config.ssl_ca {
        tls = tls.with_ca_file(ca);
    }
    if let Some(cert) = &config.ssl_certificate {
        tls = tls.with_cert_file(cert);
    }
    if let Some(key) = &config.ssl_key {
        tls = tls.with_key_file(key);
    }
    let client_config = tls.build()?.into_client_config()?;

    Ok(TlsTcpConnector::new(client_config))
}

/// Saved positions, or an empty map if the file is unreadable.
fn load_state(state_file: &StateFile) -> StateMap {
    match state_file.load() {
        Ok(state) => state,
        Err(e) => {
            warn!(
                path = %state_file.path().display(),
                error = %e,
                "Failed to load saved state, starting without it."
            );
            StateMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn corrupt_state_is_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".logship");
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(load_state(&StateFile::new(&path)).is_empty());
        assert!(load_state(&StateFile::new(dir.path().join("missing"))).is_empty());
    }
}
