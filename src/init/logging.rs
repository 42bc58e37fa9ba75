// SPDX-License-Identifier: Apache-2.0

//! Process-wide `tracing` subscriber.

use std::error::Error;
use std::io::IsTerminal;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::init::args::AgentRun;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, ValueEnum)]
pub enum LogFormat {
    /// Compact human readable lines
    #[default]
    Text,
    /// Bunyan JSON records
    Json,
}

/// Default verbosity picked by `--quiet` and `--debug`. `RUST_LOG` still
/// takes precedence.
pub fn level_for(args: &AgentRun) -> LevelFilter {
    match (args.debug, args.quiet) {
        (true, _) => LevelFilter::DEBUG,
        (false, true) => LevelFilter::WARN,
        (false, false) => LevelFilter::INFO,
    }
}

/// Install the global subscriber writing to stdout through a background
/// thread. Keep the returned guard alive until exit so buffered records are
/// flushed.
pub fn init(
    format: LogFormat,
    level: LevelFilter,
    app_name: &str,
) -> Result<WorkerGuard, Box<dyn Error + Send + Sync>> {
    LogTracer::init()?;

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()?
        .add_directive("rustls=warn".parse()?);

    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    match format {
        LogFormat::Json => {
            let subscriber = Registry::default()
                .with(filter)
                .with(JsonStorageLayer)
                .with(BunyanFormattingLayer::new(app_name.to_string(), writer));
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Text => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(std::io::stdout().is_terminal())
                .with_target(false)
                .compact();
            tracing::subscriber::set_global_default(Registry::default().with(filter).with(layer))?;
        }
    }

    Ok(guard)
}
