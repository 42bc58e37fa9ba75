// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, Subcommand};
use std::error::Error;
use std::process::ExitCode;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use logship::exporters::lumberjack::TlsTcpConnector;
use logship::init::agent::{Agent, tls_connector};
use logship::init::args::AgentRun;
use logship::init::config::{self, AgentConfig};
use logship::init::logging::{self, LogFormat};

const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_FAULTED: u8 = 2;

/// Ships log files to lumberjack collectors.
#[derive(Debug, Parser)]
#[command(name = "logship", version, about)]
struct Cli {
    /// Log output format
    #[arg(value_enum, long, global = true, env = "LOGSHIP_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Tail the configured files and ship them
    Start(Box<AgentRun>),

    /// Print the version
    Version,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version are reported through the error path too
            return if e.use_stderr() {
                ExitCode::from(EXIT_CONFIG_ERROR)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match cli.command {
        Command::Version => {
            println!("{}", build_version());
            ExitCode::SUCCESS
        }
        Command::Start(args) => start(cli.log_format, *args),
    }
}

fn start(log_format: LogFormat, args: AgentRun) -> ExitCode {
    let app_name = format!("logship-{}", build_version());
    let _log_guard = match logging::init(log_format, logging::level_for(&args), &app_name) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("logship: unable to initialize logging: {}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let config = match config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "Invalid configuration.");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let connector = match tls_connector(&config) {
        Ok(connector) => connector,
        Err(e) => {
            error!(error = %e, "Invalid TLS configuration.");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match run(args, config, connector) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Agent stopped with an error.");
            ExitCode::from(EXIT_FAULTED)
        }
    }
}

#[tokio::main]
async fn run(
    args: AgentRun,
    config: AgentConfig,
    connector: TlsTcpConnector,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let cancel = CancellationToken::new();
    let agent = Agent::new(args, config);
    let mut agent_task = tokio::spawn(agent.run(connector, cancel.clone()));

    let finished = select! {
        _ = shutdown_signal() => None,
        res = &mut agent_task => Some(res),
    };

    // harvester and prospector threads are not joined, process exit ends them
    match finished {
        None => {
            info!("Shutdown signal received.");
            cancel.cancel();
            // the agent aborts its tasks and returns promptly once cancelled
            agent_task.await?
        }
        Some(res) => {
            res??;
            warn!("Agent exited without being asked to stop.");
            Ok(())
        }
    }
}

fn build_version() -> String {
    let sha = option_env!("LOGSHIP_BUILD_SHA").unwrap_or("dev");
    format!("{}-{}", env!("CARGO_PKG_VERSION"), sha)
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut term, mut int) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Unable to install signal handlers, waiting for ctrl-c instead.");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    select! {
        _ = term.recv() => {},
        _ = int.recv() => {},
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
