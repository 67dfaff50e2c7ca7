//! b1b - bonding mode-1 bridge helper daemon.
//!
//! Watches configured (or auto-detected) active-backup bonds for failover
//! events and re-teaches upstream switches by bursting gratuitous ARPs for
//! every destination the master bridge had learned.

mod logging;

use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing::error;

use b1b::Daemon;

#[derive(Parser)]
#[command(name = "b1b")]
#[command(about = "Bonding mode-1 bridge helper", long_about = None)]
#[command(version)]
struct Cli {
    /// Prefix log lines with <severity> for journal/syslog ingestion
    #[arg(short = 'l', long = "syslog", action = ArgAction::Count)]
    syslog: u8,

    /// Log plain human-readable lines on stderr
    #[arg(short = 'e', long = "stderr", action = ArgAction::Count)]
    stderr: u8,

    /// Enable debug-level logging
    #[arg(short = 'd', long = "debug", action = ArgAction::Count)]
    debug: u8,

    /// Bonds to manage; all usable mode-1 bonds are auto-detected when
    /// none are named
    #[arg(value_name = "BOND")]
    bonds: Vec<String>,
}

/// Reject repeated or conflicting log options.
///
/// Flags are counted rather than boolean so these misuses reach our own
/// validation (and exit status 1) instead of clap's usage error.
fn check_args(cli: &Cli) -> Result<(), String> {
    if cli.syslog > 0 && cli.stderr > 0 {
        return Err("conflicting options: log destination set twice".into());
    }
    if cli.syslog > 1 {
        return Err("duplicate option: --syslog: log destination already set".into());
    }
    if cli.stderr > 1 {
        return Err("duplicate option: --stderr: log destination already set".into());
    }
    if cli.debug > 1 {
        return Err("duplicate option: --debug: debug log level already set".into());
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::try_parse().unwrap_or_else(|err| {
        // Help and --version print to stdout and exit 0; real usage errors
        // are fatal (status 1, not clap's 2).
        let failure = err.use_stderr();
        let _ = err.print();
        std::process::exit(if failure { 1 } else { 0 });
    });

    // With no explicit destination, pick the journal-friendly style
    // whenever stderr is not a terminal.
    let use_syslog = if cli.syslog > 0 {
        true
    } else if cli.stderr > 0 {
        false
    } else {
        !atty::is(atty::Stream::Stderr)
    };
    logging::init(use_syslog, cli.debug > 0);

    if let Err(reason) = check_args(&cli) {
        error!("{reason}");
        return ExitCode::FAILURE;
    }

    match run(&cli.bonds).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(bonds: &[String]) -> b1b::Result<()> {
    let mut daemon = Daemon::start(bonds).await?;
    daemon.run().await
}
