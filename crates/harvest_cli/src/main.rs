mod commands;
mod config;

use std::process::ExitCode;

use clap::Parser;
use harvest_logging::{harvest_error, harvest_warn};
use tokio_util::sync::CancellationToken;

use crate::commands::{EXIT_FAILED, EXIT_OK};
use crate::config::{resolve_target, Cli, Command, RunSettings};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    harvest_logging::initialize(&cli.log_destination(), cli.log_level.filter());

    match execute(cli).await {
        Ok(status) => ExitCode::from(status),
        Err(err) => {
            harvest_error!("{err:#}");
            ExitCode::from(EXIT_FAILED)
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<u8> {
    let file = cli.file_settings()?;
    let state_dir = cli.resolve_state_dir(&file);

    match &cli.command {
        Command::Run(args) => {
            let settings = RunSettings::resolve(state_dir, args, &file)?;
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            commands::run(settings, cancel).await
        }
        Command::Status(args) => {
            let target = resolve_target(args, &file)?;
            commands::status(&state_dir, &target, &file.fetch(), file.retry(None)).await?;
            Ok(EXIT_OK)
        }
        Command::Reset => {
            commands::reset(&state_dir)?;
            Ok(EXIT_OK)
        }
    }
}

/// The first Ctrl-C stops the run at the next page boundary; the pipeline
/// still ships what it buffered and persists its state.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            harvest_warn!("Interrupt received; finishing at the next page boundary");
            cancel.cancel();
        }
    });
}
