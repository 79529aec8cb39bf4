//! Keeps a relay's weekly ON/OFF schedule in sync with a timings calendar.
//!
//! ```text
//! calendar-switch-sync [--workspace <dir>] [run]
//! calendar-switch-sync once
//! calendar-switch-sync probe
//! calendar-switch-sync clear
//! calendar-switch-sync set-api-key <key>
//! calendar-switch-sync forget-api-key
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use calendar_switch_sync::application::bootstrap::bootstrap_workspace;
use calendar_switch_sync::application::commands::{
    AppState, clear_jobs_impl, forget_api_key_impl, run_once_impl, run_probe_impl, run_sync_impl,
    set_api_key_impl,
};
use calendar_switch_sync::infrastructure::credential_store::KeyringCredentialStore;
use calendar_switch_sync::infrastructure::logging::init_tracing;

#[derive(Parser, Debug)]
#[command(
    name = "calendar-switch-sync",
    version,
    about = "Mirror calendar timings onto a relay's schedule",
    long_about = None,
)]
struct Cli {
    /// Directory holding config/ and logs/.
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll the calendar every refresh interval until Ctrl-C (default).
    Run,

    /// Run a single sync cycle and print its outcome.
    Once,

    /// Fetch timings and toggle the switch on every tick, leaving jobs alone.
    Probe,

    /// Delete every job from the device scheduler.
    Clear,

    /// Store the calendar API key in the OS credential store.
    SetApiKey { key: String },

    /// Remove the calendar API key from the OS credential store.
    ForgetApiKey,
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = KeyringCredentialStore::default();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::SetApiKey { key } => {
            init_key_command_logging(&cli.workspace)?;
            set_api_key_impl(&store, &key).context("storing api key")?;
            println!("api key stored");
        }
        Commands::ForgetApiKey => {
            init_key_command_logging(&cli.workspace)?;
            forget_api_key_impl(&store).context("removing api key")?;
            println!("api key removed");
        }
        Commands::Run => {
            let state = load_state(&cli.workspace)?;
            run_sync_impl(&state, &store, shutdown_signal()).await?;
        }
        Commands::Once => {
            let state = load_state(&cli.workspace)?;
            let outcome = run_once_impl(&state, &store).await?;
            println!("{outcome:?}");
        }
        Commands::Probe => {
            let state = load_state(&cli.workspace)?;
            run_probe_impl(&state, &store, shutdown_signal()).await?;
        }
        Commands::Clear => {
            let state = load_state(&cli.workspace)?;
            let summary = clear_jobs_impl(&state).await?;
            println!(
                "listed {}, deleted {}, failed {}",
                summary.listed, summary.deleted, summary.delete_failures
            );
        }
    }
    Ok(())
}

fn load_state(workspace: &Path) -> Result<AppState> {
    AppState::load(workspace)
        .with_context(|| format!("loading workspace {}", workspace.display()))
}

// Key commands must work before the calendar ids are configured.
fn init_key_command_logging(workspace: &Path) -> Result<()> {
    let paths = bootstrap_workspace(workspace)
        .with_context(|| format!("preparing workspace {}", workspace.display()))?;
    init_tracing(&paths.logs_dir, None)?;
    Ok(())
}
