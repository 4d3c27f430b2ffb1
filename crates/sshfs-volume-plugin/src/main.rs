#![forbid(unsafe_code)]

mod commands;
mod config;
mod exit_code;
mod output;
mod protocol;
mod server;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sshfs_volume::{ErrorKind, VolumeError};
use tracing_subscriber::EnvFilter;

use crate::commands::{cleanup, create, inspect, ls, mount, rm, serve, unmount};
use crate::config::PluginConfig;

/// Docker volume plugin for sshfs-backed volumes
#[derive(Parser)]
#[command(name = "docker-volume-sshfs")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Run the plugin (normally started by the container runtime)
    docker-volume-sshfs serve

    # Define and inspect a volume by hand
    docker-volume-sshfs create data -o sshcmd=alice@files:/srv/data -o password=s3cret
    docker-volume-sshfs inspect data

    # Retry teardown of volumes whose unmount failed
    docker-volume-sshfs cleanup")]
struct Cli {
    /// Storage root holding volumes/ and state/ (overrides the config file)
    #[arg(long, env = "SSHFS_VOLUME_ROOT", global = true)]
    root: Option<PathBuf>,

    /// Path to a TOML configuration file
    #[arg(long, env = "SSHFS_VOLUME_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the volume plugin protocol on a Unix socket
    Serve(serve::Args),

    /// List volumes
    Ls(ls::Args),

    /// Show a volume as JSON
    Inspect(inspect::Args),

    /// Create a volume
    Create(create::Args),

    /// Remove a volume
    Rm(rm::Args),

    /// Mount a volume (take a reference)
    Mount(mount::Args),

    /// Unmount a volume (release a reference)
    Unmount(unmount::Args),

    /// Retry teardown of volumes left mounted by a failed unmount
    Cleanup(cleanup::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(categorize_error(&e))
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let config = PluginConfig::load(cli.config.as_deref())?.with_root(cli.root);

    match cli.command {
        Commands::Serve(args) => serve::execute(&config, &args),
        Commands::Ls(args) => ls::execute(&config, &args),
        Commands::Inspect(args) => inspect::execute(&config, &args),
        Commands::Create(args) => create::execute(&config, &args),
        Commands::Rm(args) => rm::execute(&config, &args),
        Commands::Mount(args) => mount::execute(&config, &args),
        Commands::Unmount(args) => unmount::execute(&config, &args),
        Commands::Cleanup(args) => cleanup::execute(&config, &args),
    }
}

fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();
}

/// Map an error to an exit code by the first volume error in its chain.
fn categorize_error(e: &anyhow::Error) -> u8 {
    e.chain()
        .find_map(|cause| cause.downcast_ref::<VolumeError>())
        .map_or(exit_code::GENERAL_ERROR, |volume_err| match volume_err.kind() {
            ErrorKind::NotFound => exit_code::NOT_FOUND,
            ErrorKind::Conflict => exit_code::CONFLICT,
            ErrorKind::InvalidArgument => exit_code::INVALID_ARGUMENT,
            ErrorKind::Tool => exit_code::MOUNT_FAILED,
            ErrorKind::State => exit_code::STATE_UNAVAILABLE,
            ErrorKind::Io => exit_code::GENERAL_ERROR,
        })
}
