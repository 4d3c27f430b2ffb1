//! Cleanup command - retry teardown of volumes whose unmount failed.

use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use tracing::instrument;

use super::open_registry;
use crate::config::PluginConfig;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Volume name (default: every volume flagged for cleanup)
    pub name: Option<String>,
}

#[instrument(level = "info", name = "cmd::cleanup", skip_all)]
pub fn execute(config: &PluginConfig, args: &Args) -> Result<()> {
    let registry = open_registry(config)?;

    if let Some(name) = &args.name {
        if registry.cleanup(name)? {
            println!("{name}: cleaned up");
        } else {
            eprintln!("{name}: nothing to clean up");
        }
        return Ok(());
    }

    let results = registry.cleanup_all();
    if results.is_empty() {
        eprintln!("No volumes need cleanup.");
        return Ok(());
    }

    let mut failed = 0;
    for (name, result) in results {
        match result {
            Ok(true) => println!("{name}: cleaned up"),
            Ok(false) => eprintln!("{name}: nothing to clean up"),
            Err(e) => {
                eprintln!("{name}: {e}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} volume(s) could not be cleaned up");
    }
    Ok(())
}
