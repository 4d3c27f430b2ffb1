//! Mount command - take a reference on a volume by hand.

use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use super::open_registry;
use crate::config::PluginConfig;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Volume name
    pub name: String,
}

#[instrument(level = "info", name = "cmd::mount", skip_all, fields(volume = %args.name))]
pub fn execute(config: &PluginConfig, args: &Args) -> Result<()> {
    let registry = open_registry(config)?;
    let path = registry.mount(&args.name)?;
    println!("{}", path.display());
    Ok(())
}
