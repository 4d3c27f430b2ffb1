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

#[instrument(level = "info", name = "cmd::inspect", skip_all, fields(volume = %args.name))]
pub fn execute(config: &PluginConfig, args: &Args) -> Result<()> {
    let registry = open_registry(config)?;
    let volume = registry.get(&args.name)?;
    println!("{}", serde_json::to_string_pretty(&volume)?);
    Ok(())
}
