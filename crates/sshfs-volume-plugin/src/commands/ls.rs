//! Ls command - list volumes.

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::Cell;
use tracing::instrument;

use super::open_registry;
use crate::config::PluginConfig;
use crate::output::{create_table, state_label};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::ls", skip_all)]
pub fn execute(config: &PluginConfig, args: &Args) -> Result<()> {
    let registry = open_registry(config)?;
    let volumes = registry.list();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&volumes)?);
        return Ok(());
    }

    if volumes.is_empty() {
        eprintln!("No volumes.");
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["Name", "Remote", "Mountpoint", "Refs", "State"]);
    for volume in &volumes {
        table.add_row(vec![
            Cell::new(&volume.name),
            Cell::new(&volume.remote_target),
            Cell::new(volume.mount_point.display()),
            Cell::new(volume.references),
            Cell::new(state_label(volume)),
        ]);
    }
    println!("{table}");

    Ok(())
}
