//! Create command - define a volume without going through the runtime.

use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use tracing::instrument;

use super::open_registry;
use crate::config::PluginConfig;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Volume name
    pub name: String,

    /// Volume option as key=value (repeatable), e.g. -o sshcmd=user@host:/path
    #[arg(short = 'o', long = "opt", value_name = "KEY=VALUE", value_parser = parse_option)]
    pub options: Vec<(String, String)>,
}

/// Split `key=value`; a bare `key` becomes a flag with an empty value.
fn parse_option(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw.split_once('=').unwrap_or((raw, ""));
    if key.is_empty() {
        bail!("option key must not be empty: '{raw}'");
    }
    Ok((key.to_string(), value.to_string()))
}

#[instrument(level = "info", name = "cmd::create", skip_all, fields(volume = %args.name))]
pub fn execute(config: &PluginConfig, args: &Args) -> Result<()> {
    let registry = open_registry(config)?;
    registry.create(&args.name, args.options.iter().map(|(k, v)| (k, v)))?;
    println!("{}", args.name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_option() {
        assert_eq!(
            parse_option("sshcmd=user@host:/srv").unwrap(),
            ("sshcmd".to_string(), "user@host:/srv".to_string())
        );
        assert_eq!(
            parse_option("IdentityFile=/k=v").unwrap(),
            ("IdentityFile".to_string(), "/k=v".to_string())
        );
        assert_eq!(
            parse_option("allow_other").unwrap(),
            ("allow_other".to_string(), String::new())
        );
        assert!(parse_option("=value").is_err());
    }
}
