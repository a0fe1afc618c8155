//! `fanup config`: show where the config lives and what is in effect.

use anyhow::{Context, Result};
use fanup_core::config::{self, FanupConfig};
use std::path::Path;

pub fn run_config(explicit: Option<&Path>, cfg: &FanupConfig) -> Result<()> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => config::config_path()?,
    };
    let rendered = toml::to_string_pretty(cfg).context("render config")?;
    println!("# {}", path.display());
    print!("{}", rendered);
    Ok(())
}
