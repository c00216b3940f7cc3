// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Config command - shows the effective configuration

use super::Globals;
use crate::config::default_path;
use anyhow::{Context, Result};

/// Print the effective configuration as TOML, or the default file location
pub fn run(globals: &Globals, path: bool) -> Result<()> {
    if path {
        match default_path() {
            Some(p) => println!("{}", p.display()),
            None => anyhow::bail!("No home directory to place a config file in"),
        }
        return Ok(());
    }
    if globals.json {
        let mut shown = globals.config.clone();
        if shown.token.is_some() {
            shown.token = Some("********".to_string());
        }
        println!("{}", serde_json::to_string_pretty(&shown)?);
        return Ok(());
    }
    let text = globals.config.to_toml().context("Failed to render configuration")?;
    print!("{text}");
    Ok(())
}
