// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Command implementations

pub mod completions;
pub mod config;
pub mod convert;
pub mod deploy;
pub mod inspect;

use crate::config::Config;
use crate::rest::RestPortal;
use crate::types::Solution;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::fs;
use std::path::Path;

/// Settings shared by every command
#[derive(Debug, Clone)]
pub struct Globals {
    /// Effective configuration, flags applied
    pub config: Config,
    /// Print machine-readable JSON instead of text
    pub json: bool,
    /// Colored status output
    pub color: bool,
}

impl Globals {
    /// Green when colors are on
    #[must_use]
    pub fn ok(&self, text: &str) -> String {
        if self.color {
            text.green().to_string()
        } else {
            text.to_string()
        }
    }

    /// Yellow when colors are on
    #[must_use]
    pub fn warn(&self, text: &str) -> String {
        if self.color {
            text.yellow().to_string()
        } else {
            text.to_string()
        }
    }

    /// Bold when colors are on
    #[must_use]
    pub fn heading(&self, text: &str) -> String {
        if self.color {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    }

    /// Client for the configured portal
    pub fn portal(&self) -> Result<RestPortal> {
        RestPortal::new(&self.config.portal_url, self.config.token.clone(), self.config.timeout())
            .with_context(|| format!("Failed to create client for {}", self.config.portal_url))
    }
}

/// Read a solution written by `solution convert`
pub fn load_solution(path: &Path) -> Result<Solution> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not a solution template", path.display()))
}

/// Write `text` to `output`, or stdout when absent
pub fn write_output(text: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => fs::write(path, text).with_context(|| format!("Failed to write {}", path.display())),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}
