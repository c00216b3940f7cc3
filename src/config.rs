// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Configuration management
//!
//! Settings are layered: built-in defaults, then the TOML config file, then
//! `SOLUTION_*` environment variables. Command-line flags are applied last
//! by the binary through [`Config::with_overrides`].

use crate::error::Result;
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Portal to read from and deploy into
    pub portal_url: String,
    /// Access token; anonymous when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// HTTP timeout in seconds
    pub timeout_secs: u64,
    /// Folder to deploy into instead of creating one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// Delete created items when a deployment fails
    pub rollback: bool,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            portal_url: "https://www.arcgis.com".to_string(),
            token: None,
            timeout_secs: 60,
            folder: None,
            rollback: true,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// HTTP timeout as a duration
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Apply command-line values on top of the loaded configuration
    #[must_use]
    pub fn with_overrides(mut self, portal_url: Option<String>, token: Option<String>) -> Self {
        if let Some(url) = portal_url {
            self.portal_url = url;
        }
        if token.is_some() {
            self.token = token;
        }
        self
    }

    /// TOML rendering with the token masked
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        let mut shown = self.clone();
        if shown.token.is_some() {
            shown.token = Some("********".to_string());
        }
        toml::to_string_pretty(&shown)
    }
}

/// Default config file location, e.g. `~/.config/arcgis-solution/config.toml`
#[must_use]
pub fn default_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "hyperpolymath", "arcgis-solution")
        .map(|d| d.config_dir().join("config.toml"))
}

/// Load configuration from `path` (or the default location) and the
/// environment
pub fn load(path: Option<&Path>) -> Result<Config> {
    let defaults = toml::to_string(&Config::default())
        .map_err(|e| config::ConfigError::Message(e.to_string()))?;
    let mut builder = config::Config::builder().add_source(File::from_str(&defaults, FileFormat::Toml));

    match path {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        None => {
            if let Some(path) = default_path() {
                builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
            }
        }
    }

    let loaded = builder
        .add_source(Environment::with_prefix("SOLUTION").try_parsing(true))
        .build()?
        .try_deserialize()?;
    Ok(loaded)
}
