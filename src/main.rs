// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! solution CLI - turn portal items into templates and deploy them elsewhere

use anyhow::{Context, Result};
use arcgis_solution::commands::{self, convert::ConvertArgs, deploy::DeployArgs, Globals};
use arcgis_solution::config;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "solution")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(short, long, env = "SOLUTION_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Portal URL, e.g. https://myorg.maps.arcgis.com
    #[arg(long, global = true)]
    portal: Option<String>,

    /// Access token
    #[arg(long, env = "SOLUTION_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Disable colored output
    #[arg(long, env = "NO_COLOR", global = true)]
    no_color: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert portal items (and their dependencies) into a solution template
    Convert {
        /// Item ids to convert
        #[arg(required = true)]
        item_ids: Vec<String>,

        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Solution title
        #[arg(long)]
        title: Option<String>,

        /// Also save the solution as an item in the portal
        #[arg(long)]
        save: bool,

        /// Do not convert dependencies that were not listed
        #[arg(long)]
        no_follow: bool,
    },

    /// Deploy a solution template
    Deploy {
        /// Solution template file
        file: PathBuf,

        /// Deploy into this existing folder
        #[arg(long)]
        folder: Option<String>,

        /// Dictionary override, e.g. --set <sourceId>.itemId=<existingId>
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Deploy into an in-memory portal and report the result
        #[arg(long)]
        dry_run: bool,

        /// Keep created items when the deployment fails
        #[arg(long)]
        no_rollback: bool,

        /// Create a Solution item describing the deployment
        #[arg(long)]
        solution_item: bool,
    },

    /// Summarize a solution template without contacting a portal
    Inspect {
        /// Solution template file
        file: PathBuf,

        /// Print the dependency graph in DOT format
        #[arg(long)]
        dot: bool,
    },

    /// Show the effective configuration
    Config {
        /// Print the default config file location instead
        #[arg(long)]
        path: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: clap_complete::Shell,
    },
}

fn init_logging(cli: &Cli, default_level: &str) {
    let level = match cli.verbose {
        0 if cli.quiet => "error",
        0 => default_level,
        1 => "debug",
        _ => "trace",
    };
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        return commands::completions::run(shell, &mut Cli::command());
    }

    let loaded = config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&cli, &loaded.log_level);

    let globals = Globals {
        config: loaded.with_overrides(cli.portal.clone(), cli.token.clone()),
        json: cli.json,
        color: !cli.no_color && !cli.json,
    };

    match cli.command {
        Commands::Convert { item_ids, output, title, save, no_follow } => {
            let args = ConvertArgs { item_ids, output, title, save, no_follow };
            commands::convert::run(&globals, args).await
        }
        Commands::Deploy { file, folder, set, dry_run, no_rollback, solution_item } => {
            let args = DeployArgs { file, folder, set, dry_run, no_rollback, solution_item };
            commands::deploy::run(&globals, args).await
        }
        Commands::Inspect { file, dot } => commands::inspect::run(&globals, &file, dot),
        Commands::Config { path } => commands::config::run(&globals, path),
        Commands::Completions { .. } => Ok(()),
    }
}
