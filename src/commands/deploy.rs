// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Deploy command - creates the items of a solution template in a portal

use super::{load_solution, Globals};
use crate::deployer::{deploy_solution, DeployOptions};
use crate::rest::{MemoryPortal, PortalApi};
use crate::templatize::TemplateDictionary;
use crate::types::{ProgressCallback, ProgressEvent, Solution};
use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

/// Arguments of `solution deploy`
#[derive(Debug, Clone, Default)]
pub struct DeployArgs {
    /// Solution template file
    pub file: PathBuf,
    /// Existing folder to deploy into
    pub folder: Option<String>,
    /// `key=value` dictionary overrides
    pub set: Vec<String>,
    /// Deploy into an in-memory portal
    pub dry_run: bool,
    /// Keep created items when deployment fails
    pub no_rollback: bool,
    /// Create a deployed `Solution` item
    pub solution_item: bool,
}

/// Parse `key=value` overrides into a dictionary. Values that parse as JSON
/// keep their type; anything else is a string.
pub fn parse_overrides(pairs: &[String]) -> Result<TemplateDictionary> {
    let mut dictionary = TemplateDictionary::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid override '{}', expected key=value", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("Invalid override '{}', empty key", pair));
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        dictionary.set(key, value);
    }
    Ok(dictionary)
}

/// Run the deploy command
pub async fn run(globals: &Globals, args: DeployArgs) -> Result<()> {
    let solution = load_solution(&args.file)?;
    if args.dry_run {
        info!("Dry run: deploying into memory");
        let portal = MemoryPortal::new(&globals.config.portal_url);
        deploy_with(globals, &args, &solution, &portal).await
    } else {
        let portal = globals.portal()?;
        deploy_with(globals, &args, &solution, &portal).await
    }
}

/// Deploy `solution` into `portal` and print the report
pub async fn deploy_with(globals: &Globals, args: &DeployArgs, solution: &Solution, portal: &dyn PortalApi) -> Result<()> {
    let options = DeployOptions {
        folder_id: args.folder.clone().or_else(|| globals.config.folder.clone()),
        folder_title: None,
        overrides: parse_overrides(&args.set)?,
        rollback: globals.config.rollback && !args.no_rollback,
        create_solution_item: args.solution_item,
    };

    let print_progress = |event: &ProgressEvent| {
        if !globals.json {
            eprintln!("[{:>3}%] {} {}: {:?}", event.percent_done, event.item_id, event.item_type, event.status);
        }
    };
    let progress: ProgressCallback<'_> = &print_progress;

    let report = deploy_solution(solution, portal, &options, Some(progress))
        .await
        .with_context(|| format!("Failed to deploy '{}'", solution.metadata.title))?;
    let unresolved = report.unresolved(solution);

    if globals.json {
        let unresolved: serde_json::Map<String, Value> = unresolved
            .into_iter()
            .map(|(id, tokens)| (id, json!(tokens)))
            .collect();
        let out = json!({
            "dryRun": args.dry_run,
            "folderId": report.folder_id,
            "solutionItemId": report.solution_item_id,
            "items": report.items,
            "unresolved": unresolved,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mode = if args.dry_run { " (dry run)" } else { "" };
    println!("{}{}", globals.heading(&format!("Deployed '{}'", solution.metadata.title)), mode);
    println!("  folder: {}", report.folder_id);
    if let Some(id) = &report.solution_item_id {
        println!("  solution item: {id}");
    }
    for item in &report.items {
        let state = if item.created { globals.ok("created") } else { globals.warn("reused") };
        println!("  {} -> {} [{}] {}", item.source_id, item.item_id, item.item_type, state);
    }
    for (id, tokens) in unresolved {
        println!("  {} {}: {}", globals.warn("unresolved"), id, tokens.join(", "));
    }
    Ok(())
}
