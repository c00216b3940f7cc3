// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Inspect command - offline summary of a solution template

use super::{load_solution, Globals};
use crate::graph::DependencyGraph;
use crate::templatize::unresolved_tokens;
use crate::types::Solution;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

/// Dictionary roots the deployer seeds itself
const SEEDED_ROOTS: &[&str] = &["portalBaseUrl", "organization", "user", "folderId", "solutionItemId"];

/// What `solution inspect` reports about one template
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSummary {
    /// Source item id
    pub item_id: String,
    /// Item type
    pub item_type: String,
    /// Item title
    pub title: String,
    /// Ids this template depends on
    pub dependencies: Vec<String>,
    /// Groups the item is shared with
    pub groups: Vec<String>,
    /// Tokens that nothing in the solution or the seeded dictionary provides
    pub external_tokens: Vec<String>,
}

/// Solution summary
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    /// Solution title
    pub title: String,
    /// Per-template details, in file order
    pub templates: Vec<TemplateSummary>,
    /// Deploy levels
    pub levels: Vec<Vec<String>>,
}

fn token_root(token: &str) -> &str {
    let expr = token.trim_start_matches("{{").trim_end_matches("}}");
    let path = expr.split("||").next().unwrap_or(expr).trim();
    path.split('.').next().unwrap_or(path)
}

/// Summarize `solution`; fails on dependency cycles
pub fn inspect(solution: &Solution) -> Result<Inspection> {
    let graph = DependencyGraph::from_templates(&solution.templates);
    let levels = graph.deploy_levels().context("Solution cannot be deployed")?;

    let templates = solution
        .templates
        .iter()
        .map(|t| {
            let mut tokens: BTreeSet<String> = unresolved_tokens(&t.item);
            tokens.extend(unresolved_tokens(&t.data));
            let external_tokens = tokens
                .into_iter()
                .filter(|token| {
                    // Fallback tokens resolve to their default
                    if token.contains("||") {
                        return false;
                    }
                    let root = token_root(token);
                    !SEEDED_ROOTS.contains(&root) && !solution.has_template(root)
                })
                .collect();
            TemplateSummary {
                item_id: t.item_id.clone(),
                item_type: t.item_type.clone(),
                title: t.item.get("title").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                dependencies: t.dependencies.clone(),
                groups: t.groups.clone(),
                external_tokens,
            }
        })
        .collect();

    Ok(Inspection {
        title: solution.metadata.title.clone(),
        templates,
        levels,
    })
}

/// Run the inspect command
pub fn run(globals: &Globals, file: &Path, dot: bool) -> Result<()> {
    let solution = load_solution(file)?;

    if dot {
        let graph = DependencyGraph::from_templates(&solution.templates);
        println!("{}", graph.to_dot(&solution.templates));
        return Ok(());
    }

    let inspection = inspect(&solution)?;
    if globals.json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(());
    }

    println!("{}", globals.heading(&inspection.title));
    println!("{} template(s)", inspection.templates.len());
    for t in &inspection.templates {
        println!();
        println!("  {} {} ({})", globals.ok(&t.item_id), t.title, t.item_type);
        if !t.dependencies.is_empty() {
            println!("    depends on: {}", t.dependencies.join(", "));
        }
        if !t.groups.is_empty() {
            println!("    groups: {}", t.groups.join(", "));
        }
        for token in &t.external_tokens {
            println!("    {} {}", globals.warn("unresolved"), token);
        }
    }
    println!();
    println!("{}", globals.heading("Deploy levels"));
    for (depth, level) in inspection.levels.iter().enumerate() {
        println!("  {}: {}", depth, level.join(", "));
    }
    Ok(())
}
