// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Convert command - builds a solution template from portal items

use super::{write_output, Globals};
use crate::creator::{create_solution, CreateOptions};
use crate::rest::PortalApi;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing::info;

/// Arguments of `solution convert`
#[derive(Debug, Clone)]
pub struct ConvertArgs {
    /// Items to convert
    pub item_ids: Vec<String>,
    /// Output file (stdout if not specified)
    pub output: Option<PathBuf>,
    /// Solution title
    pub title: Option<String>,
    /// Save the solution as an item in the portal
    pub save: bool,
    /// Skip dependencies that were not requested
    pub no_follow: bool,
}

/// Run the convert command against the configured portal
pub async fn run(globals: &Globals, args: ConvertArgs) -> Result<()> {
    let portal = globals.portal()?;
    convert_with(globals, args, &portal).await
}

/// Run the convert command against `portal`
pub async fn convert_with(globals: &Globals, args: ConvertArgs, portal: &dyn PortalApi) -> Result<()> {
    if args.item_ids.is_empty() {
        bail!("No item ids given");
    }
    info!("Converting {} from {}", args.item_ids.join(", "), portal.portal_url());

    let options = CreateOptions {
        title: args.title,
        follow_dependencies: !args.no_follow,
        save: args.save,
    };
    let created = create_solution(&args.item_ids, portal, &options)
        .await
        .context("Failed to create solution")?;

    let text = serde_json::to_string_pretty(&created.solution)?;
    write_output(&text, args.output.as_deref())?;

    if let Some(path) = &args.output {
        eprintln!(
            "{} {} template(s) to {}",
            globals.ok("Wrote"),
            created.solution.templates.len(),
            path.display()
        );
    }
    if let Some(id) = created.solution_item_id {
        eprintln!("{} solution item {}", globals.ok("Saved"), id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::rest::MemoryPortal;
    use crate::types::Solution;
    use serde_json::json;

    const MAP: &str = "11111111111111111111111111111111";

    #[tokio::test]
    async fn test_convert_writes_solution_file() {
        let portal = MemoryPortal::new("https://source");
        portal.insert_item(json!({"id": MAP, "type": "Web Map", "title": "Parks"}), Some(json!({"operationalLayers": []})));
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("parks.json");
        let globals = Globals {
            config: Config::default(),
            json: false,
            color: false,
        };
        let args = ConvertArgs {
            item_ids: vec![MAP.into()],
            output: Some(output.clone()),
            title: None,
            save: false,
            no_follow: false,
        };

        convert_with(&globals, args, &portal).await.unwrap();

        let solution: Solution = serde_json::from_str(&std::fs::read_to_string(output).unwrap()).unwrap();
        assert_eq!(solution.metadata.title, "Parks");
        assert_eq!(solution.item_ids(), vec![MAP]);
    }
}
