// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Building solutions from source items
//!
//! An item is fetched with its data, resource names and related items,
//! turned into a template by its type's converter, and its dependencies are
//! followed until every reachable item has a template.

use crate::converters::converter_for;
use crate::error::{Result, SolutionError};
use crate::fields::{datasource_infos, post_process_field_references};
use crate::rest::PortalApi;
use crate::types::{ItemTemplate, RelatedItems, Solution, SolutionMetadata, TEMPLATE_VERSION};
use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Forward relationship types captured with each item
pub const RELATIONSHIP_TYPES: &[&str] = &[
    "Map2Service",
    "Map2FeatureCollection",
    "WMA2Code",
    "MobileApp2Code",
    "Survey2Service",
    "Survey2Data",
    "Service2Data",
    "Map2AppConfig",
];

/// How a solution is built
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Solution title; defaults to the first requested item's title
    pub title: Option<String>,
    /// Convert dependencies that were not requested explicitly
    pub follow_dependencies: bool,
    /// Store the solution as a `Solution` item in the source portal
    pub save: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            title: None,
            follow_dependencies: true,
            save: false,
        }
    }
}

/// A built solution and, when saved, the id of its item
#[derive(Debug, Clone)]
pub struct CreatedSolution {
    /// The templates and metadata
    pub solution: Solution,
    /// Id of the saved `Solution` item
    pub solution_item_id: Option<String>,
}

async fn related_items(item_id: &str, portal: &dyn PortalApi) -> Vec<RelatedItems> {
    let lookups = RELATIONSHIP_TYPES.iter().map(|relationship_type| async move {
        let result = portal.get_related_items(item_id, relationship_type).await;
        (*relationship_type, result)
    });

    let mut related = Vec::new();
    for (relationship_type, result) in join_all(lookups).await {
        match result {
            Ok(ids) if !ids.is_empty() => related.push(RelatedItems {
                relationship_type: relationship_type.to_string(),
                related_item_ids: ids,
            }),
            Ok(_) => {}
            Err(e) => debug!("No {} relationships for {}: {}", relationship_type, item_id, e),
        }
    }
    related
}

/// Fetch an item and convert it into a template.
///
/// A missing data blob is not an error, and neither is data that is not
/// JSON (images, PDFs, files). Resource and relationship lookups that fail
/// are logged and treated as empty.
pub async fn convert_item_to_template(item_id: &str, portal: &dyn PortalApi) -> Result<ItemTemplate> {
    let ids = [item_id];
    let item = portal.get_item(item_id).await.map_err(|e| e.with_ids(&ids))?;

    let (data, resources, related) = tokio::join!(
        portal.get_item_data(item_id),
        portal.get_item_resources(item_id),
        related_items(item_id, portal),
    );

    let mut template = ItemTemplate::initialize(&item);
    template.data = match data {
        Ok(data) => data.unwrap_or(Value::Null),
        Err(SolutionError::Json(e)) => {
            warn!("Data of {} is not JSON, leaving it out: {}", item_id, e);
            Value::Null
        }
        Err(e) => return Err(e.with_ids(&ids)),
    };
    template.resources = resources.unwrap_or_else(|e| {
        warn!("Could not list resources of {}: {}", item_id, e);
        Vec::new()
    });
    template.related_items = related;

    debug!("Converting {} ({})", item_id, template.item_type);
    converter_for(&template.kind())
        .convert_to_template(&mut template, portal)
        .await
        .map_err(|e| e.with_ids(&ids))?;
    Ok(template)
}

/// Build a solution from `item_ids` and, unless disabled, everything they
/// depend on. Field references are templatized once all templates exist.
pub async fn create_solution(
    item_ids: &[String],
    portal: &dyn PortalApi,
    options: &CreateOptions,
) -> Result<CreatedSolution> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut pending: Vec<String> = item_ids.iter().filter(|id| seen.insert((*id).clone())).cloned().collect();
    let mut solution = Solution::default();

    while !pending.is_empty() {
        info!("Converting {} item(s)", pending.len());
        let converted = join_all(pending.iter().map(|id| convert_item_to_template(id, portal))).await;

        let mut next = Vec::new();
        for template in converted {
            let template = template?;
            if options.follow_dependencies {
                next.extend(
                    template
                        .dependencies
                        .iter()
                        .filter(|dep| seen.insert((*dep).clone()))
                        .cloned(),
                );
            }
            solution.replace_template(template);
        }
        pending = next;
    }

    let infos = datasource_infos(&solution.templates);
    debug!("Templatizing field references against {} layer(s)", infos.len());
    post_process_field_references(&mut solution.templates, &infos);

    let title = options
        .title
        .clone()
        .or_else(|| {
            item_ids
                .first()
                .and_then(|id| solution.template_by_id(id))
                .and_then(|t| t.item.get("title"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Solution".to_string());

    solution.metadata = SolutionMetadata {
        title,
        source_portal: Some(portal.portal_url().to_string()),
        source_item_ids: item_ids.to_vec(),
        created: Some(Utc::now()),
        template_version: Some(TEMPLATE_VERSION.to_string()),
    };

    let solution_item_id = if options.save {
        let item = json!({
            "type": "Solution",
            "title": solution.metadata.title,
            "typeKeywords": ["Solution", "Template"],
        });
        let data = serde_json::to_value(&solution)?;
        let id = portal.add_item(&item, Some(&data), None).await?;
        info!("Saved solution as item {}", id);
        Some(id)
    } else {
        None
    };

    info!(
        "Solution '{}' has {} template(s)",
        solution.metadata.title,
        solution.templates.len()
    );
    Ok(CreatedSolution {
        solution,
        solution_item_id,
    })
}
