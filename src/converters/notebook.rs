// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! ArcGIS Notebooks
//!
//! Notebook cells are free text, so every 32 digit hex string is a
//! candidate id. Only candidates the portal knows as items are templatized.
//! The notebook's references to itself resolve in the second
//! detemplatizing pass once its new id exists.

use super::ItemConverter;
use crate::error::Result;
use crate::rest::PortalApi;
use crate::templatize::{find_item_ids, map_strings, templatize_item_ids};
use crate::types::ItemTemplate;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// Item ids referenced from notebook cells
pub struct NotebookConverter;

fn candidate_ids(data: &Value) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let mut scratch = data.clone();
    map_strings(&mut scratch, &mut |s| {
        for id in find_item_ids(s) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        None
    });
    ids
}

#[async_trait]
impl ItemConverter for NotebookConverter {
    async fn convert_to_template(&self, template: &mut ItemTemplate, portal: &dyn PortalApi) -> Result<()> {
        let candidates: Vec<String> = candidate_ids(&template.data)
            .into_iter()
            .filter(|id| *id != template.item_id)
            .collect();

        let lookups = candidates.iter().map(|id| async move {
            let found = portal.get_item(id).await;
            (id, found)
        });
        let mut verified: HashSet<String> = HashSet::new();
        let mut dependencies = Vec::new();
        for (id, found) in join_all(lookups).await {
            match found {
                Ok(_) => {
                    verified.insert(id.clone());
                    dependencies.push(id.clone());
                }
                // Not an item, or not one we can see
                Err(e) => debug!("Notebook {}: {} is not an item ({})", template.item_id, id, e),
            }
        }
        verified.insert(template.item_id.clone());

        map_strings(&mut template.data, &mut |s| {
            let replaced = templatize_item_ids(s, |id| verified.contains(id));
            (replaced != s).then_some(replaced)
        });
        for id in dependencies {
            template.add_dependency(&id);
        }
        Ok(())
    }
}
