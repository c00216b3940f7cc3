// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Operations dashboards

use super::{is_item_id, ItemConverter};
use crate::error::Result;
use crate::props::array_at_mut;
use crate::rest::PortalApi;
use crate::templatize::{item_id_token, layer_token};
use crate::types::ItemTemplate;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Widgets, selectors and URL parameters with their datasets
pub struct DashboardConverter;

/// Arrays in dashboard data whose entries may hold item references
pub const DASHBOARD_SECTIONS: &[&str] = &[
    "widgets",
    "headerPanel.selectors",
    "leftPanel.selectors",
    "urlParameters",
];

fn templatize_widget(widget: &mut Value, dependencies: &mut Vec<String>) {
    // Map and embedded content widgets point straight at an item
    if let Some(Value::String(id)) = widget.get_mut("itemId") {
        if is_item_id(id) {
            dependencies.push(id.clone());
            *id = item_id_token(id);
        }
    }

    for dataset in array_at_mut(widget, "datasets") {
        templatize_dataset(dataset, dependencies);
    }
}

fn templatize_dataset(dataset: &mut Value, dependencies: &mut Vec<String>) {
    if dataset.get("type").and_then(Value::as_str) == Some("staticDataset") {
        return;
    }
    let Some(source) = dataset.get_mut("dataSource").and_then(Value::as_object_mut) else {
        return;
    };
    let Some(id) = source.get("itemId").and_then(Value::as_str).filter(|id| is_item_id(id)) else {
        return;
    };
    let id = id.to_string();

    match source.get("layerId").and_then(Value::as_u64).and_then(|n| u32::try_from(n).ok()) {
        Some(layer) => {
            source.insert("itemId".into(), Value::String(layer_token(&id, layer, "itemId")));
            source.insert("layerId".into(), Value::String(layer_token(&id, layer, "layerId")));
        }
        None => {
            source.insert("itemId".into(), Value::String(item_id_token(&id)));
        }
    }
    dependencies.push(id);
}

#[async_trait]
impl ItemConverter for DashboardConverter {
    async fn convert_to_template(&self, template: &mut ItemTemplate, _portal: &dyn PortalApi) -> Result<()> {
        let mut dependencies = Vec::new();
        for section in DASHBOARD_SECTIONS {
            for widget in array_at_mut(&mut template.data, section) {
                templatize_widget(widget, &mut dependencies);
            }
        }
        debug!(
            "Dashboard {} references {} item(s)",
            template.item_id,
            dependencies.len()
        );
        for id in dependencies {
            template.add_dependency(&id);
        }
        Ok(())
    }
}
