// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! QuickCapture projects
//!
//! The project definition lives in the `qc.project.json` resource rather
//! than in the item data. It is carried in the template as
//! `data.application` and written back as the resource after deployment.

use super::{is_item_id, service_url_token, Deployed, ItemConverter};
use crate::error::Result;
use crate::props::{array_at_mut, get_prop, get_prop_mut};
use crate::rest::PortalApi;
use crate::templatize::{item_id_token, TemplateDictionary};
use crate::types::ItemTemplate;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Resource holding the QuickCapture project definition
pub const QC_PROJECT_RESOURCE: &str = "qc.project.json";

/// Project basemap and data sources
pub struct QuickCaptureConverter;

fn templatize_project(template: &mut ItemTemplate) {
    let own_id = template.item_id.clone();
    let mut dependencies = Vec::new();
    let Some(project) = get_prop_mut(&mut template.data, "application") else {
        return;
    };

    if let Some(Value::String(id)) = project.get_mut("itemId") {
        if *id == own_id {
            *id = item_id_token(&own_id);
        }
    }

    if let Some(Value::String(id)) = get_prop_mut(project, "basemap.itemId") {
        if is_item_id(id) {
            dependencies.push(id.clone());
            *id = item_id_token(id);
        }
    }

    for source in array_at_mut(project, "dataSources") {
        let Some(service_id) = source
            .get("featureServiceItemId")
            .and_then(Value::as_str)
            .filter(|id| is_item_id(id))
            .map(str::to_string)
        else {
            continue;
        };
        source["featureServiceItemId"] = Value::String(item_id_token(&service_id));
        if let Some(Value::String(url)) = source.get_mut("url") {
            *url = service_url_token(url, &service_id);
        }
        dependencies.push(service_id);
    }

    for id in dependencies {
        template.add_dependency(&id);
    }
}

#[async_trait]
impl ItemConverter for QuickCaptureConverter {
    async fn convert_to_template(&self, template: &mut ItemTemplate, portal: &dyn PortalApi) -> Result<()> {
        if template.resources.iter().any(|r| r == QC_PROJECT_RESOURCE) {
            let text = portal
                .get_item_resource_text(&template.item_id, QC_PROJECT_RESOURCE)
                .await
                .map_err(|e| e.with_ids(&[template.item_id.as_str()]))?;
            let project: Value = serde_json::from_str(&text)?;
            template.data = json!({ "application": project });
        } else {
            debug!("QuickCapture project {} has no {}", template.item_id, QC_PROJECT_RESOURCE);
        }
        templatize_project(template);
        Ok(())
    }

    fn carries_data(&self) -> bool {
        false
    }

    async fn fine_tune(
        &self,
        template: &ItemTemplate,
        deployed: &Deployed,
        _dictionary: &TemplateDictionary,
        portal: &dyn PortalApi,
    ) -> Result<Vec<String>> {
        let Some(project) = get_prop(&template.data, "application") else {
            return Ok(Vec::new());
        };
        let text = serde_json::to_string(project)?;
        portal
            .update_item_resource_text(&deployed.item_id, QC_PROJECT_RESOURCE, &text)
            .await?;
        info!("Wrote {} for {}", QC_PROJECT_RESOURCE, deployed.item_id);
        Ok(Vec::new())
    }
}
