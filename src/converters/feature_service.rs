// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Feature services
//!
//! Services are captured for reference only: their layers and fields feed
//! field-reference templatizing, and deploying registers the existing
//! service in the dictionary instead of copying its data.

use super::{Deployed, ItemConverter};
use crate::error::Result;
use crate::props::get_str;
use crate::rest::PortalApi;
use crate::templatize::{url_token, LayerEntry, TemplateDictionary};
use crate::types::ItemTemplate;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Service properties kept in the template
const SERVICE_PROPERTIES: &[&str] = &[
    "currentVersion",
    "serviceDescription",
    "capabilities",
    "maxRecordCount",
    "spatialReference",
];

/// Layer properties kept in the template
const LAYER_PROPERTIES: &[&str] = &["id", "name", "type", "geometryType", "displayField"];

/// Reference-only service templates
pub struct FeatureServiceConverter;

fn select(value: &Value, keys: &[&str]) -> Value {
    let mut kept = Map::new();
    for key in keys {
        if let Some(v) = value.get(*key) {
            kept.insert((*key).to_string(), v.clone());
        }
    }
    Value::Object(kept)
}

fn describe_layer(layer: &Value) -> Value {
    let mut described = select(layer, LAYER_PROPERTIES);
    let fields: Vec<Value> = layer
        .get("fields")
        .and_then(Value::as_array)
        .map(|fields| fields.iter().map(|f| select(f, &["name", "type", "alias"])).collect())
        .unwrap_or_default();
    described["fields"] = Value::Array(fields);
    described
}

/// Layer entries for the dictionary from a template's captured layers
#[must_use]
pub fn layer_entries(template: &ItemTemplate, service_url: &str) -> Vec<LayerEntry> {
    let mut entries = Vec::new();
    for key in ["layers", "tables"] {
        let Some(layers) = template.properties.get(key).and_then(Value::as_array) else {
            continue;
        };
        for layer in layers {
            let Some(layer_id) = layer.get("id").and_then(Value::as_u64).and_then(|n| u32::try_from(n).ok()) else {
                continue;
            };
            let fields = layer
                .get("fields")
                .and_then(Value::as_array)
                .map(|fields| {
                    fields
                        .iter()
                        .filter_map(|f| f.get("name").and_then(Value::as_str).map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            entries.push(LayerEntry {
                layer_id,
                url: format!("{}/{layer_id}", service_url.trim_end_matches('/')),
                fields,
            });
        }
    }
    entries
}

#[async_trait]
impl ItemConverter for FeatureServiceConverter {
    async fn convert_to_template(&self, template: &mut ItemTemplate, portal: &dyn PortalApi) -> Result<()> {
        let Some(url) = get_str(&template.item, "url").map(|u| u.trim_end_matches('/').to_string()) else {
            debug!("Feature service {} has no url", template.item_id);
            return Ok(());
        };
        let ids = [template.item_id.as_str()];
        let service = portal.get_json(&url).await.map_err(|e| e.with_ids(&ids))?;

        let mut properties = Map::new();
        properties.insert("serviceUrl".into(), Value::String(url.clone()));
        properties.insert("service".into(), select(&service, SERVICE_PROPERTIES));

        for key in ["layers", "tables"] {
            let layer_ids: Vec<u64> = service
                .get(key)
                .and_then(Value::as_array)
                .map(|layers| layers.iter().filter_map(|l| l.get("id").and_then(Value::as_u64)).collect())
                .unwrap_or_default();
            let lookups = layer_ids.iter().map(|id| {
                let layer_url = format!("{url}/{id}");
                async move { portal.get_json(&layer_url).await }
            });
            let mut described = Vec::new();
            for result in join_all(lookups).await {
                described.push(describe_layer(&result.map_err(|e| e.with_ids(&ids))?));
            }
            properties.insert(key.into(), Value::Array(described));
        }

        template.properties = Value::Object(properties);
        template.item["url"] = Value::String(url_token(&template.item_id));
        template.estimated_deployment_cost_factor = 1;
        Ok(())
    }

    async fn create_item(
        &self,
        template: &ItemTemplate,
        _folder_id: Option<&str>,
        _portal: &dyn PortalApi,
    ) -> Result<Deployed> {
        info!("Reusing feature service {}", template.item_id);
        Ok(Deployed {
            item_id: template.item_id.clone(),
            created: false,
        })
    }

    fn register(&self, template: &ItemTemplate, deployed: &Deployed, dictionary: &mut TemplateDictionary) {
        let url = dictionary
            .get_str(&format!("{}.url", template.item_id))
            .or_else(|| template.properties.get("serviceUrl").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();
        let entries: Vec<LayerEntry> = layer_entries(template, &url)
            .into_iter()
            .filter(|entry| {
                dictionary
                    .get(&format!("{}.layer{}", template.item_id, entry.layer_id))
                    .is_none()
            })
            .collect();
        dictionary.insert_service(&template.item_id, &deployed.item_id, &url, &entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::MemoryPortal;
    use serde_json::json;

    const SVC: &str = "22222222222222222222222222222222";
    const URL: &str = "https://s/arcgis/rest/services/Roads/FeatureServer";

    fn portal() -> MemoryPortal {
        let portal = MemoryPortal::new("https://org");
        portal.add_service_json(URL, json!({
            "serviceItemId": SVC,
            "capabilities": "Query",
            "layers": [{"id": 0, "name": "Roads"}],
            "tables": [{"id": 1, "name": "Inspections"}]
        }));
        portal.add_service_json(&format!("{URL}/0"), json!({
            "id": 0, "name": "Roads", "geometryType": "esriGeometryPolyline",
            "fields": [{"name": "OBJECTID", "type": "esriFieldTypeOID", "alias": "OID", "length": 4}, {"name": "NAME"}]
        }));
        portal.add_service_json(&format!("{URL}/1"), json!({
            "id": 1, "name": "Inspections", "fields": [{"name": "ROAD_ID"}]
        }));
        portal
    }

    #[tokio::test]
    async fn test_service_captured() {
        let mut t = ItemTemplate::initialize(&json!({"id": SVC, "type": "Feature Service", "url": format!("{URL}/")}));
        FeatureServiceConverter.convert_to_template(&mut t, &portal()).await.unwrap();

        assert_eq!(t.item["url"], format!("{{{{{SVC}.url}}}}"));
        assert_eq!(t.properties["serviceUrl"], URL);
        assert_eq!(t.properties["service"], json!({"capabilities": "Query"}));
        assert_eq!(t.properties["layers"][0]["fields"][0], json!({"name": "OBJECTID", "type": "esriFieldTypeOID", "alias": "OID"}));
        assert_eq!(t.properties["tables"][0]["name"], "Inspections");
        assert_eq!(t.estimated_deployment_cost_factor, 1);
    }

    #[tokio::test]
    async fn test_missing_layer_reports_item() {
        let portal = MemoryPortal::new("https://org");
        portal.add_service_json(URL, json!({"layers": [{"id": 7}]}));
        let mut t = ItemTemplate::initialize(&json!({"id": SVC, "type": "Feature Service", "url": URL}));
        let err = FeatureServiceConverter.convert_to_template(&mut t, &portal).await.unwrap_err();
        assert!(err.item_ids().contains(&SVC.to_string()));
    }

    #[tokio::test]
    async fn test_reuse_registers_service() {
        let mut t = ItemTemplate::initialize(&json!({"id": SVC, "type": "Feature Service", "url": URL}));
        FeatureServiceConverter.convert_to_template(&mut t, &portal()).await.unwrap();

        let deployed = FeatureServiceConverter
            .create_item(&t, None, &MemoryPortal::new("https://dest"))
            .await
            .unwrap();
        assert!(!deployed.created);

        let mut dictionary = TemplateDictionary::new();
        FeatureServiceConverter.register(&t, &deployed, &mut dictionary);
        assert_eq!(dictionary.item_id(SVC), Some(SVC));
        assert_eq!(dictionary.get_str(&format!("{SVC}.url")), Some(URL));
        assert_eq!(dictionary.get_str(&format!("{SVC}.layer0.url")), Some(format!("{URL}/0").as_str()));
        assert_eq!(dictionary.get_str(&format!("{SVC}.layer1.fields.road_id.name")), Some("ROAD_ID"));
    }

    #[test]
    fn test_register_keeps_overridden_url() {
        let mut t = ItemTemplate::initialize(&json!({"id": SVC, "type": "Feature Service"}));
        t.properties = json!({"serviceUrl": URL, "layers": [{"id": 0, "fields": [{"name": "A"}]}]});
        let mut dictionary = TemplateDictionary::new();
        dictionary.set(&format!("{SVC}.url"), json!("https://other/FeatureServer"));
        let deployed = Deployed { item_id: "mapped".into(), created: false };

        FeatureServiceConverter.register(&t, &deployed, &mut dictionary);
        assert_eq!(dictionary.get_str(&format!("{SVC}.layer0.url")), Some("https://other/FeatureServer/0"));
        assert_eq!(dictionary.item_id(SVC), Some("mapped"));
    }
}
