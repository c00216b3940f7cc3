// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Web maps

use super::{is_item_id, resolve_url_token, ItemConverter};
use crate::error::Result;
use crate::props::array_at_mut;
use crate::rest::{is_service_url, layer_id, resolve_service_item_ids, PortalApi};
use crate::templatize::{item_id_token, layer_token, PORTAL_BASE_URL};
use crate::types::ItemTemplate;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Operational layers and tables pointing at services or feature collections
pub struct WebMapConverter;

const LAYER_LISTS: &[&str] = &["operationalLayers", "tables"];

fn collect_urls(layer: &Value, urls: &mut Vec<String>) {
    if let Some(url) = layer.get("url").and_then(Value::as_str) {
        if is_service_url(url) {
            urls.push(url.to_string());
        }
    }
    if let Some(children) = layer.get("layers").and_then(Value::as_array) {
        for child in children {
            collect_urls(child, urls);
        }
    }
}

/// Rewrite one layer and its children, collecting the ids they depend on
fn templatize_layer(layer: &mut Value, services: &HashMap<String, String>, dependencies: &mut Vec<String>) {
    let url = layer.get("url").and_then(Value::as_str).map(str::to_string);
    let resolved = url.as_deref().and_then(|u| resolve_url_token(u, services));

    match resolved {
        Some((url_token, service_id)) => {
            if let Some(map) = layer.as_object_mut() {
                map.insert("url".into(), Value::String(url_token));
                if map.contains_key("itemId") {
                    let item_token = match url.as_deref().and_then(layer_id) {
                        Some(n) => layer_token(&service_id, n, "itemId"),
                        None => item_id_token(&service_id),
                    };
                    map.insert("itemId".into(), Value::String(item_token));
                }
            }
            dependencies.push(service_id);
        }
        None => {
            // Feature collections and other item-backed layers without a service
            if let Some(Value::String(id)) = layer.get_mut("itemId") {
                if is_item_id(id) {
                    dependencies.push(id.clone());
                    *id = item_id_token(id);
                }
            }
        }
    }

    for child in array_at_mut(layer, "layers") {
        templatize_layer(child, services, dependencies);
    }
}

#[async_trait]
impl ItemConverter for WebMapConverter {
    async fn convert_to_template(&self, template: &mut ItemTemplate, portal: &dyn PortalApi) -> Result<()> {
        if template.item.get("url").is_some_and(|u| !u.is_null()) {
            template.item["url"] = Value::String(format!(
                "{PORTAL_BASE_URL}/home/webmap/viewer.html?webmap={}",
                item_id_token(&template.item_id)
            ));
        }

        let mut urls = Vec::new();
        for list in LAYER_LISTS {
            if let Some(layers) = template.data.get(*list).and_then(Value::as_array) {
                layers.iter().for_each(|l| collect_urls(l, &mut urls));
            }
        }
        let services = resolve_service_item_ids(portal, &urls).await;
        debug!(
            "Web map {} uses {} layer url(s) across {} service(s)",
            template.item_id,
            urls.len(),
            services.len()
        );

        let mut dependencies = Vec::new();
        for list in LAYER_LISTS {
            for layer in array_at_mut(&mut template.data, list) {
                templatize_layer(layer, &services, &mut dependencies);
            }
        }
        for id in dependencies {
            template.add_dependency(&id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::MemoryPortal;
    use serde_json::json;

    const MAP: &str = "11111111111111111111111111111111";
    const SVC: &str = "22222222222222222222222222222222";
    const FC: &str = "33333333333333333333333333333333";

    #[tokio::test]
    async fn test_web_map_layers_templatized() {
        let portal = MemoryPortal::new("https://org.maps.arcgis.com");
        portal.add_service_json("https://s/Roads/FeatureServer", json!({"serviceItemId": SVC}));

        let mut t = ItemTemplate::initialize(&json!({
            "id": MAP,
            "type": "Web Map",
            "url": "https://org.maps.arcgis.com/home/webmap/viewer.html?webmap=1"
        }));
        t.data = json!({
            "operationalLayers": [
                {"id": "roads", "url": "https://s/Roads/FeatureServer/0", "itemId": SVC},
                {"id": "notes", "itemId": FC, "featureCollection": {"layers": []}},
                {"id": "group", "layerType": "GroupLayer", "layers": [
                    {"id": "roads2", "url": "https://s/Roads/FeatureServer/2"}
                ]},
                {"id": "other", "url": "https://s/Unknown/FeatureServer/0"}
            ],
            "tables": [{"id": "t", "url": "https://s/Roads/FeatureServer/5"}],
            "baseMap": {"baseMapLayers": [{"url": "https://basemaps/MapServer"}]}
        });

        WebMapConverter.convert_to_template(&mut t, &portal).await.unwrap();

        let layers = &t.data["operationalLayers"];
        assert_eq!(layers[0]["url"], format!("{{{{{SVC}.layer0.url}}}}"));
        assert_eq!(layers[0]["itemId"], format!("{{{{{SVC}.layer0.itemId}}}}"));
        assert_eq!(layers[1]["itemId"], format!("{{{{{FC}.itemId}}}}"));
        assert_eq!(layers[2]["layers"][0]["url"], format!("{{{{{SVC}.layer2.url}}}}"));
        assert_eq!(layers[3]["url"], "https://s/Unknown/FeatureServer/0");
        assert_eq!(t.data["tables"][0]["url"], format!("{{{{{SVC}.layer5.url}}}}"));
        assert_eq!(t.data["baseMap"]["baseMapLayers"][0]["url"], "https://basemaps/MapServer");
        assert_eq!(t.dependencies, vec![SVC.to_string(), FC.to_string()]);
        assert_eq!(
            t.item["url"],
            format!("{{{{portalBaseUrl}}}}/home/webmap/viewer.html?webmap={{{{{MAP}.itemId}}}}")
        );
    }
}
