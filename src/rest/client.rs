// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! reqwest-backed portal client

use super::PortalApi;
use crate::error::{Result, SolutionError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

/// Client for a live ArcGIS Online or Enterprise portal
pub struct RestPortal {
    client: Client,
    portal_url: String,
    token: Option<String>,
    username: OnceCell<String>,
}

impl RestPortal {
    /// Create a client for `portal_url`, authenticating with `token`
    pub fn new(portal_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            portal_url: portal_url.trim_end_matches('/').to_string(),
            token,
            username: OnceCell::new(),
        })
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/sharing/rest/{}", self.portal_url, path.trim_start_matches('/'))
    }

    fn base_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("f".to_string(), "json".to_string())];
        if let Some(token) = &self.token {
            params.push(("token".to_string(), token.clone()));
        }
        params
    }

    async fn get_value(&self, url: &str, extra: &[(&str, &str)]) -> Result<Value> {
        debug!("GET {}", url);
        let mut params = self.base_params();
        params.extend(extra.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())));

        let response = self.client.get(url).query(&params).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SolutionError::request(i64::from(status.as_u16()), text, &[]));
        }
        parse_response(&text)
    }

    async fn post_form(&self, url: &str, form: Vec<(String, String)>) -> Result<Value> {
        debug!("POST {}", url);
        let mut params = self.base_params();
        params.extend(form);

        let response = self.client.post(url).form(&params).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SolutionError::request(i64::from(status.as_u16()), text, &[]));
        }
        parse_response(&text)
    }

    /// Signed-in user's name, fetched once from `portals/self`
    async fn username(&self) -> Result<&str> {
        let name = self
            .username
            .get_or_try_init(|| async {
                let me = self.portal_self().await?;
                me.pointer("/user/username")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| SolutionError::request(401, "not signed in", &[]))
            })
            .await?;
        Ok(name.as_str())
    }

    async fn user_content_url(&self, suffix: &str) -> Result<String> {
        let user = self.username().await?;
        Ok(self.rest_url(&format!("content/users/{user}/{suffix}")))
    }
}

/// Parse a portal response, turning the `{"error": ...}` envelope into an error
fn parse_response(text: &str) -> Result<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    let value: Value = serde_json::from_str(text)?;
    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(500);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown portal error")
            .to_string();
        return Err(SolutionError::request(code, message, &[]));
    }
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(SolutionError::request(500, "portal reported failure", &[]));
    }
    Ok(value)
}

/// Flatten item JSON into `addItem`/`update` form fields.
///
/// Arrays of strings become comma lists, an extent becomes
/// `xmin,ymin,xmax,ymax`, other objects are sent as JSON text.
pub(crate) fn item_form(item: &Value, data: Option<&Value>) -> Vec<(String, String)> {
    let mut form = Vec::new();
    if let Some(map) = item.as_object() {
        for (key, value) in map {
            if key == "id" {
                continue;
            }
            let text = match (key.as_str(), value) {
                (_, Value::Null) => continue,
                ("extent", Value::Array(corners)) => corners
                    .iter()
                    .filter_map(Value::as_array)
                    .flatten()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
                (_, Value::String(s)) => s.clone(),
                (_, Value::Array(items)) if items.iter().all(Value::is_string) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(","),
                (_, other) => other.to_string(),
            };
            form.push((key.clone(), text));
        }
    }
    if let Some(data) = data {
        if !data.is_null() {
            form.push(("text".to_string(), data.to_string()));
        }
    }
    form
}

#[async_trait]
impl PortalApi for RestPortal {
    fn portal_url(&self) -> &str {
        &self.portal_url
    }

    async fn get_item(&self, item_id: &str) -> Result<Value> {
        self.get_value(&self.rest_url(&format!("content/items/{item_id}")), &[])
            .await
            .map_err(|e| e.with_ids(&[item_id]))
    }

    async fn get_item_data(&self, item_id: &str) -> Result<Option<Value>> {
        let value = self
            .get_value(&self.rest_url(&format!("content/items/{item_id}/data")), &[])
            .await
            .map_err(|e| e.with_ids(&[item_id]))?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn get_item_resources(&self, item_id: &str) -> Result<Vec<String>> {
        let value = self
            .get_value(&self.rest_url(&format!("content/items/{item_id}/resources")), &[("num", "1000")])
            .await
            .map_err(|e| e.with_ids(&[item_id]))?;
        Ok(value
            .get("resources")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|r| r.get("resource").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_item_resource_text(&self, item_id: &str, name: &str) -> Result<String> {
        let url = self.rest_url(&format!("content/items/{item_id}/resources/{name}"));
        debug!("GET {}", url);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.query(&[("token", token)]);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SolutionError::request(
                i64::from(status.as_u16()),
                format!("resource {name} unavailable"),
                &[item_id],
            ));
        }
        Ok(response.text().await?)
    }

    async fn get_related_items(&self, item_id: &str, relationship_type: &str) -> Result<Vec<String>> {
        let value = self
            .get_value(
                &self.rest_url(&format!("content/items/{item_id}/relatedItems")),
                &[("relationshipType", relationship_type), ("direction", "forward")],
            )
            .await
            .map_err(|e| e.with_ids(&[item_id]))?;
        Ok(value
            .get("relatedItems")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|r| r.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        self.get_value(url, &[]).await
    }

    async fn portal_self(&self) -> Result<Value> {
        self.get_value(&self.rest_url("portals/self"), &[]).await
    }

    async fn create_folder(&self, title: &str) -> Result<String> {
        let url = self.user_content_url("createFolder").await?;
        let value = self.post_form(&url, vec![("title".into(), title.into())]).await?;
        value
            .pointer("/folder/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SolutionError::request(500, format!("folder '{title}' was not created"), &[]))
    }

    async fn delete_folder(&self, folder_id: &str) -> Result<()> {
        let url = self.user_content_url(&format!("{folder_id}/delete")).await?;
        self.post_form(&url, Vec::new()).await.map(|_| ())
    }

    async fn add_item(&self, item: &Value, data: Option<&Value>, folder_id: Option<&str>) -> Result<String> {
        let url = match folder_id {
            Some(folder) => self.user_content_url(&format!("{folder}/addItem")).await?,
            None => self.user_content_url("addItem").await?,
        };
        let value = self.post_form(&url, item_form(item, data)).await?;
        value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SolutionError::request(500, "addItem returned no id", &[]))
    }

    async fn update_item(&self, item_id: &str, item: &Value, data: Option<&Value>) -> Result<()> {
        let url = self.user_content_url(&format!("items/{item_id}/update")).await?;
        self.post_form(&url, item_form(item, data))
            .await
            .map(|_| ())
            .map_err(|e| e.with_ids(&[item_id]))
    }

    async fn delete_item(&self, item_id: &str) -> Result<()> {
        let url = self.user_content_url(&format!("items/{item_id}/delete")).await?;
        self.post_form(&url, Vec::new())
            .await
            .map(|_| ())
            .map_err(|e| e.with_ids(&[item_id]))
    }

    async fn add_relationship(&self, origin_id: &str, destination_id: &str, relationship_type: &str) -> Result<()> {
        let url = self.user_content_url("addRelationship").await?;
        let form = vec![
            ("originItemId".to_string(), origin_id.to_string()),
            ("destinationItemId".to_string(), destination_id.to_string()),
            ("relationshipType".to_string(), relationship_type.to_string()),
        ];
        self.post_form(&url, form)
            .await
            .map(|_| ())
            .map_err(|e| e.with_ids(&[origin_id, destination_id]))
    }

    async fn update_item_resource_text(&self, item_id: &str, name: &str, text: &str) -> Result<()> {
        let url = self.user_content_url(&format!("items/{item_id}/updateResources")).await?;
        let form = vec![
            ("fileName".to_string(), name.to_string()),
            ("text".to_string(), text.to_string()),
        ];
        self.post_form(&url, form)
            .await
            .map(|_| ())
            .map_err(|e| e.with_ids(&[item_id]))
    }

    async fn query_features(&self, layer_url: &str, where_clause: &str) -> Result<Vec<Value>> {
        let url = format!("{}/query", layer_url.trim_end_matches('/'));
        let form = vec![
            ("where".to_string(), where_clause.to_string()),
            ("outFields".to_string(), "*".to_string()),
        ];
        let value = self.post_form(&url, form).await?;
        Ok(value
            .get("features")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_features(&self, layer_url: &str, features: &[Value]) -> Result<()> {
        let url = format!("{}/addFeatures", layer_url.trim_end_matches('/'));
        let form = vec![("features".to_string(), Value::Array(features.to_vec()).to_string())];
        let value = self.post_form(&url, form).await?;
        let failed = value
            .get("addResults")
            .and_then(Value::as_array)
            .is_some_and(|results| {
                results
                    .iter()
                    .any(|r| r.get("success").and_then(Value::as_bool) == Some(false))
            });
        if failed {
            return Err(SolutionError::request(500, format!("addFeatures failed on {layer_url}"), &[]));
        }
        Ok(())
    }
}
