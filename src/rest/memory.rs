// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! In-memory portal for dry runs and tests

use super::PortalApi;
use crate::error::{Result, SolutionError};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{LazyLock, Mutex, MutexGuard};

static EQUALS_WHERE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\w+)\s*=\s*'([^']*)'\s*$").expect("where pattern"));

#[derive(Default)]
struct State {
    items: HashMap<String, Value>,
    data: HashMap<String, Value>,
    resources: HashMap<(String, String), String>,
    relationships: Vec<(String, String, String)>,
    services: HashMap<String, Value>,
    features: HashMap<String, Vec<Value>>,
    folders: Vec<(String, String)>,
    deleted: Vec<String>,
    failing_types: HashSet<String>,
    failing_relationships: bool,
    raw_data: HashMap<String, String>,
    next_id: u64,
}

/// A portal whose content lives in process memory
pub struct MemoryPortal {
    portal_url: String,
    username: String,
    state: Mutex<State>,
}

fn not_found(what: &str, id: &str) -> SolutionError {
    SolutionError::request(400, format!("{what} not found"), &[id])
}

impl MemoryPortal {
    /// Empty portal signed in as `portal-user`
    #[must_use]
    pub fn new(portal_url: &str) -> Self {
        Self {
            portal_url: portal_url.trim_end_matches('/').to_string(),
            username: "portal-user".to_string(),
            state: Mutex::new(State::default()),
        }
    }

    /// Change the signed-in user
    #[must_use]
    pub fn with_username(mut self, username: &str) -> Self {
        self.username = username.to_string();
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-update
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seed an item (its JSON must carry `id`) and optional data
    pub fn insert_item(&self, item: Value, data: Option<Value>) {
        let id = item.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        let mut state = self.state();
        if let Some(data) = data {
            state.data.insert(id.clone(), data);
        }
        state.items.insert(id, item);
    }

    /// Seed a text resource
    pub fn insert_resource(&self, item_id: &str, name: &str, text: &str) {
        self.state()
            .resources
            .insert((item_id.to_string(), name.to_string()), text.to_string());
    }

    /// Seed a forward relationship
    pub fn insert_relationship(&self, origin_id: &str, destination_id: &str, relationship_type: &str) {
        self.state().relationships.push((
            origin_id.to_string(),
            destination_id.to_string(),
            relationship_type.to_string(),
        ));
    }

    /// Seed the JSON served at a service or layer URL
    pub fn add_service_json(&self, url: &str, json: Value) {
        self.state()
            .services
            .insert(url.trim_end_matches('/').to_string(), json);
    }

    /// Make `add_item` fail for items of this type
    pub fn fail_add_for_type(&self, item_type: &str) {
        self.state().failing_types.insert(item_type.to_string());
    }

    /// Make every `add_relationship` fail
    pub fn fail_relationships(&self) {
        self.state().failing_relationships = true;
    }

    /// Serve `text` as the item's data, parsed like a portal response
    pub fn insert_raw_data(&self, item_id: &str, text: &str) {
        self.state().raw_data.insert(item_id.to_string(), text.to_string());
    }

    /// Item properties by id
    #[must_use]
    pub fn item(&self, item_id: &str) -> Option<Value> {
        self.state().items.get(item_id).cloned()
    }

    /// Item data by id
    #[must_use]
    pub fn data(&self, item_id: &str) -> Option<Value> {
        self.state().data.get(item_id).cloned()
    }

    /// Ids of all items
    #[must_use]
    pub fn item_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state().items.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// A text resource by item id and name
    #[must_use]
    pub fn resource_text(&self, item_id: &str, name: &str) -> Option<String> {
        self.state()
            .resources
            .get(&(item_id.to_string(), name.to_string()))
            .cloned()
    }

    /// All relationships as (origin, destination, type)
    #[must_use]
    pub fn relationships(&self) -> Vec<(String, String, String)> {
        self.state().relationships.clone()
    }

    /// Features stored on a layer
    #[must_use]
    pub fn features(&self, layer_url: &str) -> Vec<Value> {
        self.state()
            .features
            .get(layer_url.trim_end_matches('/'))
            .cloned()
            .unwrap_or_default()
    }

    /// Folders as (id, title)
    #[must_use]
    pub fn folders(&self) -> Vec<(String, String)> {
        self.state().folders.clone()
    }

    /// Ids deleted so far
    #[must_use]
    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    fn next_id(state: &mut State) -> String {
        state.next_id += 1;
        format!("{:032x}", state.next_id)
    }
}

#[async_trait]
impl PortalApi for MemoryPortal {
    fn portal_url(&self) -> &str {
        &self.portal_url
    }

    async fn get_item(&self, item_id: &str) -> Result<Value> {
        self.item(item_id).ok_or_else(|| not_found("item", item_id))
    }

    async fn get_item_data(&self, item_id: &str) -> Result<Option<Value>> {
        let state = self.state();
        if !state.items.contains_key(item_id) {
            return Err(not_found("item", item_id));
        }
        if let Some(text) = state.raw_data.get(item_id) {
            return Ok(Some(serde_json::from_str(text)?));
        }
        Ok(state.data.get(item_id).cloned())
    }

    async fn get_item_resources(&self, item_id: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .state()
            .resources
            .keys()
            .filter(|(id, _)| id == item_id)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn get_item_resource_text(&self, item_id: &str, name: &str) -> Result<String> {
        self.resource_text(item_id, name)
            .ok_or_else(|| not_found("resource", item_id))
    }

    async fn get_related_items(&self, item_id: &str, relationship_type: &str) -> Result<Vec<String>> {
        Ok(self
            .state()
            .relationships
            .iter()
            .filter(|(origin, _, kind)| origin == item_id && kind == relationship_type)
            .map(|(_, destination, _)| destination.clone())
            .collect())
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        self.state()
            .services
            .get(url.trim_end_matches('/'))
            .cloned()
            .ok_or_else(|| SolutionError::request(404, format!("no service at {url}"), &[]))
    }

    async fn portal_self(&self) -> Result<Value> {
        Ok(json!({
            "id": "memory-org",
            "urlKey": "memory",
            "portalHostname": self.portal_url.trim_start_matches("https://"),
            "helperServices": {
                "geometry": {"url": format!("{}/geometry", self.portal_url)}
            },
            "user": {
                "username": self.username,
                "fullName": self.username,
                "orgId": "memory-org"
            }
        }))
    }

    async fn create_folder(&self, title: &str) -> Result<String> {
        let mut state = self.state();
        let id = Self::next_id(&mut state);
        state.folders.push((id.clone(), title.to_string()));
        Ok(id)
    }

    async fn delete_folder(&self, folder_id: &str) -> Result<()> {
        let mut state = self.state();
        let before = state.folders.len();
        state.folders.retain(|(id, _)| id != folder_id);
        if state.folders.len() == before {
            return Err(not_found("folder", folder_id));
        }
        Ok(())
    }

    async fn add_item(&self, item: &Value, data: Option<&Value>, folder_id: Option<&str>) -> Result<String> {
        let mut state = self.state();
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or_default();
        if state.failing_types.contains(item_type) {
            return Err(SolutionError::request(500, format!("cannot create {item_type}"), &[]));
        }
        let id = Self::next_id(&mut state);
        let mut stored = item.clone();
        if let Some(map) = stored.as_object_mut() {
            map.insert("id".into(), Value::String(id.clone()));
            map.insert("owner".into(), Value::String(self.username.clone()));
            if let Some(folder) = folder_id {
                map.insert("ownerFolder".into(), Value::String(folder.to_string()));
            }
        }
        state.items.insert(id.clone(), stored);
        if let Some(data) = data {
            state.data.insert(id.clone(), data.clone());
        }
        Ok(id)
    }

    async fn update_item(&self, item_id: &str, item: &Value, data: Option<&Value>) -> Result<()> {
        let mut state = self.state();
        let existing = state
            .items
            .get_mut(item_id)
            .ok_or_else(|| not_found("item", item_id))?;
        if let (Some(target), Some(changes)) = (existing.as_object_mut(), item.as_object()) {
            for (key, value) in changes {
                if key != "id" {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        if let Some(data) = data {
            state.data.insert(item_id.to_string(), data.clone());
        }
        Ok(())
    }

    async fn delete_item(&self, item_id: &str) -> Result<()> {
        let mut state = self.state();
        state
            .items
            .remove(item_id)
            .ok_or_else(|| not_found("item", item_id))?;
        state.data.remove(item_id);
        state.resources.retain(|(id, _), _| id != item_id);
        state.deleted.push(item_id.to_string());
        Ok(())
    }

    async fn add_relationship(&self, origin_id: &str, destination_id: &str, relationship_type: &str) -> Result<()> {
        if self.state().failing_relationships {
            return Err(SolutionError::request(
                500,
                format!("cannot relate {origin_id} to {destination_id}"),
                &[],
            ));
        }
        self.insert_relationship(origin_id, destination_id, relationship_type);
        Ok(())
    }

    async fn update_item_resource_text(&self, item_id: &str, name: &str, text: &str) -> Result<()> {
        if !self.state().items.contains_key(item_id) {
            return Err(not_found("item", item_id));
        }
        self.insert_resource(item_id, name, text);
        Ok(())
    }

    async fn query_features(&self, layer_url: &str, where_clause: &str) -> Result<Vec<Value>> {
        let features = self.features(layer_url);
        let Some(caps) = EQUALS_WHERE_RE.captures(where_clause) else {
            return Ok(features);
        };
        Ok(features
            .into_iter()
            .filter(|f| {
                f.pointer(&format!("/attributes/{}", &caps[1]))
                    .and_then(Value::as_str)
                    == Some(&caps[2])
            })
            .collect())
    }

    async fn add_features(&self, layer_url: &str, features: &[Value]) -> Result<()> {
        self.state()
            .features
            .entry(layer_url.trim_end_matches('/').to_string())
            .or_default()
            .extend(features.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_update_delete_item() {
        let portal = MemoryPortal::new("https://dest.example.com");
        let folder = portal.create_folder("Solution").await.unwrap();
        let id = portal
            .add_item(&json!({"type": "Web Map", "title": "a"}), Some(&json!({"x": 1})), Some(&folder))
            .await
            .unwrap();

        assert_eq!(id.len(), 32);
        assert_eq!(portal.item(&id).unwrap()["ownerFolder"], folder);

        portal.update_item(&id, &json!({"title": "b"}), None).await.unwrap();
        assert_eq!(portal.item(&id).unwrap()["title"], "b");
        assert_eq!(portal.data(&id), Some(json!({"x": 1})));

        portal.delete_item(&id).await.unwrap();
        assert!(portal.item(&id).is_none());
        assert_eq!(portal.deleted(), vec![id]);
    }

    #[tokio::test]
    async fn test_query_features_equality_filter() {
        let portal = MemoryPortal::new("https://dest.example.com");
        let layer = "https://s/Dispatchers/FeatureServer/0";
        portal
            .add_features(layer, &[
                json!({"attributes": {"userId": "ann"}}),
                json!({"attributes": {"userId": "bob"}}),
            ])
            .await
            .unwrap();
        assert_eq!(portal.query_features(layer, "userId = 'bob'").await.unwrap().len(), 1);
        assert_eq!(portal.query_features(layer, "1=1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_type() {
        let portal = MemoryPortal::new("https://dest.example.com");
        portal.fail_add_for_type("Dashboard");
        assert!(portal.add_item(&json!({"type": "Dashboard"}), None, None).await.is_err());
    }
}
