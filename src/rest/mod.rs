// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! The portal REST API seam
//!
//! Everything the creator and deployer need from a portal goes through
//! [`PortalApi`]. [`RestPortal`] talks to a live portal; [`MemoryPortal`]
//! keeps items in memory for dry runs and tests.

mod client;
mod memory;

pub use client::RestPortal;
pub use memory::MemoryPortal;

use crate::error::Result;
use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, warn};

static SERVICE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://[^\s]+/(Feature|Map|Image|Scene|VectorTile|Stream)Server(/\d+)?/?$")
        .expect("service url pattern")
});

/// Operations the templating pipeline performs against a portal
#[async_trait]
pub trait PortalApi: Send + Sync {
    /// Root URL of the portal, e.g. `https://myorg.maps.arcgis.com`
    fn portal_url(&self) -> &str;

    /// Item properties
    async fn get_item(&self, item_id: &str) -> Result<Value>;

    /// Item data; `None` when the item has none
    async fn get_item_data(&self, item_id: &str) -> Result<Option<Value>>;

    /// Names of the item's resources
    async fn get_item_resources(&self, item_id: &str) -> Result<Vec<String>>;

    /// A text resource of the item
    async fn get_item_resource_text(&self, item_id: &str, name: &str) -> Result<String>;

    /// Forward related item ids for a relationship type
    async fn get_related_items(&self, item_id: &str, relationship_type: &str) -> Result<Vec<String>>;

    /// JSON description at a service or layer URL
    async fn get_json(&self, url: &str) -> Result<Value>;

    /// `portals/self`: organization and signed-in user
    async fn portal_self(&self) -> Result<Value>;

    /// Create a folder for the signed-in user, returning its id
    async fn create_folder(&self, title: &str) -> Result<String>;

    /// Delete a folder of the signed-in user
    async fn delete_folder(&self, folder_id: &str) -> Result<()>;

    /// Create an item, returning its id
    async fn add_item(&self, item: &Value, data: Option<&Value>, folder_id: Option<&str>) -> Result<String>;

    /// Update item properties and, optionally, its data
    async fn update_item(&self, item_id: &str, item: &Value, data: Option<&Value>) -> Result<()>;

    /// Delete an item
    async fn delete_item(&self, item_id: &str) -> Result<()>;

    /// Relate two items
    async fn add_relationship(&self, origin_id: &str, destination_id: &str, relationship_type: &str) -> Result<()>;

    /// Create or replace a text resource
    async fn update_item_resource_text(&self, item_id: &str, name: &str, text: &str) -> Result<()>;

    /// Query a feature layer, returning its features
    async fn query_features(&self, layer_url: &str, where_clause: &str) -> Result<Vec<Value>>;

    /// Add features to a feature layer
    async fn add_features(&self, layer_url: &str, features: &[Value]) -> Result<()>;
}

/// Is this the URL of an ArcGIS service or one of its layers?
#[must_use]
pub fn is_service_url(url: &str) -> bool {
    SERVICE_URL_RE.is_match(url.trim())
}

/// Strip a trailing layer index: `.../FeatureServer/3` becomes `.../FeatureServer`
#[must_use]
pub fn layer_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((base, last)) if !last.is_empty() && last.chars().all(|c| c.is_ascii_digit()) => {
            base.to_string()
        }
        _ => trimmed.to_string(),
    }
}

/// Trailing layer index of a layer URL
#[must_use]
pub fn layer_id(url: &str) -> Option<u32> {
    url.trim()
        .trim_end_matches('/')
        .rsplit_once('/')
        .and_then(|(_, last)| last.parse().ok())
}

/// Base URL of the portal that hosts `url` (`https://host/path-prefix`)
#[must_use]
pub fn portal_base_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let mut base = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        base.push_str(&format!(":{port}"));
    }
    // Enterprise portals live under a web adaptor, e.g. /portal
    if let Some(first) = parsed.path_segments().and_then(|mut s| s.next()) {
        if !first.is_empty() && !matches!(first, "home" | "apps" | "sharing") {
            base.push('/');
            base.push_str(first);
        }
    }
    Some(base)
}

/// Resolve service URLs to the id of the item that owns each service.
///
/// Lookups run concurrently; a URL that cannot be resolved is logged and
/// left out of the result.
pub async fn resolve_service_item_ids(portal: &dyn PortalApi, urls: &[String]) -> HashMap<String, String> {
    let mut bases: Vec<String> = urls.iter().map(|u| layer_base_url(u)).collect();
    bases.sort();
    bases.dedup();

    let lookups = bases.into_iter().map(|base| async move {
        let result = portal.get_json(&base).await;
        (base, result)
    });

    let mut resolved = HashMap::new();
    for (base, result) in join_all(lookups).await {
        match result {
            Ok(json) => match json.get("serviceItemId").and_then(Value::as_str) {
                Some(id) => {
                    debug!("Service {} belongs to item {}", base, id);
                    resolved.insert(base, id.to_string());
                }
                None => debug!("Service {} has no owning item", base),
            },
            Err(e) => warn!("Could not describe service {}: {}", base, e),
        }
    }
    resolved
}
