// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Per item type conversion
//!
//! Each converter knows the JSON shape of one item type: which paths hold
//! item ids and service URLs, how they become tokens, and what has to
//! happen in the destination after the item is created.

mod dashboard;
mod feature_service;
mod generic;
mod notebook;
mod quickcapture;
mod webapp;
mod webmap;
mod workforce;

pub use dashboard::DashboardConverter;
pub use feature_service::FeatureServiceConverter;
pub use generic::GenericConverter;
pub use notebook::NotebookConverter;
pub use quickcapture::{QuickCaptureConverter, QC_PROJECT_RESOURCE};
pub use webapp::WebAppConverter;
pub use webmap::WebMapConverter;
pub use workforce::WorkforceConverter;

use crate::error::Result;
use crate::props::get_prop_mut;
use crate::rest::{layer_base_url, layer_id, PortalApi};
use crate::templatize::{
    is_token, item_id_token, layer_token, map_strings, templatize_item_ids, token, url_token, TemplateDictionary,
};
use crate::types::{ItemTemplate, ItemType};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Outcome of creating a destination item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployed {
    /// Destination item id
    pub item_id: String,
    /// False when an existing item was reused
    pub created: bool,
}

/// Type-specific templatizing and deployment
#[async_trait]
pub trait ItemConverter: Send + Sync {
    /// Replace ids and URLs in `template` with tokens and record dependencies
    async fn convert_to_template(&self, template: &mut ItemTemplate, portal: &dyn PortalApi) -> Result<()>;

    /// Whether the item's data is posted with the item
    fn carries_data(&self) -> bool {
        true
    }

    /// Create the destination item from a detemplatized template
    async fn create_item(
        &self,
        template: &ItemTemplate,
        folder_id: Option<&str>,
        portal: &dyn PortalApi,
    ) -> Result<Deployed> {
        let data = (self.carries_data() && !template.data.is_null()).then_some(&template.data);
        let item_id = portal.add_item(&template.item, data, folder_id).await?;
        Ok(Deployed { item_id, created: true })
    }

    /// Record the destination item in the dictionary
    fn register(&self, template: &ItemTemplate, deployed: &Deployed, dictionary: &mut TemplateDictionary) {
        dictionary.insert_item(&template.item_id, &deployed.item_id);
    }

    /// Work left once the item exists and every token is resolved.
    ///
    /// Returns ids of any extra items created along the way.
    async fn fine_tune(
        &self,
        _template: &ItemTemplate,
        _deployed: &Deployed,
        _dictionary: &TemplateDictionary,
        _portal: &dyn PortalApi,
    ) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// The converter responsible for an item type
#[must_use]
pub fn converter_for(kind: &ItemType) -> &'static dyn ItemConverter {
    match kind {
        ItemType::Dashboard => &DashboardConverter,
        ItemType::WebMap => &WebMapConverter,
        ItemType::WebMappingApplication => &WebAppConverter,
        ItemType::Notebook => &NotebookConverter,
        ItemType::QuickCaptureProject => &QuickCaptureConverter,
        ItemType::WorkforceProject => &WorkforceConverter,
        ItemType::FeatureService => &FeatureServiceConverter,
        ItemType::CodeAttachment | ItemType::Other(_) => &GenericConverter,
    }
}

/// Is `s` a bare item id (32 hex digits)?
#[must_use]
pub fn is_item_id(s: &str) -> bool {
    s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Replace the item id at `path` with its token and record the dependency.
///
/// Returns the id found, if any.
pub fn templatize_item_id_at(template: &mut ItemTemplate, source: Source, path: &str) -> Option<String> {
    let value = match source {
        Source::Item => get_prop_mut(&mut template.item, path)?,
        Source::Data => get_prop_mut(&mut template.data, path)?,
    };
    let Value::String(id) = value else {
        return None;
    };
    if id.is_empty() || is_token(id) {
        return None;
    }
    let found = id.clone();
    *id = item_id_token(&found);
    template.add_dependency(&found);
    Some(found)
}

/// Replace bare occurrences of `item_id` in every string of `value`,
/// leaving existing tokens alone. Returns the number of strings changed.
pub fn templatize_id_everywhere(value: &mut Value, item_id: &str) -> usize {
    let mut changed = 0;
    map_strings(value, &mut |s| {
        if !s.contains(item_id) {
            return None;
        }
        let replaced = templatize_item_ids(s, |found| found == item_id);
        (replaced != s).then(|| {
            changed += 1;
            replaced
        })
    });
    changed
}

/// Which part of a template a path addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Item properties
    Item,
    /// Item data
    Data,
}

/// Token for a service or layer URL owned by `service_item_id`
#[must_use]
pub fn service_url_token(url: &str, service_item_id: &str) -> String {
    match layer_id(url) {
        Some(n) => layer_token(service_item_id, n, "url"),
        None => url_token(service_item_id),
    }
}

/// Token for a layer URL found among resolved services, plus the owning id
#[must_use]
pub fn resolve_url_token(url: &str, services: &HashMap<String, String>) -> Option<(String, String)> {
    let id = services.get(&layer_base_url(url))?;
    Some((service_url_token(url, id), id.clone()))
}

/// `{{<id>.itemId||<id>}}`: resolves to a mapped destination id, otherwise
/// keeps the source id. Used for groups, which are never deployed.
#[must_use]
pub fn group_token(group_id: &str) -> String {
    token(&format!("{group_id}.itemId||{group_id}"))
}
