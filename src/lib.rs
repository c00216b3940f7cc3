// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Solution templates for ArcGIS portals
//!
//! This crate converts portal content items (dashboards, web maps, web
//! mapping applications, notebooks, QuickCapture and Workforce projects)
//! into portable templates whose ids, URLs and field names are replaced by
//! `{{token}}` placeholders, and deploys such templates into another
//! organization by resolving the placeholders against a template dictionary.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod commands;
pub mod config;
pub mod converters;
pub mod creator;
pub mod deployer;
pub mod error;
pub mod fields;
pub mod graph;
pub mod props;
pub mod rest;
pub mod templatize;

/// Core data types shared by the creator and the deployer
pub mod types {
    use crate::templatize::{field_token, fields_base_path, item_id_token, layer_token};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use serde_json::{Map, Value};
    use sha2::{Digest, Sha256};

    // =========================================================================
    // Item Types
    // =========================================================================

    /// Portal item types with dedicated handling
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub enum ItemType {
        /// Operations dashboard
        Dashboard,
        /// Web map
        WebMap,
        /// Configurable app, Web AppBuilder app or other hosted web app
        WebMappingApplication,
        /// ArcGIS Notebook
        Notebook,
        /// QuickCapture project
        QuickCaptureProject,
        /// Workforce project
        WorkforceProject,
        /// Hosted feature service
        FeatureService,
        /// Code bundle attached to a Web AppBuilder app
        CodeAttachment,
        /// Any other type, carried through unchanged
        Other(String),
    }

    impl ItemType {
        /// Parse the portal's `type` string
        #[must_use]
        pub fn from_type_name(name: &str) -> Self {
            match name {
                "Dashboard" => Self::Dashboard,
                "Web Map" => Self::WebMap,
                "Web Mapping Application" => Self::WebMappingApplication,
                "Notebook" => Self::Notebook,
                "QuickCapture Project" => Self::QuickCaptureProject,
                "Workforce Project" => Self::WorkforceProject,
                "Feature Service" => Self::FeatureService,
                "Code Attachment" => Self::CodeAttachment,
                other => Self::Other(other.to_string()),
            }
        }

        /// The portal's `type` string
        #[must_use]
        pub fn type_name(&self) -> &str {
            match self {
                Self::Dashboard => "Dashboard",
                Self::WebMap => "Web Map",
                Self::WebMappingApplication => "Web Mapping Application",
                Self::Notebook => "Notebook",
                Self::QuickCaptureProject => "QuickCapture Project",
                Self::WorkforceProject => "Workforce Project",
                Self::FeatureService => "Feature Service",
                Self::CodeAttachment => "Code Attachment",
                Self::Other(name) => name,
            }
        }
    }

    // =========================================================================
    // Item Template
    // =========================================================================

    /// Item relationships captured from the source portal
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RelatedItems {
        /// Relationship type, e.g. `Map2Service`
        pub relationship_type: String,
        /// Forward related item ids
        pub related_item_ids: Vec<String>,
    }

    /// Item properties carried into a template
    pub const TEMPLATE_ITEM_PROPERTIES: &[&str] = &[
        "accessInformation",
        "categories",
        "culture",
        "description",
        "extent",
        "licenseInfo",
        "name",
        "properties",
        "snippet",
        "spatialReference",
        "tags",
        "thumbnail",
        "title",
        "type",
        "typeKeywords",
        "url",
    ];

    /// A placeholder-ized item plus what it depends on
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ItemTemplate {
        /// Id of the source item
        pub item_id: String,
        /// Portal item type
        #[serde(rename = "type")]
        pub item_type: String,
        /// Short stable key derived from the source id
        pub key: String,
        /// Templatized item properties
        pub item: Value,
        /// Templatized item data
        #[serde(default)]
        pub data: Value,
        /// Names of the item's resources
        #[serde(default)]
        pub resources: Vec<String>,
        /// Converter-specific details
        #[serde(default)]
        pub properties: Value,
        /// Source ids of items this one needs deployed first
        #[serde(default)]
        pub dependencies: Vec<String>,
        /// Relationships to recreate after deployment
        #[serde(default)]
        pub related_items: Vec<RelatedItems>,
        /// Groups the item was shared with
        #[serde(default)]
        pub groups: Vec<String>,
        /// Relative deployment effort, used for progress reporting
        #[serde(default = "default_cost_factor")]
        pub estimated_deployment_cost_factor: u32,
    }

    fn default_cost_factor() -> u32 {
        2
    }

    impl ItemTemplate {
        /// Generate the deterministic key for a source item id
        #[must_use]
        pub fn generate_key(item_id: &str) -> String {
            let mut hasher = Sha256::new();
            hasher.update(item_id.as_bytes());
            let hash = hex::encode(hasher.finalize());
            format!("i{}", &hash[..8])
        }

        /// Start a template from the source item's JSON.
        ///
        /// Only [`TEMPLATE_ITEM_PROPERTIES`] are kept; `item.id` becomes the
        /// item's own id token.
        #[must_use]
        pub fn initialize(item: &Value) -> Self {
            let item_id = item.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
            let item_type = item.get("type").and_then(Value::as_str).unwrap_or_default().to_string();

            let mut kept = Map::new();
            kept.insert("id".into(), Value::String(item_id_token(&item_id)));
            for prop in TEMPLATE_ITEM_PROPERTIES {
                if let Some(value) = item.get(*prop) {
                    if !value.is_null() {
                        kept.insert((*prop).to_string(), value.clone());
                    }
                }
            }

            Self {
                key: Self::generate_key(&item_id),
                item_id,
                item_type,
                item: Value::Object(kept),
                data: Value::Null,
                resources: Vec::new(),
                properties: Value::Object(Map::new()),
                dependencies: Vec::new(),
                related_items: Vec::new(),
                groups: Vec::new(),
                estimated_deployment_cost_factor: default_cost_factor(),
            }
        }

        /// Parsed item type
        #[must_use]
        pub fn kind(&self) -> ItemType {
            ItemType::from_type_name(&self.item_type)
        }

        /// Record a dependency once; the item itself is never its own dependency
        pub fn add_dependency(&mut self, id: &str) {
            if !id.is_empty() && id != self.item_id && !self.dependencies.iter().any(|d| d == id) {
                self.dependencies.push(id.to_string());
            }
        }
    }

    // =========================================================================
    // Solution
    // =========================================================================

    /// Descriptive data about a solution
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct SolutionMetadata {
        /// Solution title
        pub title: String,
        /// Portal the templates were taken from
        pub source_portal: Option<String>,
        /// Items the solution was requested for
        pub source_item_ids: Vec<String>,
        /// When the templates were created
        pub created: Option<DateTime<Utc>>,
        /// Template schema version
        pub template_version: Option<String>,
    }

    /// Current template schema version
    pub const TEMPLATE_VERSION: &str = "1";

    /// A set of item templates deployable together
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Solution {
        /// Descriptive data
        #[serde(default)]
        pub metadata: SolutionMetadata,
        /// Item templates
        #[serde(default)]
        pub templates: Vec<ItemTemplate>,
    }

    impl Solution {
        /// Find a template by source id
        #[must_use]
        pub fn template_by_id(&self, item_id: &str) -> Option<&ItemTemplate> {
            self.templates.iter().find(|t| t.item_id == item_id)
        }

        /// Index of a template by source id
        #[must_use]
        pub fn template_index(&self, item_id: &str) -> Option<usize> {
            self.templates.iter().position(|t| t.item_id == item_id)
        }

        /// Is there a template for this source id?
        #[must_use]
        pub fn has_template(&self, item_id: &str) -> bool {
            self.template_index(item_id).is_some()
        }

        /// Remove a template by source id
        pub fn remove_template(&mut self, item_id: &str) -> Option<ItemTemplate> {
            self.template_index(item_id).map(|i| self.templates.remove(i))
        }

        /// Replace the template with the same source id, or append it
        pub fn replace_template(&mut self, template: ItemTemplate) {
            match self.template_index(&template.item_id) {
                Some(i) => self.templates[i] = template,
                None => self.templates.push(template),
            }
        }

        /// Source ids of all templates
        #[must_use]
        pub fn item_ids(&self) -> Vec<&str> {
            self.templates.iter().map(|t| t.item_id.as_str()).collect()
        }
    }

    // =========================================================================
    // Datasources
    // =========================================================================

    /// A feature layer that field references may point at
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DatasourceInfo {
        /// Source id of the owning service item
        pub item_id: String,
        /// Layer index within the service
        pub layer_id: u32,
        /// Source layer URL
        pub url: String,
        /// Field names of the layer
        pub fields: Vec<String>,
        /// Dictionary path of the layer's fields
        pub base_path: String,
    }

    impl DatasourceInfo {
        /// Describe a layer of a service item
        #[must_use]
        pub fn new(item_id: &str, layer_id: u32, url: &str, fields: Vec<String>) -> Self {
            Self {
                item_id: item_id.to_string(),
                layer_id,
                url: url.to_string(),
                fields,
                base_path: fields_base_path(item_id, layer_id),
            }
        }

        /// Token standing for this layer's URL
        #[must_use]
        pub fn url_token(&self) -> String {
            layer_token(&self.item_id, self.layer_id, "url")
        }

        /// Token standing for this layer's owning item
        #[must_use]
        pub fn item_id_token(&self) -> String {
            layer_token(&self.item_id, self.layer_id, "itemId")
        }

        /// The layer's spelling of `name`, compared case-insensitively
        #[must_use]
        pub fn field_named(&self, name: &str) -> Option<&str> {
            self.fields
                .iter()
                .find(|f| f.eq_ignore_ascii_case(name))
                .map(String::as_str)
        }

        /// Token for a field of this layer
        #[must_use]
        pub fn field_token(&self, name: &str) -> String {
            field_token(&self.base_path, name)
        }

        /// Does a (possibly templatized) reference point at this layer?
        #[must_use]
        pub fn matches_reference(&self, reference: &str) -> bool {
            reference == self.url
                || reference == self.url_token()
                || reference == self.item_id_token()
        }

        /// Order datasources so the most specific candidates are tried first:
        /// longer URLs, then more fields.
        pub fn sort_by_specificity(infos: &mut [DatasourceInfo]) {
            infos.sort_by(|a, b| {
                b.url
                    .len()
                    .cmp(&a.url.len())
                    .then_with(|| b.fields.len().cmp(&a.fields.len()))
                    .then_with(|| a.item_id.cmp(&b.item_id))
                    .then_with(|| a.layer_id.cmp(&b.layer_id))
            });
        }
    }

    // =========================================================================
    // Deployment Progress
    // =========================================================================

    /// Per-item deployment status
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum ItemProgressStatus {
        /// Work on the item began
        Started,
        /// The destination item exists; fine tuning may follow
        Created,
        /// Already present in the destination, nothing created
        Ignored,
        /// Creation or fine tuning failed
        Failed,
        /// Done
        Finished,
        /// Removed again by rollback
        Cancelled,
    }

    /// Progress notification passed to the deploy callback
    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProgressEvent {
        /// Source item id
        pub item_id: String,
        /// Item type
        pub item_type: String,
        /// New status
        pub status: ItemProgressStatus,
        /// Overall completion, 0-100
        pub percent_done: u8,
    }

    /// Deploy progress callback
    pub type ProgressCallback<'a> = &'a (dyn Fn(&ProgressEvent) + Send + Sync);

    /// An item created in the destination portal
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CreatedItem {
        /// Source item id
        pub source_id: String,
        /// New item id
        pub item_id: String,
        /// Item type
        pub item_type: String,
        /// Whether the deploy created it (false when an existing item was reused)
        pub created: bool,
        /// Supporting items created alongside it, e.g. a code attachment
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub extra_item_ids: Vec<String>,
    }
}

/// Prelude for common imports
pub mod prelude {
    pub use crate::error::{Result, SolutionError};
    pub use crate::rest::{MemoryPortal, PortalApi, RestPortal};
    pub use crate::templatize::TemplateDictionary;
    pub use crate::types::*;
}

#[cfg(test)]
mod tests {
    use super::types::*;
    use serde_json::json;

    #[test]
    fn test_template_key_determinism() {
        let a = ItemTemplate::generate_key("6fc5992522d34a6b5ce80d17835eea21");
        let b = ItemTemplate::generate_key("6fc5992522d34a6b5ce80d17835eea21");
        let c = ItemTemplate::generate_key("0123456789abcdef0123456789abcdef");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with('i'));
        assert_eq!(a.len(), 9);
    }

    #[test]
    fn test_initialize_keeps_selected_properties() {
        let item = json!({
            "id": "abc",
            "type": "Web Map",
            "title": "Roads",
            "owner": "someone",
            "numViews": 9,
            "tags": ["a"],
            "url": null
        });
        let t = ItemTemplate::initialize(&item);
        assert_eq!(t.item_id, "abc");
        assert_eq!(t.item["id"], "{{abc.itemId}}");
        assert_eq!(t.item["title"], "Roads");
        assert!(t.item.get("owner").is_none());
        assert!(t.item.get("numViews").is_none());
        assert!(t.item.get("url").is_none());
        assert_eq!(t.kind(), ItemType::WebMap);
    }

    #[test]
    fn test_add_dependency_dedupes_and_skips_self() {
        let mut t = ItemTemplate::initialize(&json!({"id": "me", "type": "Dashboard"}));
        t.add_dependency("x");
        t.add_dependency("x");
        t.add_dependency("me");
        t.add_dependency("");
        assert_eq!(t.dependencies, vec!["x".to_string()]);
    }

    #[test]
    fn test_solution_template_helpers() {
        let mut s = Solution::default();
        s.replace_template(ItemTemplate::initialize(&json!({"id": "a", "type": "Notebook"})));
        s.replace_template(ItemTemplate::initialize(&json!({"id": "b", "type": "Notebook"})));
        let mut updated = ItemTemplate::initialize(&json!({"id": "a", "type": "Notebook"}));
        updated.add_dependency("b");
        s.replace_template(updated);

        assert_eq!(s.item_ids(), vec!["a", "b"]);
        assert_eq!(s.template_by_id("a").map(|t| t.dependencies.len()), Some(1));
        assert!(s.remove_template("b").is_some());
        assert!(!s.has_template("b"));
    }

    #[test]
    fn test_datasource_specificity() {
        let mut infos = vec![
            DatasourceInfo::new("svc", 0, "https://h/FeatureServer/0", vec!["A".into()]),
            DatasourceInfo::new("svc", 12, "https://h/FeatureServer/12", vec!["A".into()]),
            DatasourceInfo::new("other", 0, "https://h/FeatureServer/0", vec!["A".into(), "B".into()]),
        ];
        DatasourceInfo::sort_by_specificity(&mut infos);
        assert_eq!(infos[0].layer_id, 12);
        assert_eq!(infos[1].item_id, "other");
        assert_eq!(infos[2].item_id, "svc");
    }

    #[test]
    fn test_template_json_shape() {
        let t = ItemTemplate::initialize(&json!({"id": "a", "type": "Notebook"}));
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["itemId"], "a");
        assert_eq!(v["type"], "Notebook");
        assert_eq!(v["estimatedDeploymentCostFactor"], 2);
        let back: ItemTemplate = serde_json::from_value(v).unwrap();
        assert_eq!(back, t);
    }
}
