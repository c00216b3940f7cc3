// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Field-reference templatizing
//!
//! Once every template of a solution exists, field names that web maps,
//! dashboards and apps use against a known feature layer are replaced with
//! `{{<id>.layer<N>.fields.<name>.name}}` tokens. References are found by
//! regex in expressions and by property name in JSON.

use crate::props::{array_at_mut, get_prop_mut};
use crate::templatize::{token, TemplateDictionary};
use crate::types::{DatasourceInfo, ItemTemplate, ItemType};
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::debug;

/// Property names whose value is a single field name
pub const FIELD_KEYS: &[&str] = &[
    "field",
    "field1",
    "field2",
    "field3",
    "fieldName",
    "normalizationField",
    "normalizeField",
    "tooltipField",
    "valueField",
    "labelField",
    "categoryField",
    "dateField",
    "sortField",
    "onStatisticField",
    "displayField",
    "objectIdField",
];

/// Property names that point an object at a layer
const REFERENCE_KEYS: &[&str] = &["url", "layerUrl", "featureLayerUrl", "itemId"];

const EXISTING_TOKEN: &str = r"(\{\{[^{}]*\}\})";

/// Rewrites field references for one datasource
pub struct FieldTemplatizer<'a> {
    info: &'a DatasourceInfo,
    sql: Regex,
    arcade: Regex,
    text: Regex,
    label: Regex,
}

impl<'a> FieldTemplatizer<'a> {
    /// Build the matchers; `None` when the layer has no fields
    #[must_use]
    pub fn new(info: &'a DatasourceInfo) -> Option<Self> {
        if info.fields.is_empty() {
            return None;
        }
        let mut names: Vec<&str> = info.fields.iter().map(String::as_str).collect();
        // Longest first so `POP2010_M` wins over `POP2010`
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));
        let alt = names
            .iter()
            .map(|n| regex::escape(n))
            .collect::<Vec<_>>()
            .join("|");

        let build = |pattern: String| Regex::new(&pattern).ok();
        Some(Self {
            info,
            sql: build(format!(r"(?i){EXISTING_TOKEN}|('(?:[^']|'')*')|\b({alt})\b"))?,
            arcade: build(format!(
                r#"(?i){EXISTING_TOKEN}|(\$feature\s*\.\s*)({alt})\b|(\$feature\s*\[\s*["'])({alt})(["']\s*\])"#
            ))?,
            text: build(format!(r"(?i){EXISTING_TOKEN}|\{{({alt})\}}"))?,
            label: build(format!(r"(?i){EXISTING_TOKEN}|\[({alt})\]"))?,
        })
    }

    /// Datasource this templatizer serves
    #[must_use]
    pub fn info(&self) -> &DatasourceInfo {
        self.info
    }

    fn token_for(&self, name: &str) -> String {
        self.info.field_token(name)
    }

    /// A property holding exactly one field name
    #[must_use]
    pub fn field(&self, name: &str) -> Option<String> {
        self.info.field_named(name).map(|f| self.token_for(f))
    }

    /// Comma separated field list, e.g. `outFields`
    #[must_use]
    pub fn field_list(&self, list: &str) -> String {
        list.split(',')
            .map(|part| {
                let trimmed = part.trim();
                self.field(trimmed).unwrap_or_else(|| trimmed.to_string())
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// SQL where clauses; quoted literals are left alone
    #[must_use]
    pub fn sql(&self, expression: &str) -> String {
        self.sql
            .replace_all(expression, |caps: &Captures| match caps.get(3) {
                Some(name) => self.token_for(name.as_str()),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Arcade: `$feature.NAME` and `$feature["NAME"]`
    #[must_use]
    pub fn arcade(&self, expression: &str) -> String {
        self.arcade
            .replace_all(expression, |caps: &Captures| {
                if let (Some(prefix), Some(name)) = (caps.get(2), caps.get(3)) {
                    format!("{}{}", prefix.as_str(), self.token_for(name.as_str()))
                } else if let (Some(open), Some(name), Some(close)) = (caps.get(4), caps.get(5), caps.get(6)) {
                    format!("{}{}{}", open.as_str(), self.token_for(name.as_str()), close.as_str())
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    /// Popup and label text: `{NAME}`
    #[must_use]
    pub fn text(&self, text: &str) -> String {
        self.text
            .replace_all(text, |caps: &Captures| match caps.get(2) {
                Some(name) => format!("{{{}}}", self.token_for(name.as_str())),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Label expressions: `[NAME]`
    #[must_use]
    pub fn label(&self, expression: &str) -> String {
        self.label
            .replace_all(expression, |caps: &Captures| match caps.get(2) {
                Some(name) => format!("[{}]", self.token_for(name.as_str())),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

fn rewrite(value: &mut Value, path: &str, f: impl Fn(&str) -> String) {
    if let Some(Value::String(s)) = get_prop_mut(value, path) {
        let replaced = f(s);
        if replaced != *s {
            *s = replaced;
        }
    }
}

fn rewrite_field(value: &mut Value, path: &str, t: &FieldTemplatizer<'_>) {
    if let Some(Value::String(s)) = get_prop_mut(value, path) {
        if let Some(replaced) = t.field(s) {
            *s = replaced;
        }
    }
}

fn rewrite_field_array(value: &mut Value, path: &str, t: &FieldTemplatizer<'_>) {
    for entry in array_at_mut(value, path) {
        if let Value::String(s) = entry {
            if let Some(replaced) = t.field(s) {
                *s = replaced;
            }
        }
    }
}

/// Rewrite every [`FIELD_KEYS`] property anywhere below `value`
pub fn templatize_field_keys(value: &mut Value, t: &FieldTemplatizer<'_>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                match child {
                    Value::String(s) if FIELD_KEYS.contains(&key.as_str()) => {
                        if let Some(replaced) = t.field(s) {
                            *s = replaced;
                        }
                    }
                    Value::String(s) if key == "where" || key == "definitionExpression" => {
                        *s = t.sql(s);
                    }
                    Value::String(s) if key == "expression" || key == "valueExpression" => {
                        *s = t.arcade(s);
                    }
                    Value::Array(items) if key == "fields" || key == "outFields" => {
                        for item in items.iter_mut() {
                            match item {
                                Value::String(s) => {
                                    if let Some(replaced) = t.field(s) {
                                        *s = replaced;
                                    }
                                }
                                other => templatize_field_keys(other, t),
                            }
                        }
                    }
                    other => templatize_field_keys(other, t),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| templatize_field_keys(v, t)),
        _ => {}
    }
}

/// Field references of a web map operational layer or table
pub fn templatize_layer(layer: &mut Value, t: &FieldTemplatizer<'_>) {
    rewrite(layer, "layerDefinition.definitionExpression", |s| t.sql(s));

    if let Some(renderer) = get_prop_mut(layer, "layerDefinition.drawingInfo.renderer") {
        for key in ["field", "field1", "field2", "field3", "normalizationField"] {
            rewrite_field(renderer, key, t);
        }
        rewrite(renderer, "valueExpression", |s| t.arcade(s));
        rewrite(renderer, "rotationExpression", |s| t.label(s));
        for variable in array_at_mut(renderer, "visualVariables") {
            rewrite_field(variable, "field", t);
            rewrite_field(variable, "normalizationField", t);
            rewrite(variable, "valueExpression", |s| t.arcade(s));
        }
    }

    for label in array_at_mut(layer, "layerDefinition.drawingInfo.labelingInfo") {
        rewrite(label, "labelExpression", |s| t.label(s));
        rewrite(label, "labelExpressionInfo.expression", |s| t.arcade(s));
        rewrite(label, "labelExpressionInfo.value", |s| t.text(s));
        rewrite(label, "where", |s| t.sql(s));
    }

    for order in array_at_mut(layer, "layerDefinition.orderBy") {
        rewrite_field(order, "field", t);
    }

    if let Some(popup) = get_prop_mut(layer, "popupInfo") {
        templatize_popup(popup, t);
    }
}

fn templatize_popup(popup: &mut Value, t: &FieldTemplatizer<'_>) {
    rewrite(popup, "title", |s| t.text(s));
    rewrite(popup, "description", |s| t.text(s));
    for info in array_at_mut(popup, "fieldInfos") {
        rewrite_field(info, "fieldName", t);
    }
    for info in array_at_mut(popup, "expressionInfos") {
        rewrite(info, "expression", |s| t.arcade(s));
    }
    for media in array_at_mut(popup, "mediaInfos") {
        rewrite(media, "title", |s| t.text(s));
        rewrite(media, "caption", |s| t.text(s));
        rewrite_field_array(media, "value.fields", t);
        rewrite_field(media, "value.normalizeField", t);
        rewrite_field(media, "value.tooltipField", t);
        rewrite(media, "value.linkURL", |s| t.text(s));
        rewrite(media, "value.sourceURL", |s| t.text(s));
    }
    for element in array_at_mut(popup, "popupElements") {
        rewrite(element, "text", |s| t.text(s));
        for info in array_at_mut(element, "fieldInfos") {
            rewrite_field(info, "fieldName", t);
        }
    }
}

/// Field references of a dashboard dataset's query
pub fn templatize_dataset(dataset: &mut Value, t: &FieldTemplatizer<'_>) {
    match get_prop_mut(dataset, "query.outFields") {
        Some(Value::String(s)) => *s = t.field_list(s),
        Some(Value::Array(_)) => rewrite_field_array(dataset, "query.outFields", t),
        _ => {}
    }
    for order in array_at_mut(dataset, "query.orderByFields") {
        if let Value::String(s) = order {
            *s = t.sql(s);
        }
    }
    rewrite_field_array(dataset, "query.groupByFieldsForStatistics", t);
    for statistic in array_at_mut(dataset, "query.outStatistics") {
        rewrite_field(statistic, "onStatisticField", t);
    }
    rewrite(dataset, "query.where", |s| t.sql(s));
}

fn references(map: &Map<String, Value>, info: &DatasourceInfo) -> bool {
    REFERENCE_KEYS.iter().any(|key| {
        map.get(*key)
            .and_then(Value::as_str)
            .is_some_and(|r| info.matches_reference(r))
    })
}

/// Rewrite field keys inside every object that points at the datasource
pub fn templatize_referencing_objects(value: &mut Value, t: &FieldTemplatizer<'_>) {
    if value.as_object().is_some_and(|map| references(map, t.info())) {
        templatize_field_keys(value, t);
        return;
    }
    match value {
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| templatize_referencing_objects(v, t)),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| templatize_referencing_objects(v, t)),
        _ => {}
    }
}

fn web_map_layers(template: &mut ItemTemplate) -> impl Iterator<Item = &mut Value> {
    let data = &mut template.data;
    let Value::Object(map) = data else {
        return Vec::new().into_iter();
    };
    let mut layers: Vec<&mut Value> = Vec::new();
    for (key, value) in map.iter_mut() {
        if key == "operationalLayers" || key == "tables" {
            if let Value::Array(items) = value {
                layers.extend(items.iter_mut());
            }
        }
    }
    layers.into_iter()
}

/// Layer reference of a web map layer, including group layer children
fn templatize_web_map_layer(layer: &mut Value, infos: &[FieldTemplatizer<'_>]) {
    let reference = layer
        .get("url")
        .or_else(|| layer.get("itemId"))
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(reference) = reference {
        if let Some(t) = infos.iter().find(|t| t.info().matches_reference(&reference)) {
            templatize_layer(layer, t);
        }
    }
    for child in array_at_mut(layer, "layers") {
        templatize_web_map_layer(child, infos);
    }
}

fn dataset_reference(dataset: &Value) -> Option<String> {
    dataset
        .pointer("/dataSource/itemId")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn templatize_dashboard(template: &mut ItemTemplate, infos: &[FieldTemplatizer<'_>]) {
    for section in ["widgets", "headerPanel.selectors", "leftPanel.selectors", "urlParameters"] {
        for widget in array_at_mut(&mut template.data, section) {
            let mut matched: Vec<usize> = Vec::new();
            for dataset in array_at_mut(widget, "datasets") {
                let Some(reference) = dataset_reference(dataset) else {
                    continue;
                };
                if let Some(i) = infos.iter().position(|t| t.info().matches_reference(&reference)) {
                    templatize_dataset(dataset, &infos[i]);
                    if !matched.contains(&i) {
                        matched.push(i);
                    }
                }
            }
            // Widget level field keys follow the widget's own datasets
            if let [only] = matched.as_slice() {
                templatize_field_keys(widget, &infos[*only]);
            }
        }
    }
}

/// Replace field references in every template that uses one of `infos`.
///
/// Datasources are tried most specific first.
pub fn post_process_field_references(templates: &mut [ItemTemplate], infos: &[DatasourceInfo]) {
    let mut sorted = infos.to_vec();
    DatasourceInfo::sort_by_specificity(&mut sorted);
    let templatizers: Vec<FieldTemplatizer<'_>> = sorted.iter().filter_map(FieldTemplatizer::new).collect();
    if templatizers.is_empty() {
        return;
    }

    for template in templates.iter_mut() {
        match template.kind() {
            ItemType::WebMap => {
                debug!("Templatizing field references in web map {}", template.item_id);
                for layer in web_map_layers(template) {
                    templatize_web_map_layer(layer, &templatizers);
                }
            }
            ItemType::Dashboard => {
                debug!("Templatizing field references in dashboard {}", template.item_id);
                templatize_dashboard(template, &templatizers);
            }
            ItemType::WebMappingApplication => {
                debug!("Templatizing field references in app {}", template.item_id);
                for t in &templatizers {
                    templatize_referencing_objects(&mut template.data, t);
                }
            }
            _ => {}
        }
    }
}

/// Datasources described by feature service templates
#[must_use]
pub fn datasource_infos(templates: &[ItemTemplate]) -> Vec<DatasourceInfo> {
    let mut infos = Vec::new();
    for template in templates.iter().filter(|t| t.kind() == ItemType::FeatureService) {
        let Some(service_url) = template.properties.get("serviceUrl").and_then(Value::as_str) else {
            continue;
        };
        for key in ["layers", "tables"] {
            let Some(layers) = template.properties.get(key).and_then(Value::as_array) else {
                continue;
            };
            for layer in layers {
                let Some(layer_id) = layer.get("id").and_then(Value::as_u64) else {
                    continue;
                };
                let Ok(layer_id) = u32::try_from(layer_id) else {
                    continue;
                };
                let fields = layer
                    .get("fields")
                    .and_then(Value::as_array)
                    .map(|fields| {
                        fields
                            .iter()
                            .filter_map(|f| f.get("name").and_then(Value::as_str))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                infos.push(DatasourceInfo::new(
                    &template.item_id,
                    layer_id,
                    &format!("{}/{layer_id}", service_url.trim_end_matches('/')),
                    fields,
                ));
            }
        }
    }
    infos
}

/// Register field tokens for a layer whose fields are unchanged in the
/// destination
pub fn register_same_fields(dictionary: &mut TemplateDictionary, info: &DatasourceInfo) {
    for field in &info.fields {
        let path = format!("{}.{}.name", info.base_path, field.to_lowercase());
        dictionary.set(&path, Value::String(field.clone()));
    }
}

/// The field token text for a name, without needing a datasource
#[must_use]
pub fn field_reference(base_path: &str, name: &str) -> String {
    token(&format!("{base_path}.{}.name", name.to_lowercase()))
}
