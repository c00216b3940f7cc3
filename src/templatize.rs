// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Placeholder tokens and the template dictionary
//!
//! Templatizing replaces concrete values with `{{path}}` tokens; deploying
//! resolves each `path` against a [`TemplateDictionary`]. A token may carry a
//! fallback, `{{path||fallback}}`, used when the path is missing.

use crate::props::{get_prop, set_prop};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::LazyLock;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]+?)\}\}").expect("token pattern"));

// Existing tokens are matched first so ids already inside a token are kept.
static ITEM_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\{\{[^{}]*\}\})|\b([0-9a-fA-F]{32})\b").expect("item id pattern")
});

/// Portal base URL of the destination organization
pub const PORTAL_BASE_URL: &str = "{{portalBaseUrl}}";
/// Folder the deployment writes into
pub const FOLDER_ID: &str = "{{folderId}}";
/// Id of the deployed solution item
pub const SOLUTION_ITEM_ID: &str = "{{solutionItemId}}";
/// Deploying user's name
pub const USERNAME: &str = "{{user.username}}";
/// Geometry service of the destination organization
pub const GEOMETRY_SERVICE_URL: &str = "{{organization.helperServices.geometry.url}}";

/// Wrap a dictionary path into a token
#[must_use]
pub fn token(path: &str) -> String {
    format!("{{{{{path}}}}}")
}

/// Replace every occurrence of `replacement` in `context` with
/// `{{<replacement><suffix>}}`
#[must_use]
pub fn templatize_term(context: &str, replacement: &str, suffix: &str) -> String {
    if context.is_empty() || replacement.is_empty() {
        return context.to_string();
    }
    context.replace(replacement, &token(&format!("{replacement}{suffix}")))
}

/// `{{<id>.itemId}}`
#[must_use]
pub fn item_id_token(item_id: &str) -> String {
    token(&format!("{item_id}.itemId"))
}

/// `{{<id>.url}}`
#[must_use]
pub fn url_token(item_id: &str) -> String {
    token(&format!("{item_id}.url"))
}

/// `{{<id>.layer<N>.<prop>}}`
#[must_use]
pub fn layer_token(item_id: &str, layer_id: u32, prop: &str) -> String {
    token(&format!("{item_id}.layer{layer_id}.{prop}"))
}

/// Dictionary path under which a layer's fields live
#[must_use]
pub fn fields_base_path(item_id: &str, layer_id: u32) -> String {
    format!("{item_id}.layer{layer_id}.fields")
}

/// `{{<base_path>.<field lower-cased>.name}}`
#[must_use]
pub fn field_token(base_path: &str, field: &str) -> String {
    token(&format!("{base_path}.{}.name", field.to_lowercase()))
}

/// Is the whole string a single token?
#[must_use]
pub fn is_token(s: &str) -> bool {
    TOKEN_RE
        .find(s)
        .is_some_and(|m| m.start() == 0 && m.end() == s.len())
}

/// Tokens still present anywhere inside `value`
#[must_use]
pub fn unresolved_tokens(value: &Value) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    visit_strings(value, &mut |s| {
        for caps in TOKEN_RE.captures_iter(s) {
            found.insert(caps[0].to_string());
        }
    });
    found
}

/// Does `value` still contain any token?
#[must_use]
pub fn has_unresolved_variables(value: &Value) -> bool {
    let mut any = false;
    visit_strings(value, &mut |s| any = any || TOKEN_RE.is_match(s));
    any
}

fn visit_strings(value: &Value, f: &mut impl FnMut(&str)) {
    match value {
        Value::String(s) => f(s),
        Value::Array(items) => items.iter().for_each(|v| visit_strings(v, f)),
        Value::Object(map) => map.values().for_each(|v| visit_strings(v, f)),
        _ => {}
    }
}

/// Apply `f` to every string leaf of `value`
pub fn map_strings(value: &mut Value, f: &mut impl FnMut(&str) -> Option<String>) {
    match value {
        Value::String(s) => {
            if let Some(replaced) = f(s) {
                *s = replaced;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| map_strings(v, f)),
        Value::Object(map) => map.values_mut().for_each(|v| map_strings(v, f)),
        _ => {}
    }
}

/// Rewrite every string leaf with a regex replacement
pub fn global_string_replace(value: &mut Value, pattern: &Regex, replacement: &str) {
    map_strings(value, &mut |s| {
        pattern
            .is_match(s)
            .then(|| pattern.replace_all(s, replacement).into_owned())
    });
}

/// Rewrite every literal occurrence of `from` in string leaves.
///
/// Returns the number of strings changed.
pub fn replace_literal(value: &mut Value, from: &str, to: &str) -> usize {
    if from.is_empty() {
        return 0;
    }
    let mut changed = 0;
    map_strings(value, &mut |s| {
        s.contains(from).then(|| {
            changed += 1;
            s.replace(from, to)
        })
    });
    changed
}

/// Unique item ids (32 hex digits) found in `text`, in order of appearance.
/// Ids already inside a token are not reported.
#[must_use]
pub fn find_item_ids(text: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for caps in ITEM_ID_RE.captures_iter(text) {
        if let Some(id) = caps.get(2) {
            if !ids.iter().any(|i| i == id.as_str()) {
                ids.push(id.as_str().to_string());
            }
        }
    }
    ids
}

/// Replace bare item ids accepted by `keep` with `{{<id>.itemId}}`
#[must_use]
pub fn templatize_item_ids(text: &str, keep: impl Fn(&str) -> bool) -> String {
    ITEM_ID_RE
        .replace_all(text, |caps: &Captures| match caps.get(2) {
            Some(id) if keep(id.as_str()) => item_id_token(id.as_str()),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

/// Resolve every token in a cloned `value` against `dictionary`.
///
/// A string consisting of exactly one token takes the dictionary value
/// with its JSON type; tokens embedded in longer strings are interpolated
/// as text. Tokens without a dictionary entry or fallback stay in place.
#[must_use]
pub fn replace_in_template(value: &Value, dictionary: &TemplateDictionary) -> Value {
    match value {
        Value::String(s) => resolve_string(s, dictionary),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| replace_in_template(v, dictionary))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), replace_in_template(v, dictionary)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn lookup(expr: &str, dictionary: &TemplateDictionary) -> Option<Value> {
    let (path, fallback) = match expr.split_once("||") {
        Some((path, fallback)) => (path.trim(), Some(fallback.trim())),
        None => (expr.trim(), None),
    };
    match dictionary.get(path) {
        Some(v) if !v.is_null() => Some(v.clone()),
        _ => fallback.map(|f| Value::String(f.to_string())),
    }
}

fn resolve_string(s: &str, dictionary: &TemplateDictionary) -> Value {
    if !s.contains("{{") {
        return Value::String(s.to_string());
    }
    if is_token(s) {
        let expr = &s[2..s.len() - 2];
        return lookup(expr, dictionary).unwrap_or_else(|| Value::String(s.to_string()));
    }
    let text = TOKEN_RE.replace_all(s, |caps: &Captures| match lookup(&caps[1], dictionary) {
        Some(Value::String(v)) => v,
        Some(other) => other.to_string(),
        None => caps[0].to_string(),
    });
    Value::String(text.into_owned())
}

// =========================================================================
// Template Dictionary
// =========================================================================

/// Layer details registered for a deployed service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerEntry {
    /// Layer index within the service
    pub layer_id: u32,
    /// Full layer URL
    pub url: String,
    /// Field names as they exist in the destination
    pub fields: Vec<String>,
}

/// Flat key/value bag resolving tokens during deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateDictionary(Value);

impl Default for TemplateDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateDictionary {
    /// Empty dictionary
    #[must_use]
    pub fn new() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Build from a JSON object; anything else yields an empty dictionary
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        if value.is_object() {
            Self(value)
        } else {
            Self::new()
        }
    }

    /// The dictionary as JSON
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Look up a dotted path
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_prop(&self.0, path)
    }

    /// Look up a string at a dotted path
    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Set a dotted path, creating intermediate objects
    pub fn set(&mut self, path: &str, value: Value) {
        set_prop(&mut self.0, path, value);
    }

    /// Deep-merge another dictionary; `other` wins on conflicts
    pub fn merge(&mut self, other: &TemplateDictionary) {
        merge_values(&mut self.0, &other.0);
    }

    /// New id registered for a source item
    #[must_use]
    pub fn item_id(&self, source_id: &str) -> Option<&str> {
        self.get_str(&format!("{source_id}.itemId"))
    }

    /// Has the source item been mapped to a destination item?
    #[must_use]
    pub fn has_item(&self, source_id: &str) -> bool {
        self.item_id(source_id).is_some()
    }

    /// Register the destination id of a deployed item
    pub fn insert_item(&mut self, source_id: &str, new_id: &str) {
        self.set(&format!("{source_id}.itemId"), Value::String(new_id.to_string()));
    }

    /// Register a service with its layers and fields
    pub fn insert_service(&mut self, source_id: &str, new_id: &str, url: &str, layers: &[LayerEntry]) {
        self.insert_item(source_id, new_id);
        self.set(&format!("{source_id}.url"), Value::String(url.to_string()));
        for layer in layers {
            let mut fields = Map::new();
            for field in &layer.fields {
                fields.insert(
                    field.to_lowercase(),
                    serde_json::json!({ "name": field }),
                );
            }
            self.set(
                &format!("{source_id}.layer{}", layer.layer_id),
                serde_json::json!({
                    "itemId": new_id,
                    "layerId": layer.layer_id,
                    "url": layer.url,
                    "fields": fields,
                }),
            );
        }
    }
}

fn merge_values(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(t), Value::Object(s)) => {
            for (key, value) in s {
                let nested = value.is_object() && t.get(key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = t.get_mut(key) {
                        merge_values(existing, value);
                    }
                } else {
                    t.insert(key.clone(), value.clone());
                }
            }
        }
        (t, s) => *t = s.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ID: &str = "6fc5992522d34a6b5ce80d17835eea21";

    fn dictionary() -> TemplateDictionary {
        let mut d = TemplateDictionary::new();
        d.set("portalBaseUrl", json!("https://dest.maps.arcgis.com"));
        d.insert_service(
            ID,
            "0123456789abcdef0123456789abcdef",
            "https://services/FeatureServer",
            &[LayerEntry {
                layer_id: 0,
                url: "https://services/FeatureServer/0".into(),
                fields: vec!["POP2010".into()],
            }],
        );
        d.set("extent", json!([[-1, -1], [1, 1]]));
        d
    }

    #[test]
    fn test_templatize_term() {
        assert_eq!(templatize_term(ID, ID, ".itemId"), format!("{{{{{ID}.itemId}}}}"));
        assert_eq!(templatize_term("", ID, ".itemId"), "");
    }

    #[test]
    fn test_tokens() {
        assert_eq!(layer_token("abc", 2, "url"), "{{abc.layer2.url}}");
        assert_eq!(field_token("abc.layer0.fields", "POP2010"), "{{abc.layer0.fields.pop2010.name}}");
        assert!(is_token("{{abc.itemId}}"));
        assert!(!is_token("x{{abc.itemId}}"));
    }

    #[test]
    fn test_replace_whole_token_keeps_type() {
        let d = dictionary();
        let out = replace_in_template(&json!({"e": "{{extent}}"}), &d);
        assert_eq!(out, json!({"e": [[-1, -1], [1, 1]]}));
    }

    #[test]
    fn test_replace_embedded_and_fields() {
        let d = dictionary();
        let template = json!({
            "url": format!("{{{{portalBaseUrl}}}}/home/item.html?id={{{{{ID}.itemId}}}}"),
            "expr": format!("{{{{{ID}.layer0.fields.pop2010.name}}}} > 10"),
        });
        let out = replace_in_template(&template, &d);
        assert_eq!(
            out["url"],
            "https://dest.maps.arcgis.com/home/item.html?id=0123456789abcdef0123456789abcdef"
        );
        assert_eq!(out["expr"], "POP2010 > 10");
    }

    #[test]
    fn test_unresolved_tokens_stay() {
        let d = dictionary();
        let out = replace_in_template(&json!(["{{missing.itemId}}", "a {{nope}} b"]), &d);
        assert_eq!(out, json!(["{{missing.itemId}}", "a {{nope}} b"]));
        assert!(has_unresolved_variables(&out));
        assert_eq!(unresolved_tokens(&out).len(), 2);
    }

    #[test]
    fn test_fallback() {
        let d = TemplateDictionary::new();
        let out = replace_in_template(&json!("{{folderId||root}}"), &d);
        assert_eq!(out, json!("root"));
    }

    #[test]
    fn test_find_and_templatize_item_ids() {
        let other = "0123456789abcdef0123456789abcdef";
        let text = format!("gis.content.get('{ID}') and {{{{{other}.itemId}}}} and {ID}");
        assert_eq!(find_item_ids(&text), vec![ID.to_string()]);
        let out = templatize_item_ids(&text, |_| true);
        assert_eq!(
            out,
            format!("gis.content.get('{{{{{ID}.itemId}}}}') and {{{{{other}.itemId}}}} and {{{{{ID}.itemId}}}}")
        );
    }

    #[test]
    fn test_merge_deep() {
        let mut a = TemplateDictionary::from_value(json!({"x": {"itemId": "1"}, "k": 1}));
        let b = TemplateDictionary::from_value(json!({"x": {"url": "u"}, "k": 2}));
        a.merge(&b);
        assert_eq!(a.as_value(), &json!({"x": {"itemId": "1", "url": "u"}, "k": 2}));
    }

    #[test]
    fn test_replace_literal_counts() {
        let mut v = json!({"a": "http://x/0", "b": ["http://x/0/query", 1]});
        assert_eq!(replace_literal(&mut v, "http://x/0", "T"), 2);
        assert_eq!(v, json!({"a": "T", "b": ["T/query", 1]}));
    }
}
