// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Web mapping applications
//!
//! Covers configurable apps (`values.webmap`, `values.group`) and Web
//! AppBuilder apps (`map.itemId`, `dataSource`, portal and helper service
//! URLs). Service URLs anywhere else in the data are rewritten as well.

use super::{group_token, templatize_item_id_at, Deployed, ItemConverter, Source};
use crate::error::Result;
use crate::props::{get_prop_mut, get_str, set_prop};
use crate::rest::{is_service_url, portal_base_url, resolve_service_item_ids, PortalApi};
use crate::templatize::{
    item_id_token, layer_token, map_strings, templatize_item_ids, url_token, TemplateDictionary,
    GEOMETRY_SERVICE_URL, PORTAL_BASE_URL,
};
use crate::types::ItemTemplate;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static EMBEDDED_SERVICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^\s'"<>]+?/(?:Feature|Map|Image)Server(?:/\d+)?"#)
        .expect("embedded service pattern")
});

/// Relationship between a Web AppBuilder app and its code bundle
pub const WMA_TO_CODE: &str = "WMA2Code";

/// Configurable apps and Web AppBuilder apps
pub struct WebAppConverter;

/// Does the template describe a Web AppBuilder app?
#[must_use]
pub fn is_web_app_builder(template: &ItemTemplate) -> bool {
    let keyword = template
        .item
        .get("typeKeywords")
        .and_then(Value::as_array)
        .is_some_and(|k| k.iter().any(|w| w.as_str() == Some("Web AppBuilder")));
    keyword || template.data.get("widgetPool").is_some()
}

/// Rewrite the app URL to the destination portal with the new id
fn templatize_app_url(template: &mut ItemTemplate) {
    let own_id = template.item_id.clone();
    let Some(Value::String(url)) = template.item.get_mut("url") else {
        return;
    };
    let mut rewritten = templatize_item_ids(url, |id| id == own_id);
    if let Some(base) = portal_base_url(&rewritten) {
        rewritten = rewritten.replacen(&base, PORTAL_BASE_URL, 1);
    }
    *url = rewritten;
}

fn templatize_web_app_builder(template: &mut ItemTemplate) {
    templatize_item_id_at(template, Source::Data, "map.itemId");
    if let Some(Value::String(id)) = get_prop_mut(&mut template.data, "map.appProxy.mapItemId") {
        if super::is_item_id(id) {
            *id = item_id_token(id);
        }
    }
    for path in ["portalUrl", "map.portalUrl"] {
        if get_str(&template.data, path).is_some() {
            set_prop(&mut template.data, path, Value::String(PORTAL_BASE_URL.to_string()));
        }
    }
    if get_str(&template.data, "geometryService").is_some() {
        set_prop(
            &mut template.data,
            "geometryService",
            Value::String(GEOMETRY_SERVICE_URL.to_string()),
        );
    }
    template.properties["webAppBuilder"] = Value::Bool(true);
}

fn templatize_configurable(template: &mut ItemTemplate) {
    templatize_item_id_at(template, Source::Data, "values.webmap");
    let mut maps = Vec::new();
    if let Some(Value::Array(ids)) = get_prop_mut(&mut template.data, "values.webmaps") {
        for id in ids.iter_mut() {
            if let Value::String(s) = id {
                if super::is_item_id(s) {
                    maps.push(s.clone());
                    *s = item_id_token(s);
                }
            }
        }
    }
    for id in maps {
        template.add_dependency(&id);
    }

    // Groups are never deployed; the token falls back to the source group
    if let Some(Value::String(group)) = get_prop_mut(&mut template.data, "values.group") {
        if super::is_item_id(group) {
            let id = group.clone();
            *group = group_token(&id);
            if !template.groups.contains(&id) {
                template.groups.push(id);
            }
        }
    }
}

fn service_urls(data: &Value) -> Vec<String> {
    let mut urls = Vec::new();
    let mut data = data.clone();
    map_strings(&mut data, &mut |s| {
        if is_service_url(s) {
            urls.push(s.to_string());
        } else {
            urls.extend(EMBEDDED_SERVICE_RE.find_iter(s).map(|m| m.as_str().to_string()));
        }
        None
    });
    urls
}

/// Replace `base` in `s` with the service token, and `base/<N>` with the
/// token of layer `N`
fn tokenize_service_url(s: &str, base: &str, service_id: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find(base) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + base.len()..];
        let digits = after
            .strip_prefix('/')
            .map_or(0, |t| t.bytes().take_while(u8::is_ascii_digit).count());
        match after.get(1..=digits).and_then(|n| n.parse::<u32>().ok()) {
            Some(layer) if digits > 0 => {
                out.push_str(&layer_token(service_id, layer, "url"));
                rest = &after[1 + digits..];
            }
            _ => {
                out.push_str(&url_token(service_id));
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[async_trait]
impl ItemConverter for WebAppConverter {
    async fn convert_to_template(&self, template: &mut ItemTemplate, portal: &dyn PortalApi) -> Result<()> {
        templatize_app_url(template);

        if is_web_app_builder(template) {
            templatize_web_app_builder(template);
        } else {
            templatize_configurable(template);
        }

        let urls = service_urls(&template.data);
        let services = resolve_service_item_ids(portal, &urls).await;

        // Longest base first so a service never clobbers one it prefixes
        let mut bases: Vec<(&String, &String)> = services.iter().collect();
        bases.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
        for (base, service_id) in bases {
            map_strings(&mut template.data, &mut |s| {
                s.contains(base.as_str())
                    .then(|| tokenize_service_url(s, base, service_id))
            });
            template.add_dependency(service_id);
        }
        debug!(
            "App {} depends on {} item(s)",
            template.item_id,
            template.dependencies.len()
        );
        Ok(())
    }

    async fn fine_tune(
        &self,
        template: &ItemTemplate,
        deployed: &Deployed,
        dictionary: &TemplateDictionary,
        portal: &dyn PortalApi,
    ) -> Result<Vec<String>> {
        if template.properties.get("webAppBuilder").and_then(Value::as_bool) != Some(true) {
            return Ok(Vec::new());
        }

        let portal_url = dictionary.get_str("portalBaseUrl").unwrap_or(portal.portal_url());
        let title = get_str(&template.item, "title").unwrap_or_default();
        let folder = dictionary.get_str("folderId");
        let code = json!({
            "type": "Code Attachment",
            "title": title,
            "typeKeywords": ["Code", "Javascript", "Web Mapping Application"],
            "url": format!("{portal_url}/sharing/rest/content/items/{}/package", deployed.item_id)
        });
        let code_id = portal.add_item(&code, None, folder).await?;
        if let Err(e) = portal.add_relationship(&deployed.item_id, &code_id, WMA_TO_CODE).await {
            // The caller only knows about the app; the attachment goes here
            if let Err(delete_error) = portal.delete_item(&code_id).await {
                warn!("Could not delete code attachment {}: {}", code_id, delete_error);
            }
            return Err(e.with_ids(&[deployed.item_id.as_str(), code_id.as_str()]));
        }
        info!("Created code attachment {} for app {}", code_id, deployed.item_id);
        Ok(vec![code_id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::MemoryPortal;

    const APP: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const MAP: &str = "11111111111111111111111111111111";
    const SVC: &str = "22222222222222222222222222222222";
    const GROUP: &str = "99999999999999999999999999999999";

    fn portal() -> MemoryPortal {
        let portal = MemoryPortal::new("https://org.maps.arcgis.com");
        portal.add_service_json("https://s/Roads/FeatureServer", json!({"serviceItemId": SVC}));
        portal
    }

    #[tokio::test]
    async fn test_configurable_app() {
        let mut t = ItemTemplate::initialize(&json!({
            "id": APP,
            "type": "Web Mapping Application",
            "url": format!("https://org.maps.arcgis.com/apps/Viewer/index.html?appid={APP}")
        }));
        t.data = json!({
            "values": {
                "webmap": MAP,
                "group": GROUP,
                "filterLayer": "https://s/Roads/FeatureServer/1"
            }
        });

        WebAppConverter.convert_to_template(&mut t, &portal()).await.unwrap();

        assert_eq!(
            t.item["url"],
            format!("{{{{portalBaseUrl}}}}/apps/Viewer/index.html?appid={{{{{APP}.itemId}}}}")
        );
        assert_eq!(t.data["values"]["webmap"], format!("{{{{{MAP}.itemId}}}}"));
        assert_eq!(t.data["values"]["group"], format!("{{{{{GROUP}.itemId||{GROUP}}}}}"));
        assert_eq!(t.data["values"]["filterLayer"], format!("{{{{{SVC}.layer1.url}}}}"));
        assert_eq!(t.groups, vec![GROUP.to_string()]);
        assert_eq!(t.dependencies, vec![MAP.to_string(), SVC.to_string()]);
        assert!(t.properties.get("webAppBuilder").is_none());
    }

    #[tokio::test]
    async fn test_web_app_builder_app() {
        let mut t = ItemTemplate::initialize(&json!({
            "id": APP,
            "type": "Web Mapping Application",
            "typeKeywords": ["Web AppBuilder", "Web Map"]
        }));
        t.data = json!({
            "portalUrl": "https://org.maps.arcgis.com",
            "geometryService": "https://utility.arcgisonline.com/arcgis/rest/services/Geometry/GeometryServer",
            "map": {"itemId": MAP, "portalUrl": "https://org.maps.arcgis.com", "appProxy": {"mapItemId": MAP}},
            "dataSource": {"dataSources": {"ds1": {"url": "https://s/Roads/FeatureServer/0"}}},
            "widgetPool": {"widgets": [{"config": {"layerUrl": "see https://s/Roads/FeatureServer/0 here"}}]}
        });

        WebAppConverter.convert_to_template(&mut t, &portal()).await.unwrap();

        assert_eq!(t.data["portalUrl"], "{{portalBaseUrl}}");
        assert_eq!(t.data["map"]["portalUrl"], "{{portalBaseUrl}}");
        assert_eq!(t.data["geometryService"], "{{organization.helperServices.geometry.url}}");
        assert_eq!(t.data["map"]["itemId"], format!("{{{{{MAP}.itemId}}}}"));
        assert_eq!(t.data["map"]["appProxy"]["mapItemId"], format!("{{{{{MAP}.itemId}}}}"));
        assert_eq!(
            t.data["dataSource"]["dataSources"]["ds1"]["url"],
            format!("{{{{{SVC}.layer0.url}}}}")
        );
        assert_eq!(
            t.data["widgetPool"]["widgets"][0]["config"]["layerUrl"],
            format!("see {{{{{SVC}.layer0.url}}}} here")
        );
        assert_eq!(t.properties["webAppBuilder"], true);
    }

    #[tokio::test]
    async fn test_fine_tune_creates_code_attachment() {
        let portal = portal();
        let mut t = ItemTemplate::initialize(&json!({"id": APP, "type": "Web Mapping Application", "title": "App"}));
        t.properties["webAppBuilder"] = Value::Bool(true);
        let deployed = Deployed { item_id: "new-app".into(), created: true };
        let mut dictionary = TemplateDictionary::new();
        dictionary.set("portalBaseUrl", json!("https://dest.maps.arcgis.com"));

        let extra = WebAppConverter
            .fine_tune(&t, &deployed, &dictionary, &portal)
            .await
            .unwrap();

        assert_eq!(extra.len(), 1);
        let code = portal.item(&extra[0]).unwrap();
        assert_eq!(code["type"], "Code Attachment");
        assert_eq!(
            code["url"],
            "https://dest.maps.arcgis.com/sharing/rest/content/items/new-app/package"
        );
        assert_eq!(
            portal.relationships(),
            vec![("new-app".to_string(), extra[0].clone(), WMA_TO_CODE.to_string())]
        );
    }

    #[tokio::test]
    async fn test_fine_tune_removes_attachment_when_relating_fails() {
        let portal = portal();
        portal.fail_relationships();
        let mut t = ItemTemplate::initialize(&json!({"id": APP, "type": "Web Mapping Application", "title": "App"}));
        t.properties["webAppBuilder"] = Value::Bool(true);
        let deployed = Deployed { item_id: "new-app".into(), created: true };

        let err = WebAppConverter
            .fine_tune(&t, &deployed, &TemplateDictionary::new(), &portal)
            .await
            .unwrap_err();

        assert!(err.item_ids().contains(&"new-app".to_string()));
        assert!(portal.item_ids().is_empty());
        assert_eq!(portal.deleted().len(), 1);
    }

    #[test]
    fn test_tokenize_service_url() {
        let base = "https://s/Roads/FeatureServer";
        assert_eq!(
            tokenize_service_url(&format!("{base}/12/query and {base}"), base, SVC),
            format!("{{{{{SVC}.layer12.url}}}}/query and {{{{{SVC}.url}}}}")
        );
        assert_eq!(tokenize_service_url(&format!("{base}/"), base, SVC), format!("{{{{{SVC}.url}}}}/"));
    }

    #[tokio::test]
    async fn test_fine_tune_skips_configurable_apps() {
        let portal = portal();
        let t = ItemTemplate::initialize(&json!({"id": APP, "type": "Web Mapping Application"}));
        let deployed = Deployed { item_id: "new-app".into(), created: true };
        let extra = WebAppConverter
            .fine_tune(&t, &deployed, &TemplateDictionary::new(), &portal)
            .await
            .unwrap();
        assert!(extra.is_empty());
        assert!(portal.item_ids().is_empty());
    }
}
