// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Workforce projects

use super::{group_token, is_item_id, service_url_token, templatize_item_id_at, Deployed, ItemConverter, Source};
use crate::error::Result;
use crate::props::{array_at_mut, get_prop_mut, get_str};
use crate::rest::{layer_base_url, PortalApi};
use crate::templatize::{
    find_item_ids, item_id_token, map_strings, templatize_item_ids, url_token, TemplateDictionary, FOLDER_ID,
};
use crate::types::ItemTemplate;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Feature layers a project is built on
pub const WORKFORCE_LAYERS: &[&str] = &["dispatchers", "assignments", "workers", "tracks"];

/// Project layers, web maps and integrations; deploying adds the user as a
/// dispatcher
pub struct WorkforceConverter;

fn templatize_layers(template: &mut ItemTemplate) -> Vec<(String, String)> {
    let mut services = Vec::new();
    for layer in WORKFORCE_LAYERS {
        let Some(entry) = template.data.get_mut(*layer).and_then(Value::as_object_mut) else {
            continue;
        };
        let Some(service_id) = entry
            .get("serviceItemId")
            .and_then(Value::as_str)
            .filter(|id| is_item_id(id))
            .map(str::to_string)
        else {
            continue;
        };
        entry.insert("serviceItemId".into(), Value::String(item_id_token(&service_id)));
        if let Some(Value::String(url)) = entry.get_mut("url") {
            services.push((layer_base_url(url), service_id.clone()));
            *url = service_url_token(url, &service_id);
        }
        template.add_dependency(&service_id);
    }
    services
}

/// Ids and service URLs inside integration URL templates
fn templatize_integrations(template: &mut ItemTemplate, services: &[(String, String)]) {
    let mut found: Vec<String> = Vec::new();
    let mut rewrite = |s: &str| -> Option<String> {
        let mut out = s.to_string();
        for (base, id) in services {
            out = out.replace(base.as_str(), &url_token(id));
        }
        for id in find_item_ids(&out) {
            if !found.contains(&id) {
                found.push(id);
            }
        }
        out = templatize_item_ids(&out, |_| true);
        (out != s).then_some(out)
    };

    for integration in array_at_mut(&mut template.data, "assignmentIntegrations") {
        if let Some(Value::String(s)) = integration.get_mut("urlTemplate") {
            if let Some(replaced) = rewrite(s) {
                *s = replaced;
            }
        }
        if let Some(types) = get_prop_mut(integration, "assignmentTypes") {
            map_strings(types, &mut |s| rewrite(s));
        }
    }
    for id in found {
        template.add_dependency(&id);
    }
}

#[async_trait]
impl ItemConverter for WorkforceConverter {
    async fn convert_to_template(&self, template: &mut ItemTemplate, _portal: &dyn PortalApi) -> Result<()> {
        templatize_item_id_at(template, Source::Data, "workerWebMapId");
        templatize_item_id_at(template, Source::Data, "dispatcherWebMapId");

        if let Some(Value::String(group)) = template.data.get_mut("groupId") {
            if is_item_id(group) {
                let id = group.clone();
                *group = group_token(&id);
                if !template.groups.contains(&id) {
                    template.groups.push(id);
                }
            }
        }
        if template.data.get("folderId").is_some() {
            template.data["folderId"] = Value::String(FOLDER_ID.to_string());
        }

        let services = templatize_layers(template);
        templatize_integrations(template, &services);
        debug!(
            "Workforce project {} uses {} layer service(s)",
            template.item_id,
            services.len()
        );
        Ok(())
    }

    async fn fine_tune(
        &self,
        template: &ItemTemplate,
        _deployed: &Deployed,
        dictionary: &TemplateDictionary,
        portal: &dyn PortalApi,
    ) -> Result<Vec<String>> {
        let Some(layer_url) = get_str(&template.data, "dispatchers.url") else {
            return Ok(Vec::new());
        };
        let Some(username) = dictionary.get_str("user.username") else {
            return Ok(Vec::new());
        };

        let existing = portal
            .query_features(layer_url, &format!("userId = '{}'", username.replace('\'', "''")))
            .await?;
        if !existing.is_empty() {
            debug!("{} is already a dispatcher", username);
            return Ok(Vec::new());
        }

        let name = dictionary.get_str("user.fullName").unwrap_or(username);
        let dispatcher = json!({"attributes": {"name": name, "userId": username}});
        portal.add_features(layer_url, &[dispatcher]).await?;
        info!("Added {} as a dispatcher", username);
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::MemoryPortal;

    const PROJECT: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const WORKER_MAP: &str = "11111111111111111111111111111111";
    const DISPATCH_MAP: &str = "12121212121212121212121212121212";
    const DISPATCHERS: &str = "22222222222222222222222222222222";
    const ASSIGNMENTS: &str = "33333333333333333333333333333333";
    const SURVEY: &str = "44444444444444444444444444444444";
    const GROUP: &str = "99999999999999999999999999999999";

    fn project() -> ItemTemplate {
        let mut t = ItemTemplate::initialize(&json!({"id": PROJECT, "type": "Workforce Project"}));
        t.data = json!({
            "groupId": GROUP,
            "workerWebMapId": WORKER_MAP,
            "dispatcherWebMapId": DISPATCH_MAP,
            "folderId": "f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0",
            "dispatchers": {"serviceItemId": DISPATCHERS, "url": "https://s/Dispatchers/FeatureServer/0"},
            "assignments": {"serviceItemId": ASSIGNMENTS, "url": "https://s/Assignments/FeatureServer/0"},
            "assignmentIntegrations": [{
                "id": "survey",
                "urlTemplate": format!("arcgis-survey123://?itemID={SURVEY}"),
                "assignmentTypes": {
                    "1": {"urlTemplate": "https://s/Assignments/FeatureServer/0/query?where=1=1"}
                }
            }]
        });
        t
    }

    #[tokio::test]
    async fn test_workforce_project_templatized() {
        let mut t = project();
        let portal = MemoryPortal::new("https://org");
        WorkforceConverter.convert_to_template(&mut t, &portal).await.unwrap();

        assert_eq!(t.data["groupId"], format!("{{{{{GROUP}.itemId||{GROUP}}}}}"));
        assert_eq!(t.data["workerWebMapId"], format!("{{{{{WORKER_MAP}.itemId}}}}"));
        assert_eq!(t.data["folderId"], "{{folderId}}");
        assert_eq!(t.data["dispatchers"]["serviceItemId"], format!("{{{{{DISPATCHERS}.itemId}}}}"));
        assert_eq!(t.data["dispatchers"]["url"], format!("{{{{{DISPATCHERS}.layer0.url}}}}"));
        assert_eq!(
            t.data["assignmentIntegrations"][0]["urlTemplate"],
            format!("arcgis-survey123://?itemID={{{{{SURVEY}.itemId}}}}")
        );
        assert_eq!(
            t.data["assignmentIntegrations"][0]["assignmentTypes"]["1"]["urlTemplate"],
            format!("{{{{{ASSIGNMENTS}.url}}}}/0/query?where=1=1")
        );
        assert_eq!(
            t.dependencies,
            vec![
                WORKER_MAP.to_string(),
                DISPATCH_MAP.to_string(),
                DISPATCHERS.to_string(),
                ASSIGNMENTS.to_string(),
                SURVEY.to_string()
            ]
        );
        assert_eq!(t.groups, vec![GROUP.to_string()]);
    }

    #[tokio::test]
    async fn test_fine_tune_adds_dispatcher_once() {
        let portal = MemoryPortal::new("https://dest");
        let layer = "https://dest/Dispatchers/FeatureServer/0";
        let mut t = ItemTemplate::initialize(&json!({"id": PROJECT, "type": "Workforce Project"}));
        t.data = json!({"dispatchers": {"url": layer}});
        let mut dictionary = TemplateDictionary::new();
        dictionary.set("user", json!({"username": "casey", "fullName": "Casey Doe"}));
        let deployed = Deployed { item_id: "new".into(), created: true };

        WorkforceConverter.fine_tune(&t, &deployed, &dictionary, &portal).await.unwrap();
        WorkforceConverter.fine_tune(&t, &deployed, &dictionary, &portal).await.unwrap();

        let features = portal.features(layer);
        assert_eq!(features.len(), 1);
        assert_eq!(features[0]["attributes"]["userId"], "casey");
        assert_eq!(features[0]["attributes"]["name"], "Casey Doe");
    }
}
