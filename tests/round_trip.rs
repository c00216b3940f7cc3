// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Round trip: convert items from one portal, deploy them into another
//!
//! 1. Seed a source portal with an app, its web map and the map's service
//! 2. Build a solution and push it through JSON
//! 3. Deploy into an empty destination portal
//! 4. Verify ids, URLs and field names resolved to destination values
//! 5. Verify a failing deployment leaves the destination untouched

use arcgis_solution::creator::{create_solution, CreateOptions};
use arcgis_solution::deployer::{deploy_solution, DeployOptions};
use arcgis_solution::error::SolutionError;
use arcgis_solution::rest::MemoryPortal;
use arcgis_solution::templatize::has_unresolved_variables;
use arcgis_solution::types::{ItemProgressStatus, ProgressCallback, ProgressEvent, Solution};
use serde_json::json;
use std::sync::Mutex;

const APP: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const MAP: &str = "11111111111111111111111111111111";
const SVC: &str = "22222222222222222222222222222222";
const NB: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const SOURCE: &str = "https://source.maps.arcgis.com";
const DEST: &str = "https://dest.maps.arcgis.com";
const SVC_URL: &str = "https://services.arcgis.com/org/arcgis/rest/services/Parks/FeatureServer";

// =============================================================================
// Test Helpers
// =============================================================================

fn source_portal() -> MemoryPortal {
    let portal = MemoryPortal::new(SOURCE);
    portal.insert_item(
        json!({"id": APP, "type": "Web Mapping Application", "title": "Parks Finder",
               "url": format!("{SOURCE}/apps/Viewer/index.html?appid={APP}")}),
        Some(json!({"values": {"webmap": MAP, "title": "Parks"}})),
    );
    portal.insert_item(
        json!({"id": MAP, "type": "Web Map", "title": "Parks Map"}),
        Some(json!({"operationalLayers": [{
            "id": "parks",
            "url": format!("{SVC_URL}/0"),
            "itemId": SVC,
            "popupInfo": {"title": "{PARK_NAME}", "fieldInfos": [{"fieldName": "PARK_NAME"}]}
        }]})),
    );
    portal.insert_item(json!({"id": SVC, "type": "Feature Service", "title": "Parks", "url": SVC_URL}), None);
    portal.insert_item(
        json!({"id": NB, "type": "Notebook", "title": "Parks report"}),
        Some(json!({"cells": [{"cell_type": "code", "source": [format!("parks = gis.content.get('{SVC}')")]}]})),
    );
    portal.insert_relationship(MAP, SVC, "Map2Service");
    portal.add_service_json(SVC_URL, json!({"serviceItemId": SVC, "layers": [{"id": 0, "name": "Parks"}]}));
    portal.add_service_json(
        &format!("{SVC_URL}/0"),
        json!({"id": 0, "name": "Parks", "fields": [{"name": "OBJECTID"}, {"name": "PARK_NAME"}]}),
    );
    portal
}

async fn build_solution() -> Solution {
    let ids = vec![APP.to_string(), NB.to_string()];
    let created = create_solution(&ids, &source_portal(), &CreateOptions::default())
        .await
        .unwrap();
    // Through the file format and back
    let text = serde_json::to_string(&created.solution).unwrap();
    serde_json::from_str(&text).unwrap()
}

// =============================================================================
// Round Trip
// =============================================================================

#[tokio::test]
async fn test_solution_has_no_source_ids_left_outside_tokens() {
    let solution = build_solution().await;
    assert_eq!(solution.templates.len(), 4);

    let map = solution.template_by_id(MAP).unwrap();
    let layer = &map.data["operationalLayers"][0];
    assert_eq!(layer["url"], format!("{{{{{SVC}.layer0.url}}}}"));
    assert_eq!(layer["popupInfo"]["fieldInfos"][0]["fieldName"], format!("{{{{{SVC}.layer0.fields.park_name.name}}}}"));

    let app = solution.template_by_id(APP).unwrap();
    assert_eq!(app.dependencies, vec![MAP.to_string()]);
    assert!(has_unresolved_variables(&app.item));
    let text = serde_json::to_string(&app.data).unwrap();
    assert!(!text.contains(&format!("\"{MAP}\"")));
}

#[tokio::test]
async fn test_deploy_resolves_everything() {
    let solution = build_solution().await;
    let dest = MemoryPortal::new(DEST).with_username("dest-user");
    let events: Mutex<Vec<ProgressEvent>> = Mutex::new(Vec::new());
    let progress: ProgressCallback<'_> = &|e: &ProgressEvent| events.lock().unwrap().push(e.clone());

    let report = deploy_solution(&solution, &dest, &DeployOptions::default(), Some(progress))
        .await
        .unwrap();

    // The service is reused, the other three are new
    let service = report.items.iter().find(|i| i.source_id == SVC).unwrap();
    assert!(!service.created);
    assert_eq!(report.items.iter().filter(|i| i.created).count(), 3);
    assert_eq!(report.items[0].source_id, SVC);

    let new_map = report.dictionary.item_id(MAP).unwrap().to_string();
    let new_app = report.dictionary.item_id(APP).unwrap().to_string();
    let new_nb = report.dictionary.item_id(NB).unwrap().to_string();

    let map_data = dest.data(&new_map).unwrap();
    let layer = &map_data["operationalLayers"][0];
    assert_eq!(layer["url"], format!("{SVC_URL}/0"));
    assert_eq!(layer["itemId"], SVC);
    assert_eq!(layer["popupInfo"]["title"], "{PARK_NAME}");
    assert_eq!(layer["popupInfo"]["fieldInfos"][0]["fieldName"], "PARK_NAME");

    assert_eq!(dest.data(&new_app).unwrap()["values"]["webmap"], new_map.as_str());
    assert_eq!(
        dest.item(&new_app).unwrap()["url"],
        format!("{DEST}/apps/Viewer/index.html?appid={new_app}")
    );

    let cells = dest.data(&new_nb).unwrap();
    assert_eq!(cells["cells"][0]["source"][0], format!("parks = gis.content.get('{SVC}')"));

    assert!(report.unresolved(&solution).is_empty());
    assert!(dest
        .relationships()
        .contains(&(new_map.clone(), SVC.to_string(), "Map2Service".to_string())));

    let events = events.lock().unwrap();
    assert_eq!(events.iter().filter(|e| e.status == ItemProgressStatus::Finished).count(), 4);
    assert_eq!(events.last().unwrap().percent_done, 100);
}

#[tokio::test]
async fn test_failed_deploy_leaves_destination_clean() {
    let solution = build_solution().await;
    let dest = MemoryPortal::new(DEST);
    dest.fail_add_for_type("Web Mapping Application");

    let err = deploy_solution(&solution, &dest, &DeployOptions::default(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SolutionError::Deploy { .. }));
    assert!(err.item_ids().contains(&APP.to_string()));
    assert!(dest.item_ids().is_empty());
    assert!(dest.folders().is_empty());
}
