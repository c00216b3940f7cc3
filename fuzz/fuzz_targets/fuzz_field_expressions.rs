// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell
#![no_main]

use arcgis_solution::fields::FieldTemplatizer;
use arcgis_solution::types::DatasourceInfo;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|expression: &str| {
    let info = DatasourceInfo::new(
        "22222222222222222222222222222222",
        0,
        "https://s/FeatureServer/0",
        vec!["NAME".into(), "STATUS".into(), "OBJECTID".into()],
    );
    if let Some(t) = FieldTemplatizer::new(&info) {
        let _ = t.sql(expression);
        let _ = t.arcade(expression);
        let _ = t.text(expression);
        let _ = t.label(expression);
    }
});
