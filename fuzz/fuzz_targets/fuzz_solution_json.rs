// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell
#![no_main]

use arcgis_solution::graph::DependencyGraph;
use arcgis_solution::types::Solution;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(solution) = serde_json::from_slice::<Solution>(data) {
        let graph = DependencyGraph::from_templates(&solution.templates);
        let _ = graph.deploy_levels();
        let _ = graph.to_dot(&solution.templates);
    }
});
