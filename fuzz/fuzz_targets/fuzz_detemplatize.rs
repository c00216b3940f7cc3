// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell
#![no_main]

use arbitrary::Arbitrary;
use arcgis_solution::templatize::{replace_in_template, templatize_item_ids, TemplateDictionary};
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

#[derive(Arbitrary, Debug)]
struct Input {
    text: String,
    path: String,
    value: String,
}

fuzz_target!(|input: Input| {
    let mut dictionary = TemplateDictionary::new();
    dictionary.set(&input.path, Value::String(input.value));
    let _ = replace_in_template(&Value::String(input.text.clone()), &dictionary);
    let _ = templatize_item_ids(&input.text, |_| true);
});
