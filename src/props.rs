// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Property-path access on JSON values
//!
//! Paths are dotted (`data.map.itemId`); numeric segments index arrays
//! (`data.widgets.0.itemId`). A missing path is never an error.

use serde_json::{Map, Value};

fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn step_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |i| items.get_mut(i)),
        _ => None,
    }
}

/// Look up a value by dotted path
#[must_use]
pub fn get_prop<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, step)
}

/// Mutable lookup by dotted path
pub fn get_prop_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, step_mut)
}

/// Look up a string value by dotted path
#[must_use]
pub fn get_str<'a>(value: &'a Value, path: &str) -> Option<&'a str> {
    get_prop(value, path).and_then(Value::as_str)
}

/// Collect the values found at each of `paths`, skipping missing ones
#[must_use]
pub fn get_props<'a>(value: &'a Value, paths: &[&str]) -> Vec<&'a Value> {
    paths.iter().filter_map(|p| get_prop(value, p)).collect()
}

/// Set a value by dotted path, creating intermediate objects as needed.
///
/// Returns `false` when the path runs through a scalar or a missing array
/// slot and nothing was written.
pub fn set_prop(value: &mut Value, path: &str, new_value: Value) -> bool {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return false;
    };

    let mut current = value;
    for segment in segments {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(item) => item,
                None => return false,
            },
            _ => return false,
        };
    }

    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    match current {
        Value::Object(map) => {
            map.insert(last.to_string(), new_value);
            true
        }
        Value::Array(items) => match last.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
            Some(slot) => {
                *slot = new_value;
                true
            }
            None => false,
        },
        _ => false,
    }
}

/// Remove a value by dotted path, returning it if it existed
pub fn delete_prop(value: &mut Value, path: &str) -> Option<Value> {
    let (parent_path, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (parent, last),
        None => ("", path),
    };
    match get_prop_mut(value, parent_path)? {
        Value::Object(map) => map.remove(last),
        Value::Array(items) => {
            let index = last.parse::<usize>().ok()?;
            (index < items.len()).then(|| items.remove(index))
        }
        _ => None,
    }
}

/// Iterate the elements of the array at `path` mutably (empty if absent)
pub fn array_at_mut<'a>(value: &'a mut Value, path: &str) -> impl Iterator<Item = &'a mut Value> {
    get_prop_mut(value, path)
        .and_then(Value::as_array_mut)
        .into_iter()
        .flat_map(|items| items.iter_mut())
}
