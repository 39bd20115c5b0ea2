// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Structural merge of partial remote documents onto a template.
//!
//! Remote documents may predate fields added to the template, so every read
//! goes through [`merged`]: objects merge key by key, anything else in the
//! overlay replaces what the base had. Writes use [`deep_merge`], where a
//! `null` is a value like any other.

use serde_json::Value;

/// Merge `overlay` into `base` in place.
///
/// Object values merge recursively. Scalars, arrays and `null` in the overlay
/// replace the base value.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Return `template` with `remote` merged over it.
///
/// A `null` in `remote` counts as absent, so the template value stays.
pub fn merged(template: &Value, remote: &Value) -> Value {
    let mut out = template.clone();
    fill(&mut out, remote);
    out
}

fn fill(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => fill(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
