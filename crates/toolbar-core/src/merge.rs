//! Flag state merging
//!
//! Pure functions that turn a raw `ProjectSnapshot` into UI-ready
//! `EnhancedFlag`s. Inconsistent payloads are tolerated, never rejected.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::models::{EnhancedFlag, FlagType, FlagValue, ProjectSnapshot, Variation};

/// Build one `EnhancedFlag` per key in `flags_state`
///
/// Keys that only appear in `available_variations` or `overrides` are ignored.
pub fn build_enhanced_flags(snapshot: &ProjectSnapshot) -> BTreeMap<String, EnhancedFlag> {
    snapshot
        .flags_state
        .iter()
        .map(|(key, state)| {
            let variations = snapshot
                .available_variations
                .get(key)
                .cloned()
                .unwrap_or_default();
            let override_value = snapshot
                .overrides
                .get(key)
                .map(|o| &o.value)
                .filter(|v| !v.is_null());

            let raw_current = override_value.unwrap_or(&state.value);
            let flag_type = infer_type(&variations, raw_current);
            let current_value = FlagValue::classify(raw_current, flag_type, &variations);
            let original_value = FlagValue::classify(&state.value, flag_type, &variations);
            let enabled = current_value.is_enabled();

            let flag = EnhancedFlag {
                key: key.clone(),
                name: format_flag_name(key),
                current_value,
                original_value,
                is_overridden: override_value.is_some(),
                available_variations: variations,
                flag_type,
                source_environment: snapshot.source_environment_key.clone(),
                enabled,
                version: state.version,
            };
            (key.clone(), flag)
        })
        .collect()
}

/// Infer a flag's type from its variations and current value
///
/// Exactly two variations `true`/`false` make a boolean flag, more than
/// two make it multivariate. Anything else falls back to the JSON shape
/// of the current value.
pub fn infer_type(variations: &[Variation], current_value: &Value) -> FlagType {
    if variations.len() == 2
        && variations.iter().any(|v| v.value == Value::Bool(true))
        && variations.iter().any(|v| v.value == Value::Bool(false))
    {
        return FlagType::Boolean;
    }

    if variations.len() > 2 {
        return FlagType::Multivariate;
    }

    match current_value {
        Value::Number(_) => FlagType::Number,
        _ => FlagType::String,
    }
}

/// Turn a flag key into a display name
///
/// `new-checkout_flow` and `newCheckoutFlow` both become `New Checkout Flow`.
/// Applying it to its own output returns the same string.
pub fn format_flag_name(key: &str) -> String {
    key.split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .flat_map(split_camel_case)
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split at lowercase-to-uppercase boundaries
fn split_camel_case(word: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut prev_lower = false;

    for (idx, c) in word.char_indices() {
        if c.is_uppercase() && prev_lower {
            parts.push(&word[start..idx]);
            start = idx;
        }
        prev_lower = c.is_lowercase();
    }
    parts.push(&word[start..]);
    parts
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
