//! Model selection helpers
//!
//! The catalog itself is fetched elsewhere; these only interpret it
//! against the per-identity `enabled_models` map.

use river_tree::ModelRef;
use std::collections::BTreeMap;

/// Models enabled by default when present in the catalog
pub const PREFERRED_DEFAULT_MODELS: [&str; 4] = [
    "google/gemma-3n-e4b-it:free",
    "mistralai/mistral-7b-instruct:free",
    "moonshotai/kimi-k2:free",
    "openai/gpt-oss-20b:free",
];

/// Enabled when none of the preferred models are available
pub const FALLBACK_DEFAULT_COUNT: usize = 5;

/// Catalog entries switched on, in catalog order
#[must_use]
pub fn enabled_models(enabled: &BTreeMap<String, bool>, available: &[ModelRef]) -> Vec<ModelRef> {
    available
        .iter()
        .filter(|m| enabled.get(&m.id).copied().unwrap_or(false))
        .cloned()
        .collect()
}

/// Initial `enabled_models` map for a fresh identity
#[must_use]
pub fn default_enabled_models(available: &[ModelRef]) -> BTreeMap<String, bool> {
    let preferred: BTreeMap<String, bool> = PREFERRED_DEFAULT_MODELS
        .iter()
        .filter(|id| available.iter().any(|m| m.id == **id))
        .map(|id| ((*id).to_string(), true))
        .collect();
    if !preferred.is_empty() {
        return preferred;
    }
    available
        .iter()
        .take(FALLBACK_DEFAULT_COUNT)
        .map(|m| (m.id.clone(), true))
        .collect()
}

/// Drop selections that are no longer in the catalog or no longer enabled
#[must_use]
pub fn validate_selected_models(
    selected: &[ModelRef],
    available: &[ModelRef],
    enabled: &BTreeMap<String, bool>,
) -> Vec<ModelRef> {
    selected
        .iter()
        .filter(|m| available.iter().any(|a| a.id == m.id))
        .filter(|m| enabled.get(&m.id).copied().unwrap_or(false))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn catalog(ids: &[&str]) -> Vec<ModelRef> {
        ids.iter().map(|id| ModelRef::new(*id, *id)).collect()
    }

    #[test]
    fn preferred_defaults_win() {
        let models = catalog(&["x/a", "moonshotai/kimi-k2:free", "x/b", "openai/gpt-oss-20b:free"]);
        let defaults = default_enabled_models(&models);
        assert_eq!(
            defaults.keys().cloned().collect::<Vec<_>>(),
            vec!["moonshotai/kimi-k2:free".to_string(), "openai/gpt-oss-20b:free".to_string()]
        );
    }

    #[test]
    fn fallback_enables_first_five() {
        let models = catalog(&["a/1", "a/2", "a/3", "a/4", "a/5", "a/6"]);
        let defaults = default_enabled_models(&models);
        assert_eq!(defaults.len(), 5);
        assert!(!defaults.contains_key("a/6"));
        assert!(default_enabled_models(&[]).is_empty());
    }

    #[test]
    fn enabled_list_keeps_catalog_order() {
        let models = catalog(&["a/1", "a/2", "a/3"]);
        let enabled = BTreeMap::from([
            ("a/3".to_string(), true),
            ("a/1".to_string(), true),
            ("a/2".to_string(), false),
        ]);
        let ids: Vec<String> = enabled_models(&enabled, &models).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["a/1".to_string(), "a/3".to_string()]);
    }

    #[test]
    fn stale_selections_are_dropped() {
        let available = catalog(&["a/1", "a/2"]);
        let enabled = BTreeMap::from([("a/1".to_string(), true), ("gone/x".to_string(), true)]);
        let selected = catalog(&["a/1", "a/2", "gone/x"]);

        let valid = validate_selected_models(&selected, &available, &enabled);
        assert_eq!(valid, catalog(&["a/1"]));
        assert!(validate_selected_models(&[], &available, &enabled).is_empty());
    }
}
