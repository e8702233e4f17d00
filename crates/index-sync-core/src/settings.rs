//! Remote engine settings and the diff used to decide whether to push them.
//!
//! Settings are kept as a JSON map keyed by the engine's own option names
//! (`customRanking`, `searchableAttributes`, ...). A fetched snapshot and a
//! desired map are compared with [`settings_changed`]: only keys present in
//! the desired map are checked, and list values compare element-wise on
//! their canonical string form so that `["1"]` and `[1]` are equal.

use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Settings field listing modern secondary indexes.
pub const REPLICAS: &str = "replicas";
/// Settings field listing legacy secondary indexes.
pub const SLAVES: &str = "slaves";

/// Option names the remote engine accepts.
pub const SETTING_NAMES: &[&str] = &[
    // attributes
    "searchableAttributes",
    "attributesForFaceting",
    "unretrievableAttributes",
    "attributesToRetrieve",
    "attributesToIndex",
    // ranking
    "ranking",
    "customRanking",
    // faceting
    "maxValuesPerFacet",
    "sortFacetValuesBy",
    // highlighting / snippeting
    "attributesToHighlight",
    "attributesToSnippet",
    "highlightPreTag",
    "highlightPostTag",
    "snippetEllipsisText",
    "restrictHighlightAndSnippetArrays",
    // pagination
    "hitsPerPage",
    "paginationLimitedTo",
    // typos
    "minWordSizefor1Typo",
    "minWordSizefor2Typos",
    "typoTolerance",
    "allowTyposOnNumericTokens",
    "disableTypoToleranceOnAttributes",
    "disableTypoToleranceOnWords",
    "separatorsToIndex",
    // language
    "ignorePlurals",
    "removeStopWords",
    "camelCaseAttributes",
    "decompoundedAttributes",
    "keepDiacriticsOnCharacters",
    "queryLanguages",
    // rules
    "enableRules",
    // query strategy
    "queryType",
    "removeWordsIfNoResults",
    "advancedSyntax",
    "optionalWords",
    "disablePrefixOnAttributes",
    "disableExactOnAttributes",
    "exactOnSingleWordQuery",
    "alternativesAsExact",
    // performance
    "numericAttributesForFiltering",
    "allowCompressionOfIntegerArray",
    "numericAttributesToIndex",
    // advanced
    "attributeForDistinct",
    "distinct",
    "replaceSynonymsInHighlight",
    "minProximity",
    "responseFields",
    "maxFacetHits",
    "synonyms",
    "placeholders",
    "altCorrections",
];

pub fn is_known_setting(name: &str) -> bool {
    SETTING_NAMES.contains(&name)
}

/// Engine settings declared for one index configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSettings {
    values: Map<String, Value>,
}

impl IndexSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one engine option. Unknown option names are rejected.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), ConfigError> {
        if !is_known_setting(name) {
            return Err(ConfigError::UnknownSetting(name.to_string()));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.values.clone()
    }
}

/// Canonical string form used for list comparisons.
fn canonical(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decide whether `desired` differs from the remote snapshot.
///
/// `None` means the snapshot could not be fetched, which always counts as a
/// change. Keys the remote has but `desired` does not mention are ignored.
pub fn settings_changed(current: Option<&Map<String, Value>>, desired: &Map<String, Value>) -> bool {
    let current = match current {
        Some(c) => c,
        None => return true,
    };
    for (key, want) in desired {
        let have = current.get(key);
        match (want, have) {
            (Value::Array(want), Some(Value::Array(have))) => {
                if want.len() != have.len()
                    || want
                        .iter()
                        .zip(have.iter())
                        .any(|(w, h)| canonical(w) != canonical(h))
                {
                    return true;
                }
            }
            (want, Some(have)) => {
                if want != have {
                    return true;
                }
            }
            (_, None) => return true,
        }
    }
    false
}

/// Remove both secondary-listing fields, returning the list that was set.
///
/// `replicas` wins when both are present.
pub fn take_secondary_listing(settings: &mut Map<String, Value>) -> Option<Value> {
    let replicas = settings.remove(REPLICAS);
    let slaves = settings.remove(SLAVES);
    replicas.or(slaves)
}

/// Overlay `overrides` onto `base`, later keys winning.
pub fn merge(base: &Map<String, Value>, overrides: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (k, v) in overrides {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn detects_changes() {
        assert!(settings_changed(None, &Map::new()));
        assert!(settings_changed(
            Some(&Map::new()),
            &map(json!({ "attributesToIndex": ["name"] }))
        ));
        assert!(settings_changed(
            Some(&map(json!({ "attributesToIndex": ["name"] }))),
            &map(json!({ "attributesToIndex": ["name", "hex"] }))
        ));
        assert!(settings_changed(
            Some(&map(json!({ "attributesToIndex": ["name"] }))),
            &map(json!({ "customRanking": ["asc(hex)"] }))
        ));
        assert!(settings_changed(
            Some(&map(json!({ "hitsPerPage": 10 }))),
            &map(json!({ "hitsPerPage": 20 }))
        ));
    }

    #[test]
    fn ignores_equivalent_settings() {
        assert!(!settings_changed(Some(&Map::new()), &Map::new()));
        assert!(!settings_changed(
            Some(&map(json!({ "attributesToIndex": ["name"] }))),
            &map(json!({ "attributesToIndex": ["name"] }))
        ));
        assert!(!settings_changed(
            Some(&map(json!({
                "attributesToIndex": ["name"],
                "customRanking": ["asc(hex)"]
            }))),
            &map(json!({ "customRanking": ["asc(hex)"] }))
        ));
    }

    #[test]
    fn list_elements_compare_on_canonical_strings() {
        assert!(!settings_changed(
            Some(&map(json!({ "numericAttributesForFiltering": ["1", "true"] }))),
            &map(json!({ "numericAttributesForFiltering": [1, true] }))
        ));
        // scalars are not normalized
        assert!(settings_changed(
            Some(&map(json!({ "hitsPerPage": "10" }))),
            &map(json!({ "hitsPerPage": 10 }))
        ));
    }

    #[test]
    fn unknown_setting_is_a_configuration_error() {
        let mut s = IndexSettings::new();
        assert_eq!(
            s.set("rankingg", json!([])),
            Err(ConfigError::UnknownSetting("rankingg".to_string()))
        );
        assert!(s.set("ranking", json!(["typo"])).is_ok());
        assert_eq!(s.get("ranking"), Some(&json!(["typo"])));
    }

    #[test]
    fn secondary_listing_prefers_replicas() {
        let mut m = map(json!({ "replicas": ["a"], "slaves": ["b"], "hitsPerPage": 5 }));
        assert_eq!(take_secondary_listing(&mut m), Some(json!(["a"])));
        assert_eq!(m, map(json!({ "hitsPerPage": 5 })));

        let mut m = map(json!({ "slaves": ["b"] }));
        assert_eq!(take_secondary_listing(&mut m), Some(json!(["b"])));
        assert!(take_secondary_listing(&mut m).is_none());
    }
}
