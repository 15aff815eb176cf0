use std::collections::HashMap;

use crate::{Error, Result};

/// A key of the dataset index schema: a name plus an optional human readable
/// description. The schema is fixed at `create` time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescription {
    pub name: String,
    pub description: Option<String>,
}

impl KeyDescription {
    pub fn new(name: &str) -> Self {
        KeyDescription {
            name: name.to_string(),
            description: None,
        }
    }

    pub fn with_description(name: &str, description: &str) -> Self {
        KeyDescription {
            name: name.to_string(),
            description: Some(description.to_string()),
        }
    }
}

/// Key names and key values share the same restricted alphabet so they stay
/// safe in URLs and file names.
pub fn valid_key_component(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Dataset identifier as supplied by a caller: either the values in schema
/// order, or a mapping from key name to value.
#[derive(Debug, Clone)]
pub enum KeySelection {
    Ordered(Vec<String>),
    Named(HashMap<String, String>),
}

impl KeySelection {
    pub fn ordered<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        KeySelection::Ordered(values.into_iter().map(Into::into).collect())
    }
}

/// Normalize a key selection to the schema's order. Named selections must
/// cover the schema exactly; any name outside it is an unknown key.
pub fn normalize_keys(schema: &[String], selection: &KeySelection) -> Result<Vec<String>> {
    match selection {
        KeySelection::Ordered(values) => Ok(values.clone()),
        KeySelection::Named(mapping) => {
            if let Some(unknown) = mapping.keys().find(|name| !schema.contains(name)) {
                return Err(Error::UnknownKey(unknown.clone()));
            }

            schema
                .iter()
                .map(|name| mapping.get(name).cloned().ok_or_else(|| Error::UnknownKey(name.clone())))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<String> {
        vec!["sensor".to_string(), "date".to_string()]
    }

    #[test]
    fn key_component_alphabet() {
        assert!(valid_key_component("S2A_2024-06-01"));
        assert!(valid_key_component("band_04"));
        assert!(!valid_key_component(""));
        assert!(!valid_key_component("no/slash"));
        assert!(!valid_key_component("no space"));
    }

    #[test]
    fn ordered_selection_passes_through() -> Result {
        let keys = normalize_keys(&schema(), &KeySelection::ordered(["S2A", "20240601"]))?;
        assert_eq!(keys, vec!["S2A", "20240601"]);
        Ok(())
    }

    #[test]
    fn named_selection_reordered_to_schema() -> Result {
        let mapping = HashMap::from([
            ("date".to_string(), "20240601".to_string()),
            ("sensor".to_string(), "S2A".to_string()),
        ]);
        let keys = normalize_keys(&schema(), &KeySelection::Named(mapping))?;
        assert_eq!(keys, vec!["S2A", "20240601"]);
        Ok(())
    }

    #[test]
    fn named_selection_with_unknown_name() {
        let mapping = HashMap::from([
            ("sensor".to_string(), "S2A".to_string()),
            ("date".to_string(), "20240601".to_string()),
            ("tile".to_string(), "31UFS".to_string()),
        ]);
        let err = normalize_keys(&schema(), &KeySelection::Named(mapping)).unwrap_err();
        assert!(matches!(err, Error::UnknownKey(name) if name == "tile"));
    }

    #[test]
    fn named_selection_missing_schema_name() {
        let mapping = HashMap::from([("sensor".to_string(), "S2A".to_string())]);
        let err = normalize_keys(&schema(), &KeySelection::Named(mapping)).unwrap_err();
        assert!(matches!(err, Error::UnknownKey(name) if name == "date"));
    }
}
