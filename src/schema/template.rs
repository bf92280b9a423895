//! Dialogue templates: the immutable, authored dialogue graph.
//!
//! Templates are deserialized from RON or JSON. Construction performs no
//! structural checks so that broken templates can still be diagnosed by
//! the validator.

use rustc_hash::FxHashMap;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::state::DialogueState;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("JSON deserialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported dialogue file: {0} (expected .ron or .json)")]
    UnsupportedFormat(PathBuf),
}

/// Lookup of a state key that the template does not define.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown dialogue state '{0}'")]
pub struct UnknownStateError(pub String);

/// An illustration descriptor. Opaque to the engine; consumed by renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Illustration(pub serde_json::Value);

/// States keyed by name, kept in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateTable {
    entries: Vec<(String, DialogueState)>,
    index: FxHashMap<String, usize>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a state. Replacing an existing key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, state: DialogueState) -> Option<DialogueState> {
        let key = key.into();
        if let Some(&pos) = self.index.get(&key) {
            return Some(std::mem::replace(&mut self.entries[pos].1, state));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, state));
        None
    }

    pub fn get(&self, key: &str) -> Option<&DialogueState> {
        self.index.get(key).map(|&pos| &self.entries[pos].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Declaration position of `key`.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// The entry at a position previously returned by `position`.
    ///
    /// Panics if `pos` is out of bounds.
    pub fn entry_at(&self, pos: usize) -> (&str, &DialogueState) {
        let (key, state) = &self.entries[pos];
        (key.as_str(), state)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DialogueState)> {
        self.entries.iter().map(|(k, s)| (k.as_str(), s))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, DialogueState)> for StateTable {
    fn from_iter<I: IntoIterator<Item = (K, DialogueState)>>(iter: I) -> Self {
        let mut table = StateTable::new();
        for (key, state) in iter {
            table.insert(key, state);
        }
        table
    }
}

impl Serialize for StateTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, state) in &self.entries {
            map.serialize_entry(key, state)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StateTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = StateTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of state names to dialogue states")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<StateTable, A::Error> {
                let mut table = StateTable::new();
                while let Some((key, state)) = access.next_entry::<String, DialogueState>()? {
                    if table.contains_key(&key) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate dialogue state '{}'",
                            key
                        )));
                    }
                    table.insert(key, state);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

/// An authored dialogue: states, illustrations, and where to begin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueTemplate {
    pub start: String,
    pub states: StateTable,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub illustrations: BTreeMap<String, Illustration>,
    /// The host must not let the user dismiss this dialogue.
    #[serde(default)]
    pub unskippable: bool,
}

impl DialogueTemplate {
    pub fn new(start: impl Into<String>, states: StateTable) -> Self {
        Self {
            start: start.into(),
            states,
            illustrations: BTreeMap::new(),
            unskippable: false,
        }
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn is_unskippable(&self) -> bool {
        self.unskippable
    }

    /// Look up a state. Callers are expected to have validated the template.
    pub fn state(&self, key: &str) -> Result<&DialogueState, UnknownStateError> {
        self.states
            .get(key)
            .ok_or_else(|| UnknownStateError(key.to_string()))
    }

    pub fn illustration(&self, name: &str) -> Option<&Illustration> {
        self.illustrations.get(name)
    }

    pub fn has_conditions(&self) -> bool {
        self.states.iter().any(|(_, s)| s.has_conditions())
    }

    /// Load a template from a `.ron` or `.json` file.
    pub fn load(path: &Path) -> Result<DialogueTemplate, TemplateError> {
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|s| s.to_str()) {
            Some("ron") => Self::parse_ron(&contents),
            Some("json") => Self::parse_json(&contents),
            _ => Err(TemplateError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    /// Parse a template from a RON string. Optional fields may be written
    /// without `Some(..)`.
    pub fn parse_ron(input: &str) -> Result<DialogueTemplate, TemplateError> {
        let options = ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME);
        Ok(options.from_str(input)?)
    }

    /// Parse a template from a JSON string.
    pub fn parse_json(input: &str) -> Result<DialogueTemplate, TemplateError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn to_json(&self) -> Result<String, TemplateError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::choice::{Choice, UnavailableDisplay};
    use crate::schema::state::Outcome;

    const GREETING_RON: &str = r#"(
        start: "greet",
        unskippable: true,
        illustrations: {
            "portrait": { "type": "texture", "texture": "npc/smith.png" },
        },
        states: {
            "greet": (
                text: ["Hello there.", "Ah, a customer."],
                illustrations: ["portrait"],
                choices: [
                    (text: "Hi", next: "bye"),
                    (
                        text: "Buy the sword",
                        next: "bye",
                        only_if: (
                            predicate: "has_gold",
                            when_unavailable: (display: grayed_out, message: "Not enough gold."),
                        ),
                    ),
                ],
            ),
            "bye": (type: "end_dialogue"),
        },
    )"#;

    #[test]
    fn parse_ron_template() {
        let t = DialogueTemplate::parse_ron(GREETING_RON).unwrap();
        assert_eq!(t.start(), "greet");
        assert!(t.is_unskippable());
        assert_eq!(t.states.len(), 2);
        assert!(t.illustration("portrait").is_some());

        let greet = t.state("greet").unwrap();
        assert_eq!(greet.texts.len(), 2);
        assert_eq!(greet.choices.len(), 2);
        let condition = greet.choices[1].condition.as_ref().unwrap();
        assert_eq!(condition.when_unavailable.display, UnavailableDisplay::GrayedOut);
        assert_eq!(t.state("bye").unwrap().outcome, Outcome::EndDialogue);
        assert!(t.has_conditions());
    }

    #[test]
    fn parse_json_template() {
        let t = DialogueTemplate::parse_json(
            r#"{
                "start": "greet",
                "states": {
                    "greet": { "choices": [{ "text": "Hi", "next": "bye" }] },
                    "bye": { "type": "END_DIALOGUE" }
                }
            }"#,
        )
        .unwrap();
        assert!(!t.is_unskippable());
        assert!(t.illustrations.is_empty());
        assert!(!t.has_conditions());
    }

    #[test]
    fn declaration_order_is_preserved() {
        let t = DialogueTemplate::parse_json(
            r#"{ "start": "z", "states": { "z": {}, "a": {}, "m": {} } }"#,
        )
        .unwrap();
        let keys: Vec<&str> = t.states.keys().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);

        let json = t.to_json().unwrap();
        let z = json.find("\"z\"").unwrap();
        let a = json.find("\"a\"").unwrap();
        let m = json.find("\"m\"").unwrap();
        assert!(z < a && a < m);
    }

    #[test]
    fn duplicate_state_keys_are_rejected() {
        let result = DialogueTemplate::parse_json(
            r#"{ "start": "a", "states": { "a": {}, "a": {} } }"#,
        );
        assert!(matches!(result, Err(TemplateError::Json(_))));
    }

    #[test]
    fn unknown_state_lookup() {
        let t = DialogueTemplate::new("a", StateTable::new());
        assert_eq!(t.state("a").unwrap_err(), UnknownStateError("a".to_string()));
    }

    #[test]
    fn dangling_references_still_parse() {
        let t = DialogueTemplate::parse_json(
            r#"{ "start": "a", "states": { "a": { "choices": [{ "next": "nowhere" }] } } }"#,
        )
        .unwrap();
        assert_eq!(t.state("a").unwrap().next_state(0), Some("nowhere"));
    }

    #[test]
    fn state_table_replace_keeps_position() {
        let mut table: StateTable = vec![
            ("a", DialogueState::default()),
            ("b", DialogueState::default()),
        ]
        .into_iter()
        .collect();
        let old = table.insert("a", DialogueState::new(Outcome::EndDialogue));
        assert!(old.is_some());
        assert_eq!(table.position("a"), Some(0));
        assert_eq!(table.get("a").unwrap().outcome, Outcome::EndDialogue);
    }

    #[test]
    fn json_round_trip() {
        let t = DialogueTemplate::parse_ron(GREETING_RON).unwrap();
        let json = t.to_json().unwrap();
        let back = DialogueTemplate::parse_json(&json).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn unsupported_extension() {
        let result = DialogueTemplate::load(Path::new("Cargo.toml"));
        assert!(matches!(result, Err(TemplateError::UnsupportedFormat(_))));
    }

    #[test]
    fn builder_style_template() {
        let states: StateTable = vec![
            (
                "greet",
                DialogueState::default()
                    .with_text("Hello.")
                    .with_choice(Choice::new("Hi", "bye")),
            ),
            ("bye", DialogueState::new(Outcome::EndDialogue)),
        ]
        .into_iter()
        .collect();
        let t = DialogueTemplate::new("greet", states);
        assert_eq!(t.state("greet").unwrap().texts[0].text, "Hello.");
    }
}
