//! Choices: the edges of a dialogue graph, and the conditions gating them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Newtype wrapper for predicate identifiers.
///
/// The engine never interprets a predicate id; it only hands it to the
/// host's condition evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredicateId(pub String);

impl PredicateId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PredicateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PredicateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How a choice is shown while its condition does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableDisplay {
    /// The choice is left out of the menu entirely.
    Hidden,
    /// The choice stays in the menu but cannot be picked.
    GrayedOut,
}

/// What to do with a choice whose condition is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableAction {
    pub display: UnavailableDisplay,
    /// Shown next to a grayed-out choice. Falls back to the default
    /// locked message when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A predicate gating a choice, plus the fallback presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceCondition {
    pub predicate: PredicateId,
    pub when_unavailable: UnavailableAction,
}

/// A single edge in a dialogue graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub illustrations: Vec<String>,
    /// Key of the destination state. Not checked until validation.
    pub next: String,
    #[serde(
        default,
        rename = "only_if",
        skip_serializing_if = "Option::is_none"
    )]
    pub condition: Option<ChoiceCondition>,
}

impl Choice {
    pub fn new(text: impl Into<String>, next: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            illustrations: Vec::new(),
            next: next.into(),
            condition: None,
        }
    }

    /// Gate this choice behind `predicate`.
    pub fn only_if(
        mut self,
        predicate: impl Into<String>,
        display: UnavailableDisplay,
        message: Option<&str>,
    ) -> Self {
        self.condition = Some(ChoiceCondition {
            predicate: PredicateId(predicate.into()),
            when_unavailable: UnavailableAction {
                display,
                message: message.map(str::to_string),
            },
        });
        self
    }

    pub fn with_illustration(mut self, name: impl Into<String>) -> Self {
        self.illustrations.push(name.into());
        self
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.text, self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choice_builder() {
        let choice = Choice::new("Offer the ring", "bargain")
            .only_if("has_ring", UnavailableDisplay::GrayedOut, Some("You have no ring."))
            .with_illustration("ring");

        assert_eq!(choice.next, "bargain");
        assert!(choice.is_conditional());
        let condition = choice.condition.unwrap();
        assert_eq!(condition.predicate.as_str(), "has_ring");
        assert_eq!(condition.when_unavailable.display, UnavailableDisplay::GrayedOut);
        assert_eq!(condition.when_unavailable.message.as_deref(), Some("You have no ring."));
    }

    #[test]
    fn choice_json_defaults() {
        let choice: Choice = serde_json::from_str(r#"{ "next": "bye" }"#).unwrap();
        assert_eq!(choice.text, "");
        assert!(choice.illustrations.is_empty());
        assert!(choice.condition.is_none());
    }

    #[test]
    fn choice_json_condition() {
        let choice: Choice = serde_json::from_str(
            r#"{
                "text": "Pay up",
                "next": "paid",
                "only_if": {
                    "predicate": "has_gold",
                    "when_unavailable": { "display": "hidden" }
                }
            }"#,
        )
        .unwrap();
        let condition = choice.condition.unwrap();
        assert_eq!(condition.predicate, PredicateId::from("has_gold"));
        assert_eq!(condition.when_unavailable.display, UnavailableDisplay::Hidden);
        assert!(condition.when_unavailable.message.is_none());
    }

    #[test]
    fn missing_next_is_an_error() {
        assert!(serde_json::from_str::<Choice>(r#"{ "text": "Hi" }"#).is_err());
    }

    #[test]
    fn wrong_shape_is_an_error() {
        assert!(serde_json::from_str::<Choice>(r#"{ "next": "bye", "illustrations": "x" }"#).is_err());
        assert!(serde_json::from_str::<Choice>(
            r#"{ "next": "bye", "only_if": { "predicate": "p", "when_unavailable": { "display": "blinking" } } }"#
        )
        .is_err());
    }

    #[test]
    fn display_shows_edge() {
        assert_eq!(Choice::new("Hi", "bye").to_string(), "Hi -> bye");
    }
}
