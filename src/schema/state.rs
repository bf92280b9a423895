//! Dialogue states: the nodes of a dialogue graph.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use super::choice::Choice;

/// What the host should do after a state has been entered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Outcome {
    /// Keep the dialogue open and show the state's choices.
    #[default]
    Default,
    /// Close the dialogue.
    EndDialogue,
    /// Present the first two choices as a confirm/deny pair.
    AskConfirmation,
    /// A host-defined tag. Always terminal.
    Custom(String),
}

impl Outcome {
    /// Parse an outcome tag, ignoring case. Unknown tags become `Custom`.
    pub fn from_tag(tag: &str) -> Self {
        let upper = tag.to_ascii_uppercase();
        match upper.as_str() {
            "DEFAULT" => Self::Default,
            "END_DIALOGUE" => Self::EndDialogue,
            "ASK_CONFIRMATION" => Self::AskConfirmation,
            _ => Self::Custom(upper),
        }
    }

    /// Canonical tag string (e.g., "END_DIALOGUE").
    pub fn tag(&self) -> &str {
        match self {
            Self::Default => "DEFAULT",
            Self::EndDialogue => "END_DIALOGUE",
            Self::AskConfirmation => "ASK_CONFIRMATION",
            Self::Custom(tag) => tag,
        }
    }

    /// Terminal states may legitimately have no choices.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Default)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

impl<'de> Deserialize<'de> for Outcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OutcomeVisitor;

        impl Visitor<'_> for OutcomeVisitor {
            type Value = Outcome;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an outcome tag such as \"end_dialogue\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Outcome, E> {
                if v.is_empty() {
                    return Err(E::invalid_value(de::Unexpected::Str(v), &self));
                }
                Ok(Outcome::from_tag(v))
            }
        }

        deserializer.deserialize_str(OutcomeVisitor)
    }
}

/// One candidate line of text for a state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTextVariant")]
pub struct TextVariant {
    pub text: String,
    /// Relative likelihood of this variant being rolled.
    pub weight: u32,
}

impl TextVariant {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            weight: 1,
        }
    }
}

// Authors may write a bare string or a weighted record.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTextVariant {
    Plain(String),
    Weighted {
        text: String,
        #[serde(default = "default_weight")]
        weight: u32,
    },
}

fn default_weight() -> u32 {
    1
}

impl From<RawTextVariant> for TextVariant {
    fn from(raw: RawTextVariant) -> Self {
        match raw {
            RawTextVariant::Plain(text) => Self { text, weight: 1 },
            RawTextVariant::Weighted { text, weight } => Self { text, weight },
        }
    }
}

/// An opaque action run by the host when a state is entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueAction {
    /// Action type, resolved by the host's action runner.
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
}

/// A node in a dialogue graph.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DialogueState {
    #[serde(default, rename = "text", skip_serializing_if = "Vec::is_empty")]
    pub texts: Vec<TextVariant>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub illustrations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<DialogueAction>,
    #[serde(default, rename = "type")]
    pub outcome: Outcome,
}

impl DialogueState {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.texts.push(TextVariant::new(text));
        self
    }

    pub fn with_choice(mut self, choice: Choice) -> Self {
        self.choices.push(choice);
        self
    }

    pub fn with_illustration(mut self, name: impl Into<String>) -> Self {
        self.illustrations.push(name.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>, value: impl Into<String>) -> Self {
        self.action = Some(DialogueAction {
            action: action.into(),
            value: value.into(),
        });
        self
    }

    /// Destination of the choice at `index`, if it exists.
    pub fn next_state(&self, index: usize) -> Option<&str> {
        self.choices.get(index).map(|c| c.next.as_str())
    }

    pub fn has_conditions(&self) -> bool {
        self.choices.iter().any(Choice::is_conditional)
    }
}
