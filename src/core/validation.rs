//! Structural validation of dialogue templates.
//!
//! Validation never evaluates a condition: every conditioned choice is
//! treated as possibly available. It proves structure, not runtime
//! behaviour; the state machine's escape hatch covers the rest.

use std::collections::VecDeque;
use std::fmt;

use crate::schema::template::DialogueTemplate;

/// A defect that makes a template unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A choice (or the template's `start`) names a state that does not exist.
    NonexistentState {
        state: String,
        choice: Option<usize>,
        target: String,
    },
    /// A state or choice names an illustration that does not exist.
    NonexistentIllustration { state: String, illustration: String },
    /// A reachable, non-terminal state has no choices.
    NoChoice { state: String },
    /// A reachable state from which no terminal state can ever be reached.
    SoftLock { state: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonexistentState {
                state,
                choice: Some(choice),
                target,
            } => write!(
                f,
                "choice {} of {} leads to nonexistent state {}",
                choice, state, target
            ),
            Self::NonexistentState { target, .. } => {
                write!(f, "start state {} does not exist", target)
            }
            Self::NonexistentIllustration {
                state,
                illustration,
            } => write!(
                f,
                "{} references nonexistent illustration {}",
                state, illustration
            ),
            Self::NoChoice { state } => write!(
                f,
                "{} has no choices but does not end the dialogue",
                state
            ),
            Self::SoftLock { state } => write!(
                f,
                "{} has no path to the end of the dialogue",
                state
            ),
        }
    }
}

/// An advisory finding. Never blocks a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// Every path from this state to the end is gated by a condition.
    ConditionalSoftLock { state: String },
    /// No path from `start` reaches this state.
    Unreachable { state: String },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConditionalSoftLock { state } => write!(
                f,
                "{} only has conditional paths to the end of the dialogue",
                state
            ),
            Self::Unreachable { state } => write!(f, "{} is unreachable", state),
        }
    }
}

/// The verdict on a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Warnings(Vec<ValidationWarning>),
    Error(ValidationError),
}

impl ValidationResult {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn warnings(&self) -> &[ValidationWarning] {
        match self {
            Self::Warnings(warnings) => warnings,
            _ => &[],
        }
    }

    /// Human-readable summary, one finding per line.
    pub fn message(&self) -> String {
        match self {
            Self::Valid => String::new(),
            Self::Warnings(warnings) => warnings
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Error(error) => error.to_string(),
        }
    }
}

/// Check a template for structural defects.
///
/// The first error found, in declaration order, wins. Without errors, all
/// warnings are returned together.
pub fn validate_structure(template: &DialogueTemplate) -> ValidationResult {
    if let Err(error) = check_references(template) {
        return ValidationResult::Error(error);
    }

    let states: Vec<_> = template.states.iter().collect();
    let reachable = reachable_from_start(template);

    // No-choice defects come before path analysis: a dead end also strands
    // every state leading to it.
    for (pos, (key, state)) in states.iter().enumerate() {
        if reachable[pos] && state.choices.is_empty() && !state.outcome.is_terminal() {
            return ValidationResult::Error(ValidationError::NoChoice {
                state: key.to_string(),
            });
        }
    }

    let safe = terminal_fixpoint(template, false);
    let escapable = terminal_fixpoint(template, true);

    let mut warnings = Vec::new();
    for (pos, (key, _)) in states.iter().enumerate() {
        if !reachable[pos] || safe[pos] {
            continue;
        }
        if !escapable[pos] {
            return ValidationResult::Error(ValidationError::SoftLock {
                state: key.to_string(),
            });
        }
        warnings.push(ValidationWarning::ConditionalSoftLock {
            state: key.to_string(),
        });
    }

    for (pos, (key, _)) in states.iter().enumerate() {
        if !reachable[pos] {
            warnings.push(ValidationWarning::Unreachable {
                state: key.to_string(),
            });
        }
    }

    if warnings.is_empty() {
        ValidationResult::Valid
    } else {
        ValidationResult::Warnings(warnings)
    }
}

fn check_references(template: &DialogueTemplate) -> Result<(), ValidationError> {
    if !template.states.contains_key(template.start()) {
        return Err(ValidationError::NonexistentState {
            state: template.start().to_string(),
            choice: None,
            target: template.start().to_string(),
        });
    }

    for (key, state) in template.states.iter() {
        let choice_illustrations = state.choices.iter().flat_map(|c| c.illustrations.iter());
        for illustration in state.illustrations.iter().chain(choice_illustrations) {
            if template.illustration(illustration).is_none() {
                return Err(ValidationError::NonexistentIllustration {
                    state: key.to_string(),
                    illustration: illustration.clone(),
                });
            }
        }

        for (index, choice) in state.choices.iter().enumerate() {
            if !template.states.contains_key(&choice.next) {
                return Err(ValidationError::NonexistentState {
                    state: key.to_string(),
                    choice: Some(index),
                    target: choice.next.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Breadth-first search over every edge, conditioned or not.
fn reachable_from_start(template: &DialogueTemplate) -> Vec<bool> {
    let mut reachable = vec![false; template.states.len()];
    let mut queue = VecDeque::new();
    if let Some(start) = template.states.position(template.start()) {
        reachable[start] = true;
        queue.push_back(start);
    }

    while let Some(pos) = queue.pop_front() {
        let (_, state) = template.states.entry_at(pos);
        for choice in &state.choices {
            if let Some(next) = template.states.position(&choice.next) {
                if !reachable[next] {
                    reachable[next] = true;
                    queue.push_back(next);
                }
            }
        }
    }
    reachable
}

/// States from which a terminal state can be reached.
///
/// With `use_conditional` false only unconditioned choices count as edges.
/// Iterates until stable, since a state's status can depend on states
/// declared after it.
fn terminal_fixpoint(template: &DialogueTemplate, use_conditional: bool) -> Vec<bool> {
    let mut result: Vec<bool> = template
        .states
        .iter()
        .map(|(_, s)| s.outcome.is_terminal())
        .collect();

    let mut changed = true;
    while changed {
        changed = false;
        for (pos, (_, state)) in template.states.iter().enumerate() {
            if result[pos] {
                continue;
            }
            let leads_out = state
                .choices
                .iter()
                .filter(|c| use_conditional || !c.is_conditional())
                .filter_map(|c| template.states.position(&c.next))
                .any(|next| result[next]);
            if leads_out {
                result[pos] = true;
                changed = true;
            }
        }
    }
    result
}
