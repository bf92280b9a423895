//! The dialogue state machine. Walks a template on behalf of one session.
//!
//! A machine is either authoritative (it evaluates conditions and produces
//! availability deltas) or a mirror (it only applies deltas received from an
//! authoritative machine). The template is shared; everything else is owned
//! by the machine.

use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::TryFromIntError;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::availability::{AvailabilityCache, AvailabilityDelta};
use crate::core::condition::{ActionRunner, ConditionError, ConditionEvaluator};
use crate::schema::choice::{PredicateId, UnavailableDisplay};
use crate::schema::state::{DialogueAction, DialogueState, Outcome};
use crate::schema::template::{DialogueTemplate, UnknownStateError};

/// Message shown next to a grayed-out choice without a custom message.
pub const DEFAULT_LOCKED_MESSAGE: &str = "This choice is not available right now.";

/// Label of the synthetic choice offered when nothing else can be picked.
pub const ESCAPE_HATCH_TEXT: &str = "Leave the conversation";

/// Wire value of the escape hatch in choice messages.
pub const ESCAPE_HATCH_INDEX: i32 = -1;

/// Which choice the user picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChoiceRef {
    /// A choice of the current state, by its index in the template.
    Real(usize),
    /// The synthetic way out of a state with no available choice.
    EscapeHatch,
}

impl ChoiceRef {
    /// Fails for indices that do not fit a non-negative `i32`.
    pub fn to_wire(self) -> Result<i32, TryFromIntError> {
        match self {
            Self::Real(index) => i32::try_from(index),
            Self::EscapeHatch => Ok(ESCAPE_HATCH_INDEX),
        }
    }

    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            ESCAPE_HATCH_INDEX => Some(Self::EscapeHatch),
            v if v >= 0 => Some(Self::Real(v as usize)),
            _ => None,
        }
    }
}

impl fmt::Display for ChoiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(index) => write!(f, "#{}", index),
            Self::EscapeHatch => f.write_str("escape hatch"),
        }
    }
}

/// A choice as it should be presented right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableChoice {
    pub choice: ChoiceRef,
    pub text: String,
    pub illustrations: Vec<String>,
    /// Set when the choice is shown grayed out.
    pub locked_message: Option<String>,
}

impl AvailableChoice {
    fn escape_hatch() -> Self {
        Self {
            choice: ChoiceRef::EscapeHatch,
            text: ESCAPE_HATCH_TEXT.to_string(),
            illustrations: Vec::new(),
            locked_message: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked_message.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineRole {
    /// Evaluates conditions and produces deltas.
    Authoritative,
    /// Applies deltas, never evaluates.
    Mirror,
}

/// Why a choice was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidChoice {
    #[error("choice {index} is out of range ({count} choices)")]
    OutOfRange { index: usize, count: usize },
    #[error("condition '{predicate}' of choice {index} is not fulfilled")]
    Unavailable { index: usize, predicate: PredicateId },
    #[error("the escape hatch is only offered when no choice is available")]
    EscapeHatchNotOffered,
}

#[derive(Debug, Error)]
pub enum MachineError {
    #[error(transparent)]
    UnknownState(#[from] UnknownStateError),
    #[error("invalid choice {choice} in state '{state}': {reason}")]
    InvalidChoice {
        state: String,
        choice: ChoiceRef,
        reason: InvalidChoice,
    },
    #[error("condition of choice {choice} in state '{state}' could not be evaluated: {source}")]
    ConditionLookup {
        state: String,
        choice: usize,
        source: ConditionError,
    },
    #[error("availability update names choice {choice} of state '{state}', which has no condition")]
    UntrackedCondition { state: String, choice: u32 },
    #[error("{operation} is not allowed on a {role:?} machine")]
    WrongRole {
        role: MachineRole,
        operation: &'static str,
    },
}

/// Where a session stands, for persisting and resuming it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub dialogue_id: String,
    pub state_key: String,
}

#[derive(Debug, Clone)]
struct RolledText {
    /// Position of the state the roll was made for.
    state: usize,
    variant: Option<usize>,
}

/// Walks one dialogue template for one session.
pub struct DialogueStateMachine<R = StdRng> {
    id: String,
    template: Arc<DialogueTemplate>,
    role: MachineRole,
    availability: AvailabilityCache,
    current: usize,
    available: Vec<AvailableChoice>,
    rolled: Option<RolledText>,
    rng: R,
}

impl DialogueStateMachine<StdRng> {
    /// An authoritative machine positioned at `start`, or at the template's
    /// start state when `start` is `None`.
    pub fn new(
        id: impl Into<String>,
        template: Arc<DialogueTemplate>,
        start: Option<&str>,
    ) -> Result<Self, MachineError> {
        Self::with_rng(
            id,
            template,
            start,
            MachineRole::Authoritative,
            StdRng::from_entropy(),
        )
    }

    /// A mirror machine, fed by `apply_delta`.
    pub fn mirror(
        id: impl Into<String>,
        template: Arc<DialogueTemplate>,
        start: Option<&str>,
    ) -> Result<Self, MachineError> {
        Self::with_rng(id, template, start, MachineRole::Mirror, StdRng::from_entropy())
    }
}

impl<R: Rng> DialogueStateMachine<R> {
    /// Build a machine with an explicit random source for text rolls.
    pub fn with_rng(
        id: impl Into<String>,
        template: Arc<DialogueTemplate>,
        start: Option<&str>,
        role: MachineRole,
        rng: R,
    ) -> Result<Self, MachineError> {
        let start = start.unwrap_or(template.start()).to_string();
        let current = template
            .states
            .position(&start)
            .ok_or(UnknownStateError(start))?;
        let availability = AvailabilityCache::from_template(&template);
        let mut machine = Self {
            id: id.into(),
            template,
            role,
            availability,
            current,
            available: Vec::new(),
            rolled: None,
            rng,
        };
        machine.rebuild_available();
        Ok(machine)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn template(&self) -> &Arc<DialogueTemplate> {
        &self.template
    }

    pub fn role(&self) -> MachineRole {
        self.role
    }

    pub fn is_unskippable(&self) -> bool {
        self.template.is_unskippable()
    }

    pub fn current_state_key(&self) -> &str {
        self.template.states.entry_at(self.current).0
    }

    pub fn current_state(&self) -> &DialogueState {
        self.template.states.entry_at(self.current).1
    }

    pub fn current_illustrations(&self) -> &[String] {
        &self.current_state().illustrations
    }

    /// The entry action of the template's start state, for the host to run
    /// when a dialogue begins.
    pub fn start_action(&self) -> Option<&DialogueAction> {
        self.template
            .states
            .get(self.template.start())
            .and_then(|s| s.action.as_ref())
    }

    pub fn resume_point(&self) -> ResumePoint {
        ResumePoint {
            dialogue_id: self.id.clone(),
            state_key: self.current_state_key().to_string(),
        }
    }

    /// Text of the current state, rolled once per visit.
    pub fn current_text(&mut self) -> &str {
        let stale = self
            .rolled
            .as_ref()
            .map_or(true, |rolled| rolled.state != self.current);
        if stale {
            let variant = self.roll_text();
            self.rolled = Some(RolledText {
                state: self.current,
                variant,
            });
        }

        let variant = self.rolled.as_ref().and_then(|r| r.variant);
        variant
            .and_then(|i| self.current_state().texts.get(i))
            .map_or("", |t| t.text.as_str())
    }

    fn roll_text(&mut self) -> Option<usize> {
        let template = Arc::clone(&self.template);
        let texts = &template.states.entry_at(self.current).1.texts;
        match texts.len() {
            0 => None,
            1 => Some(0),
            len => {
                let weights = texts.iter().map(|t| t.weight);
                match WeightedIndex::new(weights) {
                    Ok(dist) => Some(dist.sample(&mut self.rng)),
                    // every weight is zero
                    Err(_) => Some(self.rng.gen_range(0..len)),
                }
            }
        }
    }

    /// Choices to present for the current state.
    pub fn available_choices(&self) -> &[AvailableChoice] {
        &self.available
    }

    /// For `ASK_CONFIRMATION` states, the confirm and deny choices: the
    /// state's choices 0 and 1. `None` if either is not shown.
    pub fn confirmation_choices(&self) -> Option<(&AvailableChoice, &AvailableChoice)> {
        if self.current_state().outcome != Outcome::AskConfirmation {
            return None;
        }
        let shown = |index| self.available.iter().find(|c| c.choice == ChoiceRef::Real(index));
        Some((shown(0)?, shown(1)?))
    }

    /// Last known availability of a choice of the current state.
    pub fn is_available(&self, choice: usize) -> bool {
        self.availability.get(self.current_state_key(), choice)
    }

    pub fn has_conditions(&self) -> bool {
        !self.availability.is_empty()
    }

    /// Re-evaluate every condition of the template.
    ///
    /// Returns the entries whose value changed. Nothing is updated if any
    /// predicate cannot be evaluated.
    pub fn evaluate<C, E>(
        &mut self,
        evaluator: &E,
        context: &C,
    ) -> Result<AvailabilityDelta, MachineError>
    where
        C: ?Sized,
        E: ConditionEvaluator<C> + ?Sized,
    {
        self.require_role(MachineRole::Authoritative, "evaluate")?;

        let mut results = Vec::new();
        for (key, state) in self.template.states.iter() {
            for (index, choice) in state.choices.iter().enumerate() {
                let Some(condition) = &choice.condition else {
                    continue;
                };
                let available = evaluator
                    .evaluate(&condition.predicate, context)
                    .map_err(|source| MachineError::ConditionLookup {
                        state: key.to_string(),
                        choice: index,
                        source,
                    })?;
                results.push((key, index, available));
            }
        }

        let mut delta = AvailabilityDelta::new();
        for (key, index, available) in results {
            if self.availability.set(key, index, available) {
                delta.insert(key, index as u32, available);
            }
        }

        if !delta.is_empty() {
            debug!(
                dialogue = %self.id,
                changed = delta.len(),
                "choice availability changed"
            );
            self.rebuild_available();
        }
        Ok(delta)
    }

    /// Apply a delta produced by the authoritative machine. Idempotent.
    pub fn apply_delta(&mut self, delta: &AvailabilityDelta) -> Result<(), MachineError> {
        self.require_role(MachineRole::Mirror, "apply_delta")?;
        if let Some((state, choice)) = self.availability.find_untracked(delta) {
            return Err(MachineError::UntrackedCondition {
                state: state.to_string(),
                choice,
            });
        }
        if self.availability.merge(delta) {
            self.rebuild_available();
        }
        Ok(())
    }

    /// Every tracked condition result, for the first sync of a new mirror.
    pub fn full_snapshot(&self) -> AvailabilityDelta {
        self.availability.snapshot()
    }

    /// Pick a choice of the current state and move to its destination.
    ///
    /// Returns the outcome declared by the new state. The machine is left
    /// untouched when the choice is refused.
    pub fn choose<A>(&mut self, choice: ChoiceRef, runner: &mut A) -> Result<Outcome, MachineError>
    where
        A: ActionRunner + ?Sized,
    {
        let index = match choice {
            ChoiceRef::EscapeHatch => {
                if self.available.last().map(|c| c.choice) != Some(ChoiceRef::EscapeHatch) {
                    return Err(self.invalid(choice, InvalidChoice::EscapeHatchNotOffered));
                }
                warn!(
                    dialogue = %self.id,
                    state = %self.current_state_key(),
                    "escape hatch used"
                );
                return Ok(Outcome::EndDialogue);
            }
            ChoiceRef::Real(index) => index,
        };

        self.validate_choice(index)?;

        let template = Arc::clone(&self.template);
        let next = template.states.entry_at(self.current).1.choices[index].next.as_str();
        let position = template
            .states
            .position(next)
            .ok_or_else(|| UnknownStateError(next.to_string()))?;

        debug!(
            dialogue = %self.id,
            from = %self.current_state_key(),
            to = %next,
            choice = index,
            "dialogue transition"
        );
        self.enter(position);

        let state = template.states.entry_at(position).1;
        if let Some(action) = &state.action {
            runner.run(action);
        }
        Ok(state.outcome.clone())
    }

    fn validate_choice(&self, index: usize) -> Result<(), MachineError> {
        let state = self.current_state();
        let count = state.choices.len();
        if index >= count {
            return Err(self.invalid(ChoiceRef::Real(index), InvalidChoice::OutOfRange { index, count }));
        }
        if !self.is_available(index) {
            let predicate = state.choices[index]
                .condition
                .as_ref()
                .map(|c| c.predicate.clone())
                .unwrap_or_else(|| PredicateId(String::new()));
            return Err(self.invalid(
                ChoiceRef::Real(index),
                InvalidChoice::Unavailable { index, predicate },
            ));
        }
        Ok(())
    }

    fn invalid(&self, choice: ChoiceRef, reason: InvalidChoice) -> MachineError {
        MachineError::InvalidChoice {
            state: self.current_state_key().to_string(),
            choice,
            reason,
        }
    }

    /// Jump to `key`, e.g. to resynchronise a mirror after a rejected choice.
    ///
    /// Selecting the current state is a no-op and keeps the rolled text.
    pub fn select_state(&mut self, key: &str) -> Result<&DialogueState, MachineError> {
        let position = self
            .template
            .states
            .position(key)
            .ok_or_else(|| UnknownStateError(key.to_string()))?;
        if position != self.current {
            self.enter(position);
        }
        Ok(self.current_state())
    }

    fn enter(&mut self, position: usize) {
        self.current = position;
        self.rolled = None;
        self.rebuild_available();
    }

    fn require_role(&self, role: MachineRole, operation: &'static str) -> Result<(), MachineError> {
        if self.role != role {
            return Err(MachineError::WrongRole {
                role: self.role,
                operation,
            });
        }
        Ok(())
    }

    fn rebuild_available(&mut self) {
        let (key, state) = self.template.states.entry_at(self.current);
        let mut view = Vec::with_capacity(state.choices.len() + 1);
        let mut any_available = false;

        for (index, choice) in state.choices.iter().enumerate() {
            let available = self.availability.get(key, index);
            any_available |= available;

            let locked_message = if available {
                None
            } else {
                match choice.condition.as_ref().map(|c| &c.when_unavailable) {
                    Some(action) if action.display == UnavailableDisplay::GrayedOut => Some(
                        action
                            .message
                            .clone()
                            .unwrap_or_else(|| DEFAULT_LOCKED_MESSAGE.to_string()),
                    ),
                    _ => continue,
                }
            };

            view.push(AvailableChoice {
                choice: ChoiceRef::Real(index),
                text: choice.text.clone(),
                illustrations: choice.illustrations.clone(),
                locked_message,
            });
        }

        // Terminal states without choices are meant to have none.
        if !any_available && !(state.choices.is_empty() && state.outcome.is_terminal()) {
            warn!(
                dialogue = %self.id,
                state = %key,
                choices = state.choices.len(),
                "no choice available, offering escape hatch"
            );
            view.push(AvailableChoice::escape_hatch());
        }

        self.available = view;
    }
}

impl<R> fmt::Debug for DialogueStateMachine<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialogueStateMachine")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("current", &self.template.states.entry_at(self.current).0)
            .field("availability", &self.availability)
            .finish_non_exhaustive()
    }
}
