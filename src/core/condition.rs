//! Host collaborators: predicate evaluation and entry actions.
//!
//! The engine never interprets predicates or actions. It only decides when
//! to call them and what to do with the answers.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::schema::choice::PredicateId;
use crate::schema::state::DialogueAction;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("unknown predicate '{0}'")]
    UnknownPredicate(PredicateId),
    #[error("predicate '{predicate}' failed: {reason}")]
    Failed { predicate: PredicateId, reason: String },
}

/// Evaluates predicates against a host-defined context.
///
/// `C` is whatever the host needs to answer a predicate (a player, a world
/// snapshot, ...). The engine passes it through untouched.
pub trait ConditionEvaluator<C: ?Sized> {
    fn evaluate(&self, predicate: &PredicateId, context: &C) -> Result<bool, ConditionError>;
}

impl<C, F> ConditionEvaluator<C> for F
where
    C: ?Sized,
    F: Fn(&PredicateId, &C) -> Result<bool, ConditionError>,
{
    fn evaluate(&self, predicate: &PredicateId, context: &C) -> Result<bool, ConditionError> {
        self(predicate, context)
    }
}

type Predicate<C> = Box<dyn Fn(&C) -> bool + Send + Sync>;

/// A registry of named predicates, handed to the state machine at
/// evaluation time.
pub struct PredicateTable<C: ?Sized> {
    predicates: FxHashMap<PredicateId, Predicate<C>>,
}

impl<C: ?Sized> Default for PredicateTable<C> {
    fn default() -> Self {
        Self {
            predicates: FxHashMap::default(),
        }
    }
}

impl<C: ?Sized> PredicateTable<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, id: impl Into<String>, predicate: F)
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.predicates
            .insert(PredicateId(id.into()), Box::new(predicate));
    }

    pub fn with<F>(mut self, id: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.register(id, predicate);
        self
    }

    pub fn contains(&self, id: &PredicateId) -> bool {
        self.predicates.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl<C: ?Sized> ConditionEvaluator<C> for PredicateTable<C> {
    fn evaluate(&self, predicate: &PredicateId, context: &C) -> Result<bool, ConditionError> {
        let test = self
            .predicates
            .get(predicate)
            .ok_or_else(|| ConditionError::UnknownPredicate(predicate.clone()))?;
        Ok(test(context))
    }
}

/// Runs the entry action of a state. Fire-and-forget from the engine's
/// point of view.
pub trait ActionRunner {
    fn run(&mut self, action: &DialogueAction);
}

/// Ignores every action.
impl ActionRunner for () {
    fn run(&mut self, _action: &DialogueAction) {}
}

impl<F> ActionRunner for F
where
    F: FnMut(&DialogueAction),
{
    fn run(&mut self, action: &DialogueAction) {
        self(action)
    }
}
