//! Availability cache: last-known results of every conditioned choice.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::schema::template::DialogueTemplate;

/// Changed availability entries, keyed by state then choice index.
///
/// An empty delta means nothing needs to be sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AvailabilityDelta(BTreeMap<String, BTreeMap<u32, bool>>);

impl AvailabilityDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state: impl Into<String>, choice: u32, available: bool) {
        self.0.entry(state.into()).or_default().insert(choice, available);
    }

    pub fn get(&self, state: &str, choice: u32) -> Option<bool> {
        self.0.get(state)?.get(&choice).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }

    /// Number of choice entries across all states.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn states(&self) -> impl Iterator<Item = (&str, &BTreeMap<u32, bool>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32, bool)> {
        self.0
            .iter()
            .flat_map(|(state, choices)| choices.iter().map(move |(i, v)| (state.as_str(), *i, *v)))
    }
}

/// Per-session mapping {state → {choice index → last-evaluated result}}.
///
/// Only choices carrying a condition are tracked. Entries start out `true`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailabilityCache {
    states: FxHashMap<String, BTreeMap<usize, bool>>,
}

impl AvailabilityCache {
    /// Track every conditioned choice of `template`.
    pub fn from_template(template: &DialogueTemplate) -> Self {
        let mut states = FxHashMap::default();
        for (key, state) in template.states.iter() {
            let tracked: BTreeMap<usize, bool> = state
                .choices
                .iter()
                .enumerate()
                .filter(|(_, c)| c.is_conditional())
                .map(|(i, _)| (i, true))
                .collect();
            if !tracked.is_empty() {
                states.insert(key.to_string(), tracked);
            }
        }
        Self { states }
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn is_tracked(&self, state: &str, choice: usize) -> bool {
        self.states
            .get(state)
            .is_some_and(|choices| choices.contains_key(&choice))
    }

    /// Availability of a choice; untracked choices are always available.
    pub fn get(&self, state: &str, choice: usize) -> bool {
        self.states
            .get(state)
            .and_then(|choices| choices.get(&choice))
            .copied()
            .unwrap_or(true)
    }

    /// Store a result. Returns true if the value changed.
    ///
    /// Untracked choices are ignored.
    pub fn set(&mut self, state: &str, choice: usize, available: bool) -> bool {
        match self.states.get_mut(state).and_then(|c| c.get_mut(&choice)) {
            Some(slot) => std::mem::replace(slot, available) != available,
            None => false,
        }
    }

    /// The first delta entry this cache does not track, if any.
    pub fn find_untracked<'d>(&self, delta: &'d AvailabilityDelta) -> Option<(&'d str, u32)> {
        delta
            .iter()
            .find(|(state, choice, _)| !self.is_tracked(state, *choice as usize))
            .map(|(state, choice, _)| (state, choice))
    }

    /// Overwrite entries named in `delta`. Entries this cache does not
    /// track are skipped; check with `find_untracked` first.
    pub fn merge(&mut self, delta: &AvailabilityDelta) -> bool {
        let mut changed = false;
        for (state, choice, available) in delta.iter() {
            changed |= self.set(state, choice as usize, available);
        }
        changed
    }

    /// The whole cache as a delta against the all-`true` baseline.
    pub fn snapshot(&self) -> AvailabilityDelta {
        let mut delta = AvailabilityDelta::new();
        for (state, choices) in &self.states {
            for (&choice, &available) in choices {
                delta.insert(state.clone(), choice as u32, available);
            }
        }
        delta
    }
}
