//! Dialogue Engine: branching, condition-gated dialogue for games.
//!
//! Authored dialogue graphs are loaded from RON or JSON, checked by a
//! structural validator, and walked at runtime by a state machine that
//! keeps an authoritative copy and its mirrors in sync through small
//! availability deltas.

pub mod core;
pub mod schema;
