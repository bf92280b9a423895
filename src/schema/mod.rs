//! Authored dialogue data: templates, states, and choices.

pub mod choice;
pub mod state;
pub mod template;
