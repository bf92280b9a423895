//! Runtime: condition evaluation, availability tracking, the state machine,
//! structural validation, wire sync, and the template library.

pub mod availability;
pub mod condition;
pub mod library;
pub mod machine;
pub mod sync;
pub mod validation;
