//! Execution engine for strata
//!
//! The engine wires the declarative crate to the terminal:
//! 1. Display - render plans and attribute diffs
//! 2. Executing - confirm, apply with a progress bar, summarize failures

pub mod differ;
pub mod executor;

pub use differ::display_plan;
pub use executor::{RunOptions, converge};
