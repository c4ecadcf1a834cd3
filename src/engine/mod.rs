//! Execution engine for groundwork
//!
//! The engine wires the declarative crate to the terminal:
//! 1. Display - Render change sets and apply reports
//! 2. Executing - Progress bar, confirmation prompt and Ctrl+C handling

pub mod display;
pub mod executor;

pub use display::{display_changeset, display_outputs, display_report};
pub use executor::{ExecuteRequest, execute};
