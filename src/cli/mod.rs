//! CLI module - command-line interface
//!
//! Contains the REPL, its session state, and command parsing.

pub mod commands;
pub mod repl;

pub use repl::{Repl, Session};
