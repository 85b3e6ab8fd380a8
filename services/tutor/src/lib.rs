//! Lecture Tutor Terminal Library Crate
//!
//! This library holds the configuration, shared state and REPL of the `tutor`
//! binary. The binary itself is a thin wrapper that wires a gateway into a
//! session controller and hands both to the REPL.

pub mod config;
pub mod repl;
pub mod state;
