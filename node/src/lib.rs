//! Node runtime for the stakesim framework.
//!
//! Everything around the consensus engine that makes a node a process:
//! the YAML settings file, chain persistence, the interactive command
//! surface, and the task wiring that connects the engine to the relay.

pub mod persist;
pub mod repl;
pub mod service;
pub mod settings;
