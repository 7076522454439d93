// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`runner`] spawns child processes with `tokio::process::Command`,
//!   enforces per-call timeouts and captures output. The [`ProcessRunner`]
//!   trait is the seam tests use to substitute a fake.
//! - [`decode`] interprets captured stdout as a JSON document or JSON lines.

pub mod decode;
pub mod runner;

pub use decode::{Decoded, OutputMode};
pub use runner::{
    CommandOutput, CommandSpec, ProcessRunner, TokioProcessRunner, format_duration, run_command,
};
