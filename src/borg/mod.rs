// src/borg/mod.rs

//! Everything that knows about the `borg` command line.
//!
//! - [`command`] builds argument vectors and environment overlays.
//! - [`output`] holds typed views of borg's JSON output.
//! - [`client`] runs repository-level operations through a
//!   [`ProcessRunner`](crate::exec::ProcessRunner).

pub mod client;
pub mod command;
pub mod output;

pub use client::BorgClient;
pub use command::{BorgCommand, CommandBuilder, CreateOptions};
