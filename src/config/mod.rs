// src/config/mod.rs

//! Configuration loading and validation for borgsched.
//!
//! - `model.rs`: the TOML-backed raw model and the validated `ConfigFile`.
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: `TryFrom<RawConfigFile> for ConfigFile`.
//! - `duration.rs`: `"30s"` / `"5m"` style durations.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{config_root_dir, default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, JobConfig, RawConfigFile, RawSettings, RepositoryConfig, Settings};
