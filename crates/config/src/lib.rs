//! Host configuration: schema, discovery, loading, env substitution.
//!
//! Config files: `roost.toml`, `roost.yaml`, `roost.yml` or `roost.json`,
//! searched in `./` then `~/.config/roost/`.
//!
//! Supports `${ENV_VAR}` substitution anywhere in the file.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{DEFAULT_EVENTS, HostConfig, RoostConfig},
};
