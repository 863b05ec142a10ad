//! Shared error types and the priority event bus used across all roost crates.

pub mod error;
pub mod events;

pub use error::{Error, FromMessage, Result};
