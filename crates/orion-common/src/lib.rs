//! orion-common: shared error type used across the Orion crates.

pub mod error;

pub use error::{OrionError, Result};
