//! Core types for the Aerogate airspace authorization toolkit.
//!
//! Leaf crate shared by the SDK and the CLI tools: the `Outcome`
//! result type used by every asynchronous operation, the error
//! taxonomy, and the domain models the flight workflow consumes.

pub mod error;
pub mod models;
pub mod outcome;

pub use error::Error;
pub use outcome::{Callback, Outcome};
