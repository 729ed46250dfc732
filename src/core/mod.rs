//! Core types and errors shared across the connectivity stack

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
