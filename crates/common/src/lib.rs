//! Shared types for the course picker workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
