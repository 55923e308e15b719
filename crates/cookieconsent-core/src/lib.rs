//! Cookieconsent Core - domain types, settings, and error handling

pub mod error;
pub mod settings;
pub mod types;

pub use error::{Error, Result};
pub use settings::*;
pub use types::*;
