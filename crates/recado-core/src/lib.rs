//! Shared foundation for the recado workspace: configuration, errors,
//! identifier newtypes, and token-budget estimation.

pub mod config;
pub mod error;
pub mod types;

pub use config::RecadoConfig;
pub use error::{RecadoError, Result};
