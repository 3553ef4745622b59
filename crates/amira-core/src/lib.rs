//! amira-core: shared journal types, configuration schema, and error types

pub mod config;
pub mod error;
pub mod types;

pub use error::{AmiraError, AmiraResult};
