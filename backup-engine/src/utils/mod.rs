//! Utility modules for the backup engine.

pub mod compress;
pub mod errors;
pub mod logger;

pub use errors::{EngineError, Result, ToolError, ValidationError};
