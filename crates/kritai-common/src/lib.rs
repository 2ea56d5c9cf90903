//! Common types, errors, and utilities for Kritai services.

pub mod error;
pub mod types;

pub use error::{GradeError, GradeResult};
pub use types::*;
