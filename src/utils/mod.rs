//! The `utils` module provides shared error and logging definitions used
//! across the session components.

pub mod error;
pub mod logging;
