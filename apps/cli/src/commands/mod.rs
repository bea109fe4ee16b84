//! Command implementations for the Verdant CLI.

pub mod convert;
pub mod pipeline;
