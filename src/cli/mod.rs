//! Command handlers for the wallet binary

pub mod commands;

pub use commands::*;
