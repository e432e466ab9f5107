//! CLI command implementations.
//!
//! Each submodule keeps formatting pure and does IO only in its `run`
//! entry point.

pub mod close;
pub mod delete;
pub mod open;
pub mod serve;
pub mod status;
