//! Shared helpers for bridge binaries.

pub mod bootstrap;
