//! CLI command modules.

pub mod artifact;
pub mod config;
pub mod plan;
pub mod upload;
