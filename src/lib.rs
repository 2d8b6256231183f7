pub mod output_kind;
pub mod error;
pub mod config;
pub mod flutter_integration;
pub mod artifact_discovery;
pub mod env_export;
pub mod export;
pub mod manifest;
pub mod cache;
pub mod signing;
pub mod cli;

pub use error::{Error, Result};
