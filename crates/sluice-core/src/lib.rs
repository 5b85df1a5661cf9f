//! Sluice Core
//!
//! Core domain types, traits, and error handling for the Sluice pipeline
//! engine. This crate has minimal dependencies and defines the shared
//! vocabulary used across all other crates.

pub mod change;
pub mod config;
pub mod error;
pub mod glob;
pub mod ids;
pub mod job;
pub mod ports;
pub mod run;

pub use error::{ConfigError, Error, PlanError, Result};
pub use ids::*;
