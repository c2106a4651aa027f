//! Validator engine management.
//!
//! This module provides:
//! - Artifact lookup, download and installation (`fetch`)
//! - Process lifecycle management (`lifecycle`)
//! - Readiness probing (`readiness`)
//! - Low-level process signalling (`process`)

pub mod fetch;
pub mod lifecycle;
pub mod process;
pub mod readiness;

pub use fetch::{FetchError, ValidatorFetcher};
pub use lifecycle::{EngineState, LifecycleError, ValidatorService};
