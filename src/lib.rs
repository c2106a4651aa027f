//! fhir-validator - Rust client for the HL7 FHIR validator engine.
//!
//! Downloads the validator artifact, runs it as a local HTTP service and
//! validates resources against it.

mod defaults;
pub mod error;

pub mod client;
pub mod config;
pub mod engine;
pub mod logging;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};

pub use config::ServiceConfig;
pub use logging::{ConsoleSink, LogSink};

pub use engine::fetch::{
    DownloadProgress, EnsureOptions, EnsureOutcome, FetchError, ReleaseInfo, ValidatorFetcher,
    VersionRecord,
};
pub use engine::lifecycle::{EngineState, LifecycleError, ValidatorService};

pub use client::{
    BestPracticeLevel, ClientError, DisplayOption, EngineEndpoint, Issue, IssueSeverity,
    OperationOutcome, RemoteEngine, Resource, ResourceFormat, ResourceIdRule, TxTestOutcome,
    TxTestParams, ValidationOptions, ValidatorClient,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
