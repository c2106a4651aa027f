//! Service configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::engine::lifecycle::LifecycleError;

/// Input to [`ValidatorService::start`](crate::ValidatorService::start).
///
/// `version`, `tx_server` and `tx_log` are required; they are optional here
/// only so that a partially filled config can be deserialized and rejected
/// with a configuration error instead of a parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// FHIR version passed to the engine (e.g. `4.0.1`)
    #[serde(default)]
    pub version: Option<String>,
    /// Terminology server URL
    #[serde(default)]
    pub tx_server: Option<String>,
    /// Path of the terminology transaction log
    #[serde(default)]
    pub tx_log: Option<PathBuf>,
    /// Implementation Guide package identifiers to load at startup
    #[serde(default)]
    pub igs: Vec<String>,
    /// Local port the engine listens on
    #[serde(default = "defaults::port")]
    pub port: u16,
    /// Readiness timeout in milliseconds
    #[serde(default = "defaults::startup_timeout_ms")]
    pub timeout: u64,
    #[serde(default = "defaults::auto_download")]
    pub auto_download: bool,
    #[serde(default)]
    pub skip_update_check: bool,
    /// Java launcher
    #[serde(default = "defaults::java")]
    pub java: String,
    /// Extra JVM arguments placed before `-jar`
    #[serde(default)]
    pub jvm_args: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            version: None,
            tx_server: None,
            tx_log: None,
            igs: Vec::new(),
            port: defaults::PORT,
            timeout: defaults::STARTUP_TIMEOUT_MS,
            auto_download: true,
            skip_update_check: false,
            java: defaults::JAVA.to_string(),
            jvm_args: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Config with the three required fields set and everything else defaulted.
    pub fn new(
        version: impl Into<String>,
        tx_server: impl Into<String>,
        tx_log: impl Into<PathBuf>,
    ) -> Self {
        Self {
            version: Some(version.into()),
            tx_server: Some(tx_server.into()),
            tx_log: Some(tx_log.into()),
            ..Default::default()
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Check required fields. Runs before any I/O.
    pub fn validate(&self) -> Result<(), LifecycleError> {
        let mut missing = Vec::new();
        if self.version.as_deref().map_or(true, |v| v.trim().is_empty()) {
            missing.push("version");
        }
        if self.tx_server.as_deref().map_or(true, |v| v.trim().is_empty()) {
            missing.push("txServer");
        }
        if self
            .tx_log
            .as_ref()
            .map_or(true, |p| p.as_os_str().is_empty())
        {
            missing.push("txLog");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::InvalidConfig(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: ServiceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.timeout, 30_000);
        assert!(config.auto_download);
        assert!(!config.skip_update_check);
        assert_eq!(config.java, "java");
        assert!(config.igs.is_empty());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_camel_case_fields() {
        let config: ServiceConfig = serde_json::from_str(
            r#"{
                "version": "4.0.1",
                "txServer": "http://tx.fhir.org/r4",
                "txLog": "/tmp/tx.log",
                "igs": ["hl7.fhir.us.core#6.1.0"],
                "port": 9090,
                "autoDownload": false,
                "skipUpdateCheck": true
            }"#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.port, 9090);
        assert!(!config.auto_download);
        assert!(config.skip_update_check);
        assert_eq!(config.igs, vec!["hl7.fhir.us.core#6.1.0"]);
    }

    #[test]
    fn test_validate_names_every_missing_field() {
        let err = ServiceConfig::default().validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("version"));
        assert!(message.contains("txServer"));
        assert!(message.contains("txLog"));
    }

    #[test]
    fn test_blank_values_are_missing() {
        let config = ServiceConfig::new("  ", "http://tx.fhir.org", "/tmp/tx.log");
        assert!(matches!(
            config.validate(),
            Err(LifecycleError::InvalidConfig(msg)) if msg.contains("version")
        ));
    }

    #[test]
    fn test_startup_timeout() {
        let config = ServiceConfig {
            timeout: 1500,
            ..Default::default()
        };
        assert_eq!(config.startup_timeout(), Duration::from_millis(1500));
    }
}
