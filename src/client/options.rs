//! Request parameters and their query-string encoding.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::client::ClientError;
use crate::defaults;

/// How the engine treats `Resource.id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceIdRule {
    Optional,
    Required,
    Prohibited,
}

impl ResourceIdRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Optional => "optional",
            Self::Required => "required",
            Self::Prohibited => "prohibited",
        }
    }
}

/// Severity used for best-practice recommendations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BestPracticeLevel {
    Ignore,
    Hint,
    Warning,
    Error,
}

impl BestPracticeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore => "Ignore",
            Self::Hint => "Hint",
            Self::Warning => "Warning",
            Self::Error => "Error",
        }
    }
}

/// How strictly `Coding.display` is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayOption {
    Ignore,
    Check,
    CheckCaseAndSpace,
    CheckCase,
    CheckSpace,
}

impl DisplayOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore => "Ignore",
            Self::Check => "Check",
            Self::CheckCaseAndSpace => "CheckCaseAndSpace",
            Self::CheckCase => "CheckCase",
            Self::CheckSpace => "CheckSpace",
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(ResourceIdRule, BestPracticeLevel, DisplayOption);

/// Options for a single validation request. Unset options are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOptions {
    /// Profile canonical URLs to validate against
    #[serde(default)]
    pub profiles: BTreeSet<String>,
    #[serde(default)]
    pub resource_id_rule: Option<ResourceIdRule>,
    #[serde(default)]
    pub any_extensions_allowed: Option<bool>,
    #[serde(default)]
    pub bp_warnings: Option<BestPracticeLevel>,
    #[serde(default)]
    pub display_option: Option<DisplayOption>,
}

impl ValidationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profiles.insert(profile.into());
        self
    }

    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if !self.profiles.is_empty() {
            let joined: Vec<&str> = self.profiles.iter().map(String::as_str).collect();
            query.push(("profiles", joined.join(defaults::PROFILE_DELIMITER)));
        }
        if let Some(rule) = self.resource_id_rule {
            query.push(("resourceIdRule", rule.to_string()));
        }
        if let Some(allowed) = self.any_extensions_allowed {
            query.push(("anyExtensionsAllowed", allowed.to_string()));
        }
        if let Some(level) = self.bp_warnings {
            query.push(("bpWarnings", level.to_string()));
        }
        if let Some(display) = self.display_option {
            query.push(("displayOption", display.to_string()));
        }
        query
    }
}

/// Parameters of a terminology test-suite case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TxTestParams {
    /// Terminology server under test
    pub server: String,
    pub suite_name: String,
    pub test_name: String,
    /// FHIR version of the suite
    pub version: String,
    pub external_file: Option<String>,
    pub modes: Option<String>,
}

impl TxTestParams {
    pub fn new(
        server: impl Into<String>,
        suite_name: impl Into<String>,
        test_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            suite_name: suite_name.into(),
            test_name: test_name.into(),
            version: version.into(),
            external_file: None,
            modes: None,
        }
    }

    /// Reject the first blank required field.
    pub fn validate(&self) -> Result<(), ClientError> {
        let required = [
            ("server", &self.server),
            ("suiteName", &self.suite_name),
            ("testName", &self.test_name),
            ("version", &self.version),
        ];
        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(ClientError::MissingParameter(*name)),
            None => Ok(()),
        }
    }

    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("server", self.server.clone()),
            ("suite", self.suite_name.clone()),
            ("test", self.test_name.clone()),
            ("version", self.version.clone()),
        ];
        if let Some(file) = &self.external_file {
            query.push(("externalFile", file.clone()));
        }
        if let Some(modes) = &self.modes {
            query.push(("modes", modes.clone()));
        }
        query
    }
}
