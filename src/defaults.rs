//! Default values for service configuration and fixed protocol bounds.

use std::time::Duration;

pub const PORT: u16 = 8080;
pub const STARTUP_TIMEOUT_MS: u64 = 30_000;
pub const JAVA: &str = "java";

pub fn port() -> u16 { PORT }
pub fn startup_timeout_ms() -> u64 { STARTUP_TIMEOUT_MS }
pub fn auto_download() -> bool { true }
pub fn java() -> String { JAVA.to_string() }

pub const RELEASE_INDEX_URL: &str =
    "https://api.github.com/repos/hapifhir/org.hl7.fhir.core/releases/latest";
pub const ARTIFACT_NAME: &str = "validator_cli.jar";
pub const VERSION_SIDECAR_SUFFIX: &str = ".version.json";
pub const ARTIFACT_PATH_ENV: &str = "FHIR_VALIDATOR_JAR";

pub const MAX_REDIRECTS: usize = 5;
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

pub const PROBE_INTERVAL: Duration = Duration::from_secs(1);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub const VALIDATE_TIMEOUT: Duration = Duration::from_secs(30);
pub const LOAD_IG_TIMEOUT: Duration = Duration::from_secs(120);
pub const TX_TEST_TIMEOUT: Duration = Duration::from_secs(60);

pub const PROFILE_DELIMITER: &str = ",";
