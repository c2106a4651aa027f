//! HTTP client for a running validator engine.
//!
//! Encodes validation, IG-load and terminology-test requests for the engine's
//! local HTTP listener and decodes the OperationOutcome it answers with.

mod options;
mod outcome;

use std::sync::Arc;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde_json::Value;
use thiserror::Error;

use crate::defaults;

pub use options::{BestPracticeLevel, DisplayOption, ResourceIdRule, TxTestParams, ValidationOptions};
pub use outcome::{
    classify_tx_test, CodeableConcept, Issue, IssueSeverity, OperationOutcome, TxTestOutcome,
    OPERATION_OUTCOME,
};

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Validator is not running")]
    NotReady,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unparseable response from validator ({reason}): {body}")]
    ResponseFormat { reason: String, body: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Where requests go, and whether they may go there yet.
pub trait EngineEndpoint: Send + Sync {
    /// Base URL of the engine if it is ready to take requests.
    fn ready_base_url(&self) -> Option<String>;
}

/// An engine managed outside this process. Always considered ready.
#[derive(Debug, Clone)]
pub struct RemoteEngine {
    base_url: String,
}

impl RemoteEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl EngineEndpoint for RemoteEngine {
    fn ready_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}

/// Body encoding of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceFormat {
    Json,
    Xml,
}

impl ResourceFormat {
    /// XML if the first non-whitespace character is `<`, JSON otherwise.
    pub fn sniff(content: &[u8]) -> Self {
        let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
        match content.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'<') => Self::Xml,
            _ => Self::Json,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/fhir+json",
            Self::Xml => "application/fhir+xml",
        }
    }
}

/// A resource to validate, in whatever form the caller holds it.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Bytes(Vec<u8>),
    Text(String),
    /// Always sent as JSON
    Json(Value),
}

impl Resource {
    fn into_body(self) -> Result<(Vec<u8>, ResourceFormat)> {
        match self {
            Resource::Bytes(bytes) => {
                let format = ResourceFormat::sniff(&bytes);
                Ok((bytes, format))
            }
            Resource::Text(text) => {
                let format = ResourceFormat::sniff(text.as_bytes());
                Ok((text.into_bytes(), format))
            }
            Resource::Json(value) => serde_json::to_vec(&value)
                .map(|bytes| (bytes, ResourceFormat::Json))
                .map_err(|e| ClientError::InvalidInput(e.to_string())),
        }
    }
}

impl From<Vec<u8>> for Resource {
    fn from(bytes: Vec<u8>) -> Self {
        Resource::Bytes(bytes)
    }
}

impl From<&[u8]> for Resource {
    fn from(bytes: &[u8]) -> Self {
        Resource::Bytes(bytes.to_vec())
    }
}

impl From<String> for Resource {
    fn from(text: String) -> Self {
        Resource::Text(text)
    }
}

impl From<&str> for Resource {
    fn from(text: &str) -> Self {
        Resource::Text(text.to_string())
    }
}

impl From<Value> for Resource {
    fn from(value: Value) -> Self {
        Resource::Json(value)
    }
}

/// Client for the engine's validation endpoints.
///
/// Cheap to clone. Requests may be issued concurrently; nothing is queued on
/// this side.
#[derive(Clone)]
pub struct ValidatorClient {
    http: Client,
    endpoint: Arc<dyn EngineEndpoint>,
}

impl ValidatorClient {
    pub fn new(endpoint: Arc<dyn EngineEndpoint>) -> Self {
        Self {
            http: Client::new(),
            endpoint,
        }
    }

    /// Client for an engine already listening at `base_url`.
    pub fn remote(base_url: impl Into<String>) -> Self {
        Self::new(Arc::new(RemoteEngine::new(base_url)))
    }

    fn base_url(&self) -> Result<String> {
        self.endpoint.ready_base_url().ok_or(ClientError::NotReady)
    }

    /// Validate a resource.
    pub async fn validate(
        &self,
        resource: impl Into<Resource>,
        options: &ValidationOptions,
    ) -> Result<OperationOutcome> {
        let base_url = self.base_url()?;
        let (body, format) = resource.into().into_body()?;

        log::debug!("Validating {} byte {:?} resource", body.len(), format);

        let response = self
            .http
            .post(format!("{}/validateResource", base_url))
            .query(&options.to_query())
            .header(CONTENT_TYPE, format.content_type())
            .header(ACCEPT, "application/fhir+json")
            .body(body)
            .timeout(defaults::VALIDATE_TIMEOUT)
            .send()
            .await
            .map_err(request_error)?;

        read_outcome(response).await
    }

    /// Validate a raw byte buffer. Empty buffers are rejected up front.
    pub async fn validate_bytes(
        &self,
        bytes: &[u8],
        options: &ValidationOptions,
    ) -> Result<OperationOutcome> {
        if bytes.is_empty() {
            return Err(ClientError::InvalidInput("resource buffer is empty".into()));
        }
        self.validate(bytes, options).await
    }

    /// Validate a JSON object. Anything other than an object is rejected up
    /// front.
    pub async fn validate_object(
        &self,
        object: &Value,
        options: &ValidationOptions,
    ) -> Result<OperationOutcome> {
        if !object.is_object() {
            return Err(ClientError::InvalidInput(format!(
                "expected a JSON object, got {}",
                json_kind(object)
            )));
        }
        self.validate(object.clone(), options).await
    }

    /// Load an Implementation Guide package into the running engine.
    pub async fn load_ig(&self, package_id: &str, version: &str) -> Result<OperationOutcome> {
        let base_url = self.base_url()?;
        if package_id.trim().is_empty() {
            return Err(ClientError::MissingParameter("packageId"));
        }
        if version.trim().is_empty() {
            return Err(ClientError::MissingParameter("version"));
        }

        log::info!("Loading IG {}#{}", package_id, version);

        let response = self
            .http
            .post(format!("{}/loadIG", base_url))
            .query(&[("packageId", package_id), ("version", version)])
            .header(ACCEPT, "application/fhir+json")
            .timeout(defaults::LOAD_IG_TIMEOUT)
            .send()
            .await
            .map_err(request_error)?;

        read_outcome(response).await
    }

    /// Run one terminology test case.
    ///
    /// Only a not-ready engine or missing parameters produce an `Err`; every
    /// transport or response problem becomes a failed [`TxTestOutcome`].
    pub async fn run_tx_test(&self, params: &TxTestParams) -> Result<TxTestOutcome> {
        let base_url = self.base_url()?;
        params.validate()?;

        let response = match self
            .http
            .get(format!("{}/txTest", base_url))
            .query(&params.to_query())
            .header(ACCEPT, "application/fhir+json")
            .timeout(defaults::TX_TEST_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Ok(TxTestOutcome::failed(describe_transport_error(&e))),
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => Ok(classify_tx_test(status, &body)),
            Err(e) => Ok(TxTestOutcome::failed(describe_transport_error(&e))),
        }
    }
}

async fn read_outcome(response: Response) -> Result<OperationOutcome> {
    let status = response.status();
    let body = response.text().await.map_err(request_error)?;

    match serde_json::from_str::<OperationOutcome>(&body) {
        Ok(outcome) => Ok(outcome),
        Err(_) if !status.is_success() => {
            Err(ClientError::Request(format!("HTTP {}: {}", status, body)))
        }
        Err(e) => Err(ClientError::ResponseFormat {
            reason: e.to_string(),
            body,
        }),
    }
}

fn request_error(e: reqwest::Error) -> ClientError {
    ClientError::Request(describe_transport_error(&e))
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {}", e)
    } else if e.is_connect() {
        format!("could not connect to validator: {}", e)
    } else {
        e.to_string()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
