use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METADATA_TOPIC_KEY: &str = "org-mqtt-topic";
pub const METADATA_REQUEST_UUID_KEY: &str = "requestUuid";
pub const ZIP_CONTENT_TYPE: &str = "application/zip";
/// S3 rejects presigned PUT expiries shorter than this.
pub const MIN_PRESIGN_EXPIRE_SECS: u64 = 900;
/// Placeholder request identifier used in failure acknowledgements when the
/// staged object carried no `requestUuid` metadata.
pub const UNKNOWN_REQUEST_UUID: &str = "NotFound";

/// Upload request as published by a device on the request topic. The `topic`
/// field is injected by the broker rule that invokes the issuer, so devices
/// themselves only send `requestUuid` and `md5`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadRequest {
    pub topic: String,
    #[serde(rename = "requestUuid")]
    pub request_uuid: String,
    pub md5: String,
}

/// Issuer reply. An empty `url` with zero `expiration` signals rejection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadResponse {
    #[serde(rename = "requestUuid")]
    pub request_uuid: String,
    pub url: String,
    /// Expiration of the presigned URL in epoch milliseconds.
    pub expiration: i64,
    pub headers: BTreeMap<String, String>,
}

impl UploadResponse {
    pub fn rejection(request_uuid: impl Into<String>) -> Self {
        Self {
            request_uuid: request_uuid.into(),
            url: String::new(),
            expiration: 0,
            headers: BTreeMap::new(),
        }
    }

    pub fn is_rejection(&self) -> bool {
        self.url.is_empty()
    }
}

/// Terminal processing acknowledgement, published once per request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Acknowledgement {
    pub success: bool,
    #[serde(rename = "requestUuid")]
    pub request_uuid: String,
}

impl Acknowledgement {
    pub fn succeeded(request_uuid: impl Into<String>) -> Self {
        Self {
            success: true,
            request_uuid: request_uuid.into(),
        }
    }

    pub fn failed(request_uuid: Option<&str>) -> Self {
        Self {
            success: false,
            request_uuid: request_uuid.unwrap_or(UNKNOWN_REQUEST_UUID).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validates the inbound request payload. Missing or malformed fields are a
/// rejection, not a panic; the issuer turns the error into a negative reply.
pub fn normalize_request(event: &Value) -> Result<UploadRequest, ValidationError> {
    let Some(object) = event.as_object() else {
        return Err(ValidationError::new("Request payload must be a JSON object"));
    };

    let missing: Vec<&str> = ["topic", "requestUuid", "md5"]
        .into_iter()
        .filter(|key| !object.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::new(format!(
            "Request payload is missing required key(s): {}",
            missing.join(", ")
        )));
    }

    let request: UploadRequest = serde_json::from_value(event.clone())
        .map_err(|error| ValidationError::new(format!("Malformed request payload: {error}")))?;

    if request.topic.trim().is_empty() {
        return Err(ValidationError::new("topic cannot be empty"));
    }
    if request.request_uuid.trim().is_empty() {
        return Err(ValidationError::new("requestUuid cannot be empty"));
    }
    if request.md5.trim().is_empty() {
        return Err(ValidationError::new("md5 cannot be empty"));
    }

    Ok(request)
}
