use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::adapters::publisher::MessagePublisher;
use crate::adapters::signer::{PresignPutRequest, UploadUrlSigner};
use crate::runtime::checksum::md5_hex_to_base64;
use crate::runtime::contract::{
    normalize_request, UploadResponse, METADATA_REQUEST_UUID_KEY, METADATA_TOPIC_KEY,
    MIN_PRESIGN_EXPIRE_SECS, ZIP_CONTENT_TYPE,
};
use crate::runtime::metadata::encode_metadata;
use crate::runtime::topics::ReplyKeywords;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerConfig {
    pub staging_bucket: String,
    pub reply_keywords: ReplyKeywords,
    pub presign_expire_secs: u64,
}

impl IssuerConfig {
    pub fn effective_expire_secs(&self) -> u64 {
        self.presign_expire_secs.max(MIN_PRESIGN_EXPIRE_SECS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuedUpload {
    pub request_uuid: String,
    pub object_key: String,
    pub response_topic: String,
    pub expiration: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuerOutcome {
    Issued(IssuedUpload),
    /// The request payload was not usable. A rejection reply has been
    /// published where a reply topic was derivable; the invocation itself
    /// still counts as handled.
    Rejected { request_uuid: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerError {
    pub message: String,
}

/// Answers an upload request with a presigned PUT URL on the derived
/// response topic.
///
/// Payload problems produce a rejection reply (`url: ""`, `expiration: 0`)
/// rather than an error; signing or publish failures publish the same
/// rejection best-effort and then surface the error so the trigger
/// infrastructure sees a failed invocation.
pub fn handle_upload_request(
    event: &Value,
    config: &IssuerConfig,
    signer: &impl UploadUrlSigner,
    publisher: &impl MessagePublisher,
) -> Result<IssuerOutcome, IssuerError> {
    log_issuer_info("upload_request_received", json!({ "event": event }));

    let request = match normalize_request(event) {
        Ok(value) => value,
        Err(error) => return reject(event, config, publisher, error.message()),
    };

    let content_md5 = match md5_hex_to_base64(&request.md5) {
        Ok(value) => value,
        Err(error) => return reject(event, config, publisher, error.message()),
    };

    let metadata = encode_metadata(&BTreeMap::from([
        (METADATA_TOPIC_KEY.to_string(), request.topic.clone()),
        (
            METADATA_REQUEST_UUID_KEY.to_string(),
            request.request_uuid.clone(),
        ),
    ]));

    let object_key = Uuid::new_v4().to_string();
    let expire_secs = config.effective_expire_secs();
    let response_topic = config.reply_keywords.reply_topic(&request.topic);

    let presign = PresignPutRequest {
        bucket: config.staging_bucket.clone(),
        key: object_key.clone(),
        content_type: ZIP_CONTENT_TYPE.to_string(),
        content_md5: content_md5.clone(),
        metadata: metadata.clone(),
        expire_secs,
    };

    let url = match signer.presign_put(&presign) {
        Ok(value) => value,
        Err(error) => {
            let message = format!("Failed to presign upload URL: {error}");
            log_issuer_error(
                "presign_failed",
                json!({
                    "requestUuid": request.request_uuid.clone(),
                    "error": message.clone(),
                }),
            );
            publish_rejection_best_effort(&response_topic, &request.request_uuid, publisher);
            return Err(IssuerError { message });
        }
    };

    let expiration = chrono::Utc::now().timestamp_millis() + (expire_secs as i64) * 1_000;
    let response = UploadResponse {
        request_uuid: request.request_uuid.clone(),
        url,
        expiration,
        headers: upload_headers(&metadata, &content_md5),
    };

    let payload = serde_json::to_vec(&response).expect("upload response should serialize");
    if let Err(error) = publisher.publish(&response_topic, &payload) {
        let message = format!("Failed to publish upload response: {error}");
        log_issuer_error(
            "response_publish_failed",
            json!({
                "requestUuid": request.request_uuid.clone(),
                "topic": response_topic.clone(),
                "error": message.clone(),
            }),
        );
        publish_rejection_best_effort(&response_topic, &request.request_uuid, publisher);
        return Err(IssuerError { message });
    }

    log_issuer_info(
        "upload_response_published",
        json!({
            "requestUuid": request.request_uuid.clone(),
            "topic": response_topic.clone(),
            "objectKey": object_key.clone(),
            "expiration": expiration,
        }),
    );

    Ok(IssuerOutcome::Issued(IssuedUpload {
        request_uuid: request.request_uuid,
        object_key,
        response_topic,
        expiration,
    }))
}

/// The uploader must echo these headers on the PUT; they are part of the
/// presigned signature.
fn upload_headers(
    encoded_metadata: &BTreeMap<String, String>,
    content_md5: &str,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::from([
        ("content-type".to_string(), ZIP_CONTENT_TYPE.to_string()),
        ("content-md5".to_string(), content_md5.to_string()),
    ]);
    for (key, value) in encoded_metadata {
        headers.insert(format!("x-amz-meta-{key}"), value.clone());
    }
    headers
}

fn reject(
    event: &Value,
    config: &IssuerConfig,
    publisher: &impl MessagePublisher,
    reason: &str,
) -> Result<IssuerOutcome, IssuerError> {
    let request_uuid = event
        .get("requestUuid")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    log_issuer_error(
        "upload_request_rejected",
        json!({ "requestUuid": request_uuid.clone(), "reason": reason }),
    );

    // Without an inbound topic there is no derivable reply topic.
    let Some(topic) = event.get("topic").and_then(Value::as_str) else {
        log_issuer_error(
            "rejection_reply_skipped",
            json!({
                "requestUuid": request_uuid.clone(),
                "reason": "request carries no topic to derive a reply topic from",
            }),
        );
        return Ok(IssuerOutcome::Rejected { request_uuid });
    };

    let response_topic = config.reply_keywords.reply_topic(topic);
    publish_rejection(&response_topic, &request_uuid, publisher).map_err(|error| IssuerError {
        message: format!("Failed to publish rejection reply: {error}"),
    })?;

    Ok(IssuerOutcome::Rejected { request_uuid })
}

fn publish_rejection(
    topic: &str,
    request_uuid: &str,
    publisher: &impl MessagePublisher,
) -> Result<(), String> {
    let rejection = UploadResponse::rejection(request_uuid);
    let payload = serde_json::to_vec(&rejection).expect("rejection reply should serialize");
    publisher.publish(topic, &payload)
}

fn publish_rejection_best_effort(
    topic: &str,
    request_uuid: &str,
    publisher: &impl MessagePublisher,
) {
    if let Err(error) = publish_rejection(topic, request_uuid, publisher) {
        log_issuer_error(
            "rejection_reply_dropped",
            json!({ "requestUuid": request_uuid, "topic": topic, "error": error }),
        );
    }
}

fn log_issuer_info(event: &str, details: Value) {
    eprintln!(
        "{}",
        json!({
            "component": "upload_response_handler",
            "event": event,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "details": details,
        })
    );
}

fn log_issuer_error(event: &str, details: Value) {
    eprintln!(
        "{}",
        json!({
            "component": "upload_response_handler",
            "level": "error",
            "event": event,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "details": details,
        })
    );
}
