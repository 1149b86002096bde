use std::collections::BTreeMap;
use std::path::Path;

use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::{json, Value};

use doc_upload_lambda::adapters::object_store::{DocumentStore, StagingStore};
use doc_upload_lambda::adapters::publisher::MessagePublisher;
use doc_upload_lambda::handlers::processor::{
    decode_created_records, handle_created_object, ProcessorConfig,
};
use doc_upload_lambda::runtime::topics::ReplyKeywords;

struct S3StagingStore {
    s3_client: aws_sdk_s3::Client,
}

impl StagingStore for S3StagingStore {
    fn object_metadata(&self, bucket: &str, key: &str) -> Result<BTreeMap<String, String>, String> {
        let client = self.s3_client.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let output = client
                    .head_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|error| format!("failed to head staged object: {error}"))?;

                Ok(output
                    .metadata()
                    .map(|metadata| {
                        metadata
                            .iter()
                            .map(|(name, value)| (name.clone(), value.clone()))
                            .collect()
                    })
                    .unwrap_or_default())
            })
        })
    }

    fn download_object(&self, bucket: &str, key: &str, destination: &Path) -> Result<(), String> {
        let client = self.s3_client.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();
        let destination = destination.to_path_buf();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let output = client
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|error| format!("failed to get staged object: {error}"))?;

                let body = output
                    .body
                    .collect()
                    .await
                    .map_err(|error| format!("failed to read staged object body: {error}"))?;

                std::fs::write(&destination, body.into_bytes())
                    .map_err(|error| format!("failed to write downloaded archive: {error}"))
            })
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), String> {
        let client = self.s3_client.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .delete_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|error| format!("failed to delete staged object: {error}"))
            })
        })
    }
}

struct S3DocumentStore {
    bucket: String,
    s3_client: aws_sdk_s3::Client,
}

impl DocumentStore for S3DocumentStore {
    fn store_document(&self, source: &Path, key: &str) -> Result<(), String> {
        let client = self.s3_client.clone();
        let bucket = self.bucket.clone();
        let key = key.to_string();
        let source = source.to_path_buf();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let body = aws_sdk_s3::primitives::ByteStream::from_path(&source)
                    .await
                    .map_err(|error| format!("failed to read extracted document: {error}"))?;

                client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(body)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|error| format!("failed to store document: {error}"))
            })
        })
    }
}

struct IotMessagePublisher {
    iot_client: aws_sdk_iotdataplane::Client,
}

impl MessagePublisher for IotMessagePublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), String> {
        let client = self.iot_client.clone();
        let topic = topic.to_string();
        let payload = payload.to_vec();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .publish()
                    .topic(topic)
                    .qos(1)
                    .payload(aws_sdk_iotdataplane::primitives::Blob::new(payload))
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|error| format!("failed to publish mqtt message: {error}"))
            })
        })
    }
}

async fn handle_request(event: LambdaEvent<Value>) -> Result<Value, Error> {
    let store_bucket = std::env::var("STORE_BUCKET_NAME")
        .map_err(|_| Error::from("STORE_BUCKET_NAME must be configured"))?;
    let request_keyword = std::env::var("TOPIC_REQ_KW")
        .map_err(|_| Error::from("TOPIC_REQ_KW must be configured"))?;
    let acknowledgement_keyword = std::env::var("TOPIC_ACK_KW")
        .map_err(|_| Error::from("TOPIC_ACK_KW must be configured"))?;

    let records = decode_created_records(&event.payload).map_err(Error::from)?;

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let staging = S3StagingStore {
        s3_client: aws_sdk_s3::Client::new(&aws_config),
    };
    let documents = S3DocumentStore {
        bucket: store_bucket,
        s3_client: aws_sdk_s3::Client::new(&aws_config),
    };
    let publisher = IotMessagePublisher {
        iot_client: aws_sdk_iotdataplane::Client::new(&aws_config),
    };

    let config = ProcessorConfig {
        reply_keywords: ReplyKeywords::new(request_keyword, acknowledgement_keyword),
    };

    // Records are independent; one failing upload must not starve the rest
    // of the batch of their acknowledgements.
    let mut processed = Vec::new();
    let mut failures = Vec::new();
    for record in &records {
        match handle_created_object(record, &config, &staging, &documents, &publisher) {
            Ok(upload) => processed.push(upload),
            Err(error) => failures.push(format!("{}: {}", record.key, error.message)),
        }
    }

    if failures.is_empty() {
        Ok(json!({ "status": "ok", "processed": processed }))
    } else {
        Err(Error::from(format!(
            "{} of {} record(s) failed: {}",
            failures.len(),
            records.len(),
            failures.join("; ")
        )))
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    lambda_runtime::run(service_fn(handle_request)).await
}
