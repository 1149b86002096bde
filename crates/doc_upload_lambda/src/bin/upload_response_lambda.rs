use std::time::Duration;

use aws_sdk_s3::presigning::PresigningConfig;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::{json, Value};

use doc_upload_lambda::adapters::publisher::MessagePublisher;
use doc_upload_lambda::adapters::signer::{PresignPutRequest, UploadUrlSigner};
use doc_upload_lambda::handlers::issuer::{handle_upload_request, IssuerConfig, IssuerOutcome};
use doc_upload_lambda::runtime::contract::MIN_PRESIGN_EXPIRE_SECS;
use doc_upload_lambda::runtime::topics::ReplyKeywords;

struct S3UploadUrlSigner {
    s3_client: aws_sdk_s3::Client,
}

impl UploadUrlSigner for S3UploadUrlSigner {
    fn presign_put(&self, request: &PresignPutRequest) -> Result<String, String> {
        let client = self.s3_client.clone();
        let request = request.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let presigning_config =
                    PresigningConfig::expires_in(Duration::from_secs(request.expire_secs))
                        .map_err(|error| format!("invalid presigning expiry: {error}"))?;

                let presigned = client
                    .put_object()
                    .bucket(request.bucket)
                    .key(request.key)
                    .content_type(request.content_type)
                    .content_md5(request.content_md5)
                    .set_metadata(Some(request.metadata.into_iter().collect()))
                    .presigned(presigning_config)
                    .await
                    .map_err(|error| format!("failed to presign upload url: {error}"))?;

                Ok(presigned.uri().to_string())
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
    let staging_bucket = std::env::var("STG_BUCKET_NAME")
        .map_err(|_| Error::from("STG_BUCKET_NAME must be configured"))?;
    let request_keyword = std::env::var("TOPIC_REQ_KW")
        .map_err(|_| Error::from("TOPIC_REQ_KW must be configured"))?;
    let response_keyword = std::env::var("TOPIC_RESP_KW")
        .map_err(|_| Error::from("TOPIC_RESP_KW must be configured"))?;
    let presign_expire_secs = match std::env::var("PRESIGN_EXPIRE_SECS") {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|_| Error::from("PRESIGN_EXPIRE_SECS must be a positive integer"))?,
        Err(_) => MIN_PRESIGN_EXPIRE_SECS,
    };

    let config = IssuerConfig {
        staging_bucket,
        reply_keywords: ReplyKeywords::new(request_keyword, response_keyword),
        presign_expire_secs,
    };

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let signer = S3UploadUrlSigner {
        s3_client: aws_sdk_s3::Client::new(&aws_config),
    };
    let publisher = IotMessagePublisher {
        iot_client: aws_sdk_iotdataplane::Client::new(&aws_config),
    };

    match handle_upload_request(&event.payload, &config, &signer, &publisher) {
        Ok(IssuerOutcome::Issued(issued)) => Ok(json!({ "status": "issued", "issued": issued })),
        Ok(IssuerOutcome::Rejected { request_uuid }) => Ok(json!({
            "status": "rejected",
            "request_uuid": request_uuid,
        })),
        Err(error) => Err(Error::from(error.message)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    lambda_runtime::run(service_fn(handle_request)).await
}
