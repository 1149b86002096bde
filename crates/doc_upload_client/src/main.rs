//! Reference client for the document-upload workflow.
//!
//! Connects to the broker with mutual TLS, publishes one upload request,
//! waits for the issuer's presigned-URL response, uploads the archive with a
//! plain HTTP PUT, and waits for the processor's final acknowledgement. The
//! broker rule injects the inbound topic into the issuer's event, so the
//! request payload itself only carries `requestUuid` and `md5`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

use doc_upload_core::contract::{Acknowledgement, UploadResponse};
use doc_upload_core::topics;

const TOPIC_BASE: &str = "awsSample/iotDocUpload";
const REQUEST_KEYWORD: &str = "docUpldReq";
const RESPONSE_KEYWORD: &str = "docUpldResp";
const ACK_KEYWORD: &str = "docUpldAck";
/// Deliberately wrong checksum for exercising the rejection path.
const BAD_MD5: &str = "11111111111111111111111111111111";

#[derive(Parser)]
#[command(
    name = "doc_upload_client",
    about = "Uploads a ZIP archive through the IoT document-upload workflow"
)]
struct Cli {
    /// AWS IoT custom endpoint, without a port
    #[arg(long)]
    endpoint: String,
    /// MQTT port; AWS IoT supports 8883 and 443
    #[arg(long, default_value_t = 8883)]
    port: u16,
    /// Client certificate, PEM format
    #[arg(long)]
    cert: PathBuf,
    /// Client private key, PEM format
    #[arg(long)]
    key: PathBuf,
    /// Root certificate authority, PEM format
    #[arg(long)]
    root_ca: PathBuf,
    /// Client ID for the MQTT connection
    #[arg(long)]
    client_id: String,
    /// ZIP archive to upload
    #[arg(long)]
    archive_path: PathBuf,
    /// Seconds to wait for each of the response and the acknowledgement
    #[arg(long, default_value_t = 7)]
    timeout_secs: u64,
    /// Publish a deliberately wrong checksum
    #[arg(long)]
    bad_md5: bool,
    /// Omit the md5 field to exercise payload validation
    #[arg(long)]
    bad_payload: bool,
}

struct ReplyReceivers {
    response: oneshot::Receiver<UploadResponse>,
    acknowledgement: oneshot::Receiver<Acknowledgement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferOutcome {
    Succeeded,
    Failed,
    Unknown,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();
    let archive = std::fs::read(&args.archive_path).map_err(|error| {
        format!(
            "failed to read archive {}: {error}",
            args.archive_path.display()
        )
    })?;

    let (client, receivers) = connect_and_subscribe(&args).await?;

    let request_uuid = Uuid::new_v4().to_string();
    let md5_hex = if args.bad_md5 {
        BAD_MD5.to_string()
    } else {
        format!("{:x}", md5::compute(&archive))
    };
    let payload = request_payload(&request_uuid, &md5_hex, args.bad_payload);

    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let topic = topics::request_topic(TOPIC_BASE, REQUEST_KEYWORD, &args.client_id, &timestamp);
    println!("Publishing upload request on '{topic}': {payload}");
    client
        .publish(topic, QoS::AtLeastOnce, false, payload.to_string())
        .await?;

    let timeout = Duration::from_secs(args.timeout_secs);

    let response = match tokio::time::timeout(timeout, receivers.response).await {
        Ok(Ok(response)) => Some(response),
        _ => {
            println!("No upload response received within {}s", args.timeout_secs);
            None
        }
    };

    if let Some(response) = response {
        if response.is_rejection() {
            println!("Upload request was rejected; nothing will be uploaded.");
        } else {
            println!(
                "Uploading {} with the presigned URL",
                args.archive_path.display()
            );
            match upload_archive(&response, archive).await {
                Ok(status) => println!("Upload finished with HTTP status {status}"),
                Err(error) => println!("Upload failed: {error}"),
            }
        }
    }

    let acknowledgement = match tokio::time::timeout(timeout, receivers.acknowledgement).await {
        Ok(Ok(acknowledgement)) => Some(acknowledgement),
        _ => {
            println!("No acknowledgement received within {}s", args.timeout_secs);
            None
        }
    };

    println!("Disconnecting");
    client.disconnect().await?;

    let outcome = transfer_outcome(acknowledgement.as_ref());
    println!("Upload successful: {}", outcome_label(outcome));
    Ok(())
}

async fn connect_and_subscribe(
    args: &Cli,
) -> Result<(AsyncClient, ReplyReceivers), Box<dyn std::error::Error>> {
    let ca = std::fs::read(&args.root_ca)?;
    let client_cert = std::fs::read(&args.cert)?;
    let client_key = std::fs::read(&args.key)?;

    let mut options = MqttOptions::new(args.client_id.clone(), args.endpoint.clone(), args.port);
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_session(true);
    // AWS IoT requires the MQTT-over-TLS ALPN name when connecting on 443.
    let alpn = (args.port == 443).then(|| vec![b"x-amzn-mqtt-ca".to_vec()]);
    options.set_transport(Transport::Tls(TlsConfiguration::Simple {
        ca,
        alpn,
        client_auth: Some((client_cert, client_key)),
    }));

    let (client, event_loop) = AsyncClient::new(options, 10);

    let response_prefix = format!("{TOPIC_BASE}/{RESPONSE_KEYWORD}/{}/", args.client_id);
    let ack_prefix = format!("{TOPIC_BASE}/{ACK_KEYWORD}/{}/", args.client_id);

    for prefix in [&response_prefix, &ack_prefix] {
        let filter = format!("{prefix}#");
        println!("Subscribing to '{filter}'");
        client.subscribe(filter, QoS::AtLeastOnce).await?;
    }

    let (response_tx, response_rx) = oneshot::channel();
    let (ack_tx, ack_rx) = oneshot::channel();
    tokio::spawn(drive_event_loop(
        event_loop,
        response_prefix,
        ack_prefix,
        response_tx,
        ack_tx,
    ));

    Ok((
        client,
        ReplyReceivers {
            response: response_rx,
            acknowledgement: ack_rx,
        },
    ))
}

/// Polls the MQTT connection. Replies are only parsed and signalled from
/// here; the upload itself runs on the main task so this loop never blocks.
async fn drive_event_loop(
    mut event_loop: EventLoop,
    response_prefix: String,
    ack_prefix: String,
    response_tx: oneshot::Sender<UploadResponse>,
    ack_tx: oneshot::Sender<Acknowledgement>,
) {
    let mut response_tx = Some(response_tx);
    let mut ack_tx = Some(ack_tx);

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                println!("Connected: session_present={}", ack.session_present);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if publish.topic.starts_with(&response_prefix) {
                    match serde_json::from_slice::<UploadResponse>(&publish.payload) {
                        Ok(response) => {
                            println!("Received response on '{}'", publish.topic);
                            if let Some(tx) = response_tx.take() {
                                let _ = tx.send(response);
                            }
                        }
                        Err(error) => println!("Ignoring unparseable response: {error}"),
                    }
                } else if publish.topic.starts_with(&ack_prefix) {
                    match serde_json::from_slice::<Acknowledgement>(&publish.payload) {
                        Ok(acknowledgement) => {
                            println!("Received acknowledgement on '{}'", publish.topic);
                            if let Some(tx) = ack_tx.take() {
                                let _ = tx.send(acknowledgement);
                            }
                        }
                        Err(error) => println!("Ignoring unparseable acknowledgement: {error}"),
                    }
                }
            }
            Ok(_) => {}
            Err(error) => {
                println!("MQTT connection error: {error}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// PUTs the archive to the presigned URL with the exact headers the issuer
/// signed; the storage backend rejects the upload otherwise.
async fn upload_archive(response: &UploadResponse, archive: Vec<u8>) -> Result<u16, String> {
    let client = reqwest::Client::new();
    let mut request = client
        .put(&response.url)
        .timeout(Duration::from_secs(30))
        .body(archive);
    for (name, value) in &response.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let reply = request.send().await.map_err(|error| error.to_string())?;
    Ok(reply.status().as_u16())
}

fn request_payload(request_uuid: &str, md5_hex: &str, omit_md5: bool) -> Value {
    let mut payload = json!({ "requestUuid": request_uuid, "md5": md5_hex });
    if omit_md5 {
        payload
            .as_object_mut()
            .expect("payload is an object")
            .remove("md5");
    }
    payload
}

fn transfer_outcome(acknowledgement: Option<&Acknowledgement>) -> TransferOutcome {
    match acknowledgement {
        Some(acknowledgement) if acknowledgement.success => TransferOutcome::Succeeded,
        Some(_) => TransferOutcome::Failed,
        None => TransferOutcome::Unknown,
    }
}

fn outcome_label(outcome: TransferOutcome) -> &'static str {
    match outcome {
        TransferOutcome::Succeeded => "true",
        TransferOutcome::Failed => "false",
        TransferOutcome::Unknown => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_payload_carries_uuid_and_checksum() {
        let payload = request_payload("u-1", "5d41402abc4b2a76b9719d911017c592", false);
        assert_eq!(
            payload,
            json!({ "requestUuid": "u-1", "md5": "5d41402abc4b2a76b9719d911017c592" })
        );
    }

    #[test]
    fn bad_payload_omits_the_checksum() {
        let payload = request_payload("u-1", "5d41402abc4b2a76b9719d911017c592", true);
        assert_eq!(payload, json!({ "requestUuid": "u-1" }));
    }

    #[test]
    fn archive_checksum_matches_the_hex_rendering() {
        assert_eq!(
            format!("{:x}", md5::compute(b"hello")),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn outcome_follows_the_acknowledgement_payload() {
        assert_eq!(
            transfer_outcome(Some(&Acknowledgement::succeeded("u-1"))),
            TransferOutcome::Succeeded
        );
        assert_eq!(
            transfer_outcome(Some(&Acknowledgement::failed(Some("u-1")))),
            TransferOutcome::Failed
        );
        assert_eq!(transfer_outcome(None), TransferOutcome::Unknown);
    }
}
