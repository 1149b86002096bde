use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tempfile::TempDir;
use zip::ZipArchive;

use crate::adapters::object_store::{DocumentStore, StagingStore};
use crate::adapters::publisher::MessagePublisher;
use crate::runtime::contract::{Acknowledgement, METADATA_REQUEST_UUID_KEY, METADATA_TOPIC_KEY};
use crate::runtime::metadata::decode_metadata;
use crate::runtime::storage_keys::document_object_key;
use crate::runtime::topics::ReplyKeywords;

const STAGED_ARCHIVE_FILENAME: &str = "upload.zip";
const EXTRACTION_DIRNAME: &str = "content";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub reply_keywords: ReplyKeywords,
}

/// One object-created notification record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedObjectRecord {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorErrorKind {
    /// The staged object is missing, or its metadata is absent, undecodable,
    /// or lacks required keys.
    InvalidMetadata,
    /// Storage, extraction, or messaging failure.
    Transport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorError {
    pub kind: ProcessorErrorKind,
    pub message: String,
}

impl ProcessorError {
    fn invalid_metadata(message: impl Into<String>) -> Self {
        Self {
            kind: ProcessorErrorKind::InvalidMetadata,
            message: message.into(),
        }
    }

    fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ProcessorErrorKind::Transport,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessedUpload {
    pub request_uuid: String,
    pub partition: String,
    pub documents_stored: usize,
    pub acknowledgement_topic: String,
}

/// Parses the `Records[].s3.{bucket.name, object.key}` shape of an S3
/// object-created notification.
pub fn decode_created_records(event: &Value) -> Result<Vec<CreatedObjectRecord>, String> {
    let records = event
        .get("Records")
        .and_then(Value::as_array)
        .ok_or_else(|| "S3 event must include a Records array".to_string())?;

    let mut decoded = Vec::with_capacity(records.len());
    for record in records {
        let bucket = record
            .pointer("/s3/bucket/name")
            .and_then(Value::as_str)
            .ok_or_else(|| "S3 record must include s3.bucket.name".to_string())?;
        let key = record
            .pointer("/s3/object/key")
            .and_then(Value::as_str)
            .ok_or_else(|| "S3 record must include s3.object.key".to_string())?;
        decoded.push(CreatedObjectRecord {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
    }

    Ok(decoded)
}

/// Extracts one staged archive and redistributes its files into the
/// destination store partitioned by the originating request topic.
///
/// On success the staged object is deleted after the positive
/// acknowledgement. On failure the staged object is kept for inspection or
/// reprocessing, a negative acknowledgement is published when the reply
/// topic is derivable, and the error is returned so the trigger
/// infrastructure can apply its own retry policy.
pub fn handle_created_object(
    record: &CreatedObjectRecord,
    config: &ProcessorConfig,
    staging: &impl StagingStore,
    documents: &impl DocumentStore,
    publisher: &impl MessagePublisher,
) -> Result<ProcessedUpload, ProcessorError> {
    log_processor_info(
        "staged_object_received",
        json!({ "bucket": record.bucket.clone(), "key": record.key.clone() }),
    );

    let metadata = match fetch_metadata(record, staging) {
        Ok(value) => value,
        Err(error) => {
            // The reply topic lives in the metadata, so nothing can be acked.
            log_processor_error(
                "acknowledgement_not_possible",
                json!({
                    "bucket": record.bucket.clone(),
                    "key": record.key.clone(),
                    "error": error.message.clone(),
                }),
            );
            return Err(error);
        }
    };

    match process_staged_object(record, &metadata, config, staging, documents, publisher) {
        Ok(processed) => Ok(processed),
        Err(error) => {
            publish_failure_acknowledgement(&metadata, config, publisher);
            log_processor_error(
                "staged_object_kept",
                json!({
                    "bucket": record.bucket.clone(),
                    "key": record.key.clone(),
                    "error": error.message.clone(),
                }),
            );
            Err(error)
        }
    }
}

fn fetch_metadata(
    record: &CreatedObjectRecord,
    staging: &impl StagingStore,
) -> Result<BTreeMap<String, String>, ProcessorError> {
    let encoded = staging
        .object_metadata(&record.bucket, &record.key)
        .map_err(|error| {
            ProcessorError::invalid_metadata(format!(
                "Failed to read staged object metadata: {error}"
            ))
        })?;

    decode_metadata(&encoded).map_err(|error| {
        ProcessorError::invalid_metadata(format!(
            "Failed to decode staged object metadata: {error}"
        ))
    })
}

fn process_staged_object(
    record: &CreatedObjectRecord,
    metadata: &BTreeMap<String, String>,
    config: &ProcessorConfig,
    staging: &impl StagingStore,
    documents: &impl DocumentStore,
    publisher: &impl MessagePublisher,
) -> Result<ProcessedUpload, ProcessorError> {
    let partition = metadata.get(METADATA_TOPIC_KEY).ok_or_else(|| {
        ProcessorError::invalid_metadata(format!(
            "Staged object metadata is missing required key '{METADATA_TOPIC_KEY}'"
        ))
    })?;
    let request_uuid = metadata.get(METADATA_REQUEST_UUID_KEY).ok_or_else(|| {
        ProcessorError::invalid_metadata(format!(
            "Staged object metadata is missing required key '{METADATA_REQUEST_UUID_KEY}'"
        ))
    })?;

    let scratch = TempDir::new().map_err(|error| {
        ProcessorError::transport(format!("Failed to create scratch directory: {error}"))
    })?;
    let archive_path = scratch.path().join(STAGED_ARCHIVE_FILENAME);
    staging
        .download_object(&record.bucket, &record.key, &archive_path)
        .map_err(|error| {
            ProcessorError::transport(format!("Failed to download staged object: {error}"))
        })?;

    let extract_root = scratch.path().join(EXTRACTION_DIRNAME);
    extract_archive(&archive_path, &extract_root)?;

    let documents_stored = store_extracted_documents(&extract_root, "", partition, documents)?;

    let acknowledgement_topic = config.reply_keywords.reply_topic(partition);
    publish_acknowledgement(
        &acknowledgement_topic,
        &Acknowledgement::succeeded(request_uuid.clone()),
        publisher,
    )
    .map_err(|error| {
        ProcessorError::transport(format!("Failed to publish acknowledgement: {error}"))
    })?;

    staging
        .delete_object(&record.bucket, &record.key)
        .map_err(|error| {
            ProcessorError::transport(format!("Failed to delete staged object: {error}"))
        })?;

    log_processor_info(
        "staged_object_processed",
        json!({
            "bucket": record.bucket.clone(),
            "key": record.key.clone(),
            "requestUuid": request_uuid.clone(),
            "partition": partition.clone(),
            "documentsStored": documents_stored,
        }),
    );

    Ok(ProcessedUpload {
        request_uuid: request_uuid.clone(),
        partition: partition.clone(),
        documents_stored,
        acknowledgement_topic,
    })
}

fn extract_archive(archive_path: &Path, extract_root: &Path) -> Result<(), ProcessorError> {
    let file = fs::File::open(archive_path).map_err(|error| {
        ProcessorError::transport(format!("Failed to open downloaded archive: {error}"))
    })?;
    let mut archive = ZipArchive::new(file).map_err(|error| {
        ProcessorError::transport(format!("Failed to read staged archive: {error}"))
    })?;
    archive.extract(extract_root).map_err(|error| {
        ProcessorError::transport(format!("Failed to extract staged archive: {error}"))
    })
}

/// Walks the extraction root depth-first, storing every regular file under
/// `{partition}/{path relative to the extraction root}`.
fn store_extracted_documents(
    current_dir: &Path,
    relative_prefix: &str,
    partition: &str,
    documents: &impl DocumentStore,
) -> Result<usize, ProcessorError> {
    let entries = fs::read_dir(current_dir).map_err(|error| {
        ProcessorError::transport(format!("Failed to list extracted directory: {error}"))
    })?;

    let mut stored = 0usize;
    for entry in entries {
        let entry = entry.map_err(|error| {
            ProcessorError::transport(format!("Failed to list extracted directory: {error}"))
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = if relative_prefix.is_empty() {
            name
        } else {
            format!("{relative_prefix}/{name}")
        };
        let file_type = entry.file_type().map_err(|error| {
            ProcessorError::transport(format!("Failed to inspect extracted entry: {error}"))
        })?;

        if file_type.is_file() {
            let key = document_object_key(partition, &relative);
            documents.store_document(&entry.path(), &key).map_err(|error| {
                ProcessorError::transport(format!(
                    "Failed to store extracted document '{relative}': {error}"
                ))
            })?;
            stored += 1;
        } else if file_type.is_dir() {
            stored += store_extracted_documents(&entry.path(), &relative, partition, documents)?;
        }
    }

    Ok(stored)
}

fn publish_acknowledgement(
    topic: &str,
    acknowledgement: &Acknowledgement,
    publisher: &impl MessagePublisher,
) -> Result<(), String> {
    let payload = serde_json::to_vec(acknowledgement).expect("acknowledgement should serialize");
    publisher.publish(topic, &payload)
}

fn publish_failure_acknowledgement(
    metadata: &BTreeMap<String, String>,
    config: &ProcessorConfig,
    publisher: &impl MessagePublisher,
) {
    let Some(topic) = metadata.get(METADATA_TOPIC_KEY) else {
        log_processor_error(
            "acknowledgement_not_possible",
            json!({
                "reason": format!("metadata key '{METADATA_TOPIC_KEY}' is missing"),
            }),
        );
        return;
    };

    let acknowledgement =
        Acknowledgement::failed(metadata.get(METADATA_REQUEST_UUID_KEY).map(String::as_str));
    let acknowledgement_topic = config.reply_keywords.reply_topic(topic);
    if let Err(error) =
        publish_acknowledgement(&acknowledgement_topic, &acknowledgement, publisher)
    {
        log_processor_error(
            "failure_acknowledgement_dropped",
            json!({ "topic": acknowledgement_topic, "error": error }),
        );
    }
}

fn log_processor_info(event: &str, details: Value) {
    eprintln!(
        "{}",
        json!({
            "component": "upload_processing_handler",
            "event": event,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "details": details,
        })
    );
}

fn log_processor_error(event: &str, details: Value) {
    eprintln!(
        "{}",
        json!({
            "component": "upload_processing_handler",
            "level": "error",
            "event": event,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "details": details,
        })
    );
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::{Cursor, Write};
    use std::sync::Mutex;

    use zip::write::FileOptions;
    use zip::{CompressionMethod, ZipWriter};

    use crate::runtime::metadata::encode_metadata;

    use super::*;

    struct FakeStagingStore {
        metadata: BTreeMap<String, String>,
        archive: Vec<u8>,
        deleted: Mutex<Vec<String>>,
    }

    impl FakeStagingStore {
        fn new(metadata: BTreeMap<String, String>, archive: Vec<u8>) -> Self {
            Self {
                metadata,
                archive,
                deleted: Mutex::new(Vec::new()),
            }
        }

        fn deleted(&self) -> Vec<String> {
            self.deleted.lock().expect("poisoned mutex").clone()
        }
    }

    impl StagingStore for FakeStagingStore {
        fn object_metadata(
            &self,
            _bucket: &str,
            _key: &str,
        ) -> Result<BTreeMap<String, String>, String> {
            Ok(self.metadata.clone())
        }

        fn download_object(
            &self,
            _bucket: &str,
            _key: &str,
            destination: &Path,
        ) -> Result<(), String> {
            fs::write(destination, &self.archive).map_err(|error| error.to_string())
        }

        fn delete_object(&self, _bucket: &str, key: &str) -> Result<(), String> {
            self.deleted
                .lock()
                .expect("poisoned mutex")
                .push(key.to_string());
            Ok(())
        }
    }

    struct RecordingDocumentStore {
        stored: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl RecordingDocumentStore {
        fn new() -> Self {
            Self {
                stored: Mutex::new(HashMap::new()),
            }
        }

        fn stored(&self) -> HashMap<String, Vec<u8>> {
            self.stored.lock().expect("poisoned mutex").clone()
        }
    }

    impl DocumentStore for RecordingDocumentStore {
        fn store_document(&self, source: &Path, key: &str) -> Result<(), String> {
            let body = fs::read(source).map_err(|error| error.to_string())?;
            self.stored
                .lock()
                .expect("poisoned mutex")
                .insert(key.to_string(), body);
            Ok(())
        }
    }

    struct FailingDocumentStore;

    impl DocumentStore for FailingDocumentStore {
        fn store_document(&self, _source: &Path, _key: &str) -> Result<(), String> {
            Err("simulated store failure".to_string())
        }
    }

    struct RecordingPublisher {
        messages: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingPublisher {
        fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
            }
        }

        fn messages(&self) -> Vec<(String, Vec<u8>)> {
            self.messages.lock().expect("poisoned mutex").clone()
        }
    }

    impl MessagePublisher for RecordingPublisher {
        fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), String> {
            self.messages
                .lock()
                .expect("poisoned mutex")
                .push((topic.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    fn zip_fixture(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, body) in entries {
            writer
                .start_file(*name, options)
                .expect("zip entry should start");
            writer.write_all(body).expect("zip entry should write");
        }
        writer.finish().expect("zip should finish").into_inner()
    }

    fn sample_metadata(topic: &str, request_uuid: &str) -> BTreeMap<String, String> {
        encode_metadata(&BTreeMap::from([
            (METADATA_TOPIC_KEY.to_string(), topic.to_string()),
            (METADATA_REQUEST_UUID_KEY.to_string(), request_uuid.to_string()),
        ]))
    }

    fn sample_config() -> ProcessorConfig {
        ProcessorConfig {
            reply_keywords: ReplyKeywords::new("docUpldReq", "docUpldAck"),
        }
    }

    fn sample_record() -> CreatedObjectRecord {
        CreatedObjectRecord {
            bucket: "staging-bucket".to_string(),
            key: "3f3e9d1c-upload".to_string(),
        }
    }

    fn published_acknowledgement(publisher: &RecordingPublisher, index: usize) -> Acknowledgement {
        let messages = publisher.messages();
        serde_json::from_slice(&messages[index].1).expect("acknowledgement should parse")
    }

    #[test]
    fn redistributes_archive_and_acknowledges_success() {
        let archive = zip_fixture(&[("a.txt", b"alpha"), ("sub/b.txt", b"beta")]);
        let staging = FakeStagingStore::new(
            sample_metadata("foo/docUpldReq/bar", "u-42"),
            archive,
        );
        let documents = RecordingDocumentStore::new();
        let publisher = RecordingPublisher::new();

        let processed = handle_created_object(
            &sample_record(),
            &sample_config(),
            &staging,
            &documents,
            &publisher,
        )
        .expect("processing should succeed");

        assert_eq!(processed.request_uuid, "u-42");
        assert_eq!(processed.partition, "foo/docUpldReq/bar");
        assert_eq!(processed.documents_stored, 2);
        assert_eq!(processed.acknowledgement_topic, "foo/docUpldAck/bar");

        let stored = documents.stored();
        assert_eq!(
            stored.get("foo/docUpldReq/bar/a.txt").map(Vec::as_slice),
            Some(b"alpha".as_slice())
        );
        assert_eq!(
            stored.get("foo/docUpldReq/bar/sub/b.txt").map(Vec::as_slice),
            Some(b"beta".as_slice())
        );

        assert_eq!(staging.deleted(), vec!["3f3e9d1c-upload".to_string()]);

        let messages = publisher.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "foo/docUpldAck/bar");
        let acknowledgement = published_acknowledgement(&publisher, 0);
        assert!(acknowledgement.success);
        assert_eq!(acknowledgement.request_uuid, "u-42");
    }

    #[test]
    fn missing_request_uuid_sends_not_found_failure_ack() {
        let archive = zip_fixture(&[("a.txt", b"alpha")]);
        let metadata = encode_metadata(&BTreeMap::from([(
            METADATA_TOPIC_KEY.to_string(),
            "foo/docUpldReq/bar".to_string(),
        )]));
        let staging = FakeStagingStore::new(metadata, archive);
        let documents = RecordingDocumentStore::new();
        let publisher = RecordingPublisher::new();

        let error = handle_created_object(
            &sample_record(),
            &sample_config(),
            &staging,
            &documents,
            &publisher,
        )
        .expect_err("processing should fail");

        assert_eq!(error.kind, ProcessorErrorKind::InvalidMetadata);
        assert!(staging.deleted().is_empty());

        let messages = publisher.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "foo/docUpldAck/bar");
        let acknowledgement = published_acknowledgement(&publisher, 0);
        assert!(!acknowledgement.success);
        assert_eq!(acknowledgement.request_uuid, "NotFound");
    }

    #[test]
    fn undecodable_metadata_skips_acknowledgement() {
        let staging = FakeStagingStore::new(
            BTreeMap::from([("zz".to_string(), "zz".to_string())]),
            zip_fixture(&[("a.txt", b"alpha")]),
        );
        let documents = RecordingDocumentStore::new();
        let publisher = RecordingPublisher::new();

        let error = handle_created_object(
            &sample_record(),
            &sample_config(),
            &staging,
            &documents,
            &publisher,
        )
        .expect_err("processing should fail");

        assert_eq!(error.kind, ProcessorErrorKind::InvalidMetadata);
        assert!(publisher.messages().is_empty());
        assert!(staging.deleted().is_empty());
    }

    #[test]
    fn corrupt_archive_keeps_staged_object_and_acks_failure() {
        let staging = FakeStagingStore::new(
            sample_metadata("foo/docUpldReq/bar", "u-42"),
            b"not a zip archive".to_vec(),
        );
        let documents = RecordingDocumentStore::new();
        let publisher = RecordingPublisher::new();

        let error = handle_created_object(
            &sample_record(),
            &sample_config(),
            &staging,
            &documents,
            &publisher,
        )
        .expect_err("processing should fail");

        assert_eq!(error.kind, ProcessorErrorKind::Transport);
        assert!(staging.deleted().is_empty());

        let acknowledgement = published_acknowledgement(&publisher, 0);
        assert!(!acknowledgement.success);
        assert_eq!(acknowledgement.request_uuid, "u-42");
    }

    #[test]
    fn document_store_failure_keeps_staged_object() {
        let staging = FakeStagingStore::new(
            sample_metadata("foo/docUpldReq/bar", "u-42"),
            zip_fixture(&[("a.txt", b"alpha")]),
        );
        let publisher = RecordingPublisher::new();

        let error = handle_created_object(
            &sample_record(),
            &sample_config(),
            &staging,
            &FailingDocumentStore,
            &publisher,
        )
        .expect_err("processing should fail");

        assert_eq!(error.kind, ProcessorErrorKind::Transport);
        assert!(error.message.contains("simulated store failure"));
        assert!(staging.deleted().is_empty());

        let acknowledgement = published_acknowledgement(&publisher, 0);
        assert!(!acknowledgement.success);
        assert_eq!(acknowledgement.request_uuid, "u-42");
    }

    #[test]
    fn decodes_s3_notification_records() {
        let event = json!({
            "Records": [
                {
                    "eventSource": "aws:s3",
                    "s3": {
                        "bucket": { "name": "staging-bucket" },
                        "object": { "key": "3f3e9d1c-upload" }
                    }
                }
            ]
        });

        let records = decode_created_records(&event).expect("event should decode");
        assert_eq!(records, vec![sample_record()]);
    }

    #[test]
    fn rejects_event_without_records_array() {
        let error =
            decode_created_records(&json!({ "detail": {} })).expect_err("event should fail");
        assert!(error.contains("Records array"));
    }

    #[test]
    fn rejects_record_without_object_key() {
        let event = json!({
            "Records": [
                { "s3": { "bucket": { "name": "staging-bucket" } } }
            ]
        });

        let error = decode_created_records(&event).expect_err("event should fail");
        assert!(error.contains("s3.object.key"));
    }
}
