//! Shared document-upload domain primitives.
//!
//! This crate owns the MQTT wire contracts, the object-metadata codec, and
//! topic/key derivation. It intentionally excludes AWS SDK and Lambda
//! runtime concerns, which live in `crates/doc_upload_lambda`.

pub mod checksum;
pub mod contract;
pub mod metadata;
pub mod storage_keys;
pub mod topics;
