//! AWS-oriented adapters and handlers for the document-upload workflow.
//!
//! This crate owns runtime integration details (Lambda handlers, presigned
//! URL issuance, staged-archive processing, and MQTT publishing adapters)
//! and exposes a single runtime module boundary for the shared contract,
//! codec, and topic primitives.

pub mod adapters;
pub mod handlers;
pub mod runtime;
