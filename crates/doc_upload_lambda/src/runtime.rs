pub use doc_upload_core::{checksum, contract, metadata, storage_keys, topics};
