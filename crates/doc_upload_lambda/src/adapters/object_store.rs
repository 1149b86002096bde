use std::collections::BTreeMap;
use std::path::Path;

pub trait StagingStore {
    fn object_metadata(&self, bucket: &str, key: &str) -> Result<BTreeMap<String, String>, String>;
    fn download_object(&self, bucket: &str, key: &str, destination: &Path) -> Result<(), String>;
    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), String>;
}

pub trait DocumentStore {
    fn store_document(&self, source: &Path, key: &str) -> Result<(), String>;
}
