use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignPutRequest {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    /// Base64 `Content-MD5` the uploader must send; part of the signature.
    pub content_md5: String,
    /// Hex-encoded custom metadata, signed into the URL as `x-amz-meta-*`.
    pub metadata: BTreeMap<String, String>,
    pub expire_secs: u64,
}

pub trait UploadUrlSigner {
    fn presign_put(&self, request: &PresignPutRequest) -> Result<String, String>;
}
