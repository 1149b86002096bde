use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::contract::ValidationError;

pub const MD5_HEX_LEN: usize = 32;

/// Converts the usual hex rendering of an MD5 digest into the base64 form S3
/// expects in the `Content-MD5` binding of a presigned PUT.
pub fn md5_hex_to_base64(md5_hex: &str) -> Result<String, ValidationError> {
    if md5_hex.len() != MD5_HEX_LEN {
        return Err(ValidationError::new(format!(
            "md5 checksum must be {MD5_HEX_LEN} hex characters, got {}",
            md5_hex.len()
        )));
    }

    let digest = hex::decode(md5_hex)
        .map_err(|error| ValidationError::new(format!("md5 checksum is not valid hex: {error}")))?;

    Ok(STANDARD.encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_the_empty_file_digest() {
        let encoded = md5_hex_to_base64("d41d8cd98f00b204e9800998ecf8427e")
            .expect("well-formed checksum should encode");

        assert_eq!(encoded, "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn base64_decodes_back_to_the_raw_digest_bytes() {
        let md5_hex = "9e107d9d372bb6826bd81d3542a419d6";
        let encoded = md5_hex_to_base64(md5_hex).expect("well-formed checksum should encode");

        let raw = STANDARD.decode(encoded).expect("output should be base64");
        assert_eq!(raw, hex::decode(md5_hex).expect("input is hex"));
    }

    #[test]
    fn accepts_uppercase_hex() {
        let encoded = md5_hex_to_base64("D41D8CD98F00B204E9800998ECF8427E")
            .expect("uppercase checksum should encode");

        assert_eq!(encoded, "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn rejects_wrong_length() {
        let error = md5_hex_to_base64("d41d8c").expect_err("short checksum should fail");
        assert!(error.message().contains("32 hex characters"));
    }

    #[test]
    fn rejects_non_hex_characters() {
        let error = md5_hex_to_base64("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz")
            .expect_err("non-hex checksum should fail");
        assert!(error.message().contains("not valid hex"));
    }
}
