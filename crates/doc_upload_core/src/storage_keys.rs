//! Destination-store key construction.
//!
//! Every file extracted from one staged archive lands under the partition
//! equal to the originating request topic, preserving the path the file had
//! inside the archive.

pub fn document_object_key(partition: &str, relative_path: &str) -> String {
    let partition = partition.trim_matches('/');
    let relative_path = relative_path.trim_matches('/');
    format!("{partition}/{relative_path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_key_under_the_topic_partition() {
        let key = document_object_key("foo/docUpldReq/bar", "a.txt");
        assert_eq!(key, "foo/docUpldReq/bar/a.txt");
    }

    #[test]
    fn preserves_nested_relative_paths() {
        let key = document_object_key("foo/docUpldReq/bar", "sub/b.txt");
        assert_eq!(key, "foo/docUpldReq/bar/sub/b.txt");
    }

    #[test]
    fn trims_stray_separators() {
        let key = document_object_key("/foo/docUpldReq/bar/", "/a.txt");
        assert_eq!(key, "foo/docUpldReq/bar/a.txt");
    }
}
