//! Key schemes (spec §4.7).

/// `search:v1:<sha256(query_params_canonical_json)>`.
pub fn search_key(canonical_params_json: &str) -> String {
    format!("search:v1:{}", sha256_hex(canonical_params_json))
}

pub fn chunks_repo_key(repository: &str) -> String {
    format!("chunks:repo:{repository}")
}

pub fn chunks_file_key(repository: &str, file_path: &str) -> String {
    format!("chunks:file:{repository}:{file_path}")
}

pub fn memory_list_key(canonical_uri: &str) -> String {
    format!("memory_list:{}", sha256_hex(canonical_uri))
}

pub fn memory_search_key(canonical_uri: &str) -> String {
    format!("memory_search:{}", sha256_hex(canonical_uri))
}

fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(input.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_spec_schemes() {
        assert!(chunks_repo_key("demo") == "chunks:repo:demo");
        assert!(chunks_file_key("demo", "a.py") == "chunks:file:demo:a.py");
        assert!(search_key("{}").starts_with("search:v1:"));
        assert!(memory_list_key("uri").starts_with("memory_list:"));
    }
}
