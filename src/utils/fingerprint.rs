/// SHA-256 identity of graded source text
use sha2::{Digest, Sha256};

/// Hex SHA-256 of the source a test actually ran against
pub fn source_fingerprint(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("clipy-{}", env!("CARGO_PKG_VERSION")));
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())
}
