//! Structural and verbatim-source tree records (spec.md §3, §4.4).

use crate::primitives::FileId;
use serde::{Deserialize, Serialize};

/// Serialized structural tree for a file, produced by the parser
/// (spec.md §4.4 "a structural tree serializable to a deterministic
/// binary/textual form"). Exactly one active record exists per file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxTreeRecord {
    /// Owning file.
    pub file_id: FileId,
    /// Deterministic serialized form of the structural tree.
    pub serialized: Vec<u8>,
    /// Content hash of `serialized`, for fixed-point / idempotence checks.
    pub content_hash: String,
}

impl SyntaxTreeRecord {
    /// Construct a syntax tree record, hashing the serialized payload.
    #[must_use]
    pub fn new(file_id: FileId, serialized: Vec<u8>) -> Self {
        let content_hash = hash_bytes(&serialized);
        Self {
            file_id,
            serialized,
            content_hash,
        }
    }

    /// True when `other` carries the same content hash (fixed-point check
    /// for "parsing then re-serializing is a fixed point on unchanged
    /// source", spec.md §8).
    #[must_use]
    pub fn matches_content(&self, other: &Self) -> bool {
        self.content_hash == other.content_hash
    }
}

/// Verbatim source text for a file, cached by the Storage Engine so the
/// filesystem remains the canonical owner while SE serves fast reads.
/// Exactly one active record per file; lifetime parallels
/// [`SyntaxTreeRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcreteTreeRecord {
    /// Owning file.
    pub file_id: FileId,
    /// Verbatim source text at last successful parse.
    pub source_text: String,
    /// Content hash of `source_text`.
    pub content_hash: String,
}

impl ConcreteTreeRecord {
    /// Construct a concrete tree record, hashing the source text.
    #[must_use]
    pub fn new(file_id: FileId, source_text: String) -> Self {
        let content_hash = hash_bytes(source_text.as_bytes());
        Self {
            file_id,
            source_text,
            content_hash,
        }
    }
}

fn hash_bytes(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_id() -> FileId {
        FileId::new(1).expect("valid file id")
    }

    #[test]
    fn syntax_tree_records_with_identical_bytes_match() {
        let first = SyntaxTreeRecord::new(file_id(), b"tree-bytes".to_vec());
        let second = SyntaxTreeRecord::new(file_id(), b"tree-bytes".to_vec());
        assert!(first.matches_content(&second));
    }

    #[test]
    fn syntax_tree_records_with_different_bytes_do_not_match() {
        let first = SyntaxTreeRecord::new(file_id(), b"tree-bytes-a".to_vec());
        let second = SyntaxTreeRecord::new(file_id(), b"tree-bytes-b".to_vec());
        assert!(!first.matches_content(&second));
    }

    #[test]
    fn concrete_tree_hash_is_deterministic() {
        let first = ConcreteTreeRecord::new(file_id(), "def f(): pass".to_owned());
        let second = ConcreteTreeRecord::new(file_id(), "def f(): pass".to_owned());
        assert_eq!(first.content_hash, second.content_hash);
    }
}
