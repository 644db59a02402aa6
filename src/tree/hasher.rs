//! Hash computation for tree nodes and file content
//!
//! File content is addressed by SHA-256. Tree nodes are combined with BLAKE3
//! over domain-separated, length-prefixed input so that no two distinct child
//! lists can serialize to the same byte stream.

use crate::tree::node::NodeKind;
use crate::types::Digest;
use sha2::{Digest as _, Sha256};

const LEAF_DOMAIN: &[u8] = b"hashsync:leaf\0";
const DIRECTORY_DOMAIN: &[u8] = b"hashsync:dir\0";

/// SHA-256 of file bytes; the content-addressing key
pub fn content_hash(bytes: &[u8]) -> Digest {
    let digest = Sha256::digest(bytes);
    Digest(digest.into())
}

/// Incremental SHA-256 for callers that stream file content
#[derive(Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finalize(self) -> Digest {
        Digest(self.inner.finalize().into())
    }
}

/// Leaf hash: binds a file's full path to its content hash
pub fn leaf_hash(path: &str, content_hash: &Digest) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(LEAF_DOMAIN);
    hasher.update(&(path.len() as u64).to_le_bytes());
    hasher.update(path.as_bytes());
    hasher.update(content_hash.as_bytes());
    Digest(*hasher.finalize().as_bytes())
}

/// Directory hash over `(name, kind, hash)` children
///
/// Children must be supplied in their canonical order (name, then kind); the
/// child count is hashed first.
pub fn directory_hash<'a, I>(children: I) -> Digest
where
    I: IntoIterator<Item = (&'a str, NodeKind, Digest)>,
    I::IntoIter: ExactSizeIterator,
{
    let children = children.into_iter();
    let mut hasher = blake3::Hasher::new();
    hasher.update(DIRECTORY_DOMAIN);
    hasher.update(&(children.len() as u64).to_le_bytes());
    for (name, kind, hash) in children {
        hasher.update(&(name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update(&[kind.tag()]);
        hasher.update(hash.as_bytes());
    }
    Digest(*hasher.finalize().as_bytes())
}

/// Root hash of a tree with no entries
pub fn empty_root() -> Digest {
    directory_hash(std::iter::empty())
}
