//! Derived node view and root-hash computation
//!
//! The node hierarchy is rebuilt from the flat entry map whenever a hash is
//! needed. It is never mutated on its own.

use crate::tree::hasher::{directory_hash, leaf_hash};
use crate::tree::FileEntry;
use crate::types::Digest;
use std::collections::BTreeMap;

/// Node kind, hashed as a tag so a file and a directory with the same name differ
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    pub(crate) fn tag(self) -> u8 {
        match self {
            NodeKind::File => 0x01,
            NodeKind::Directory => 0x02,
        }
    }
}

/// File node representation
#[derive(Debug, Clone)]
pub struct FileNode {
    pub path: String,
    pub content_hash: Digest,
    pub hash: Digest,
}

/// Directory node representation
#[derive(Debug, Clone)]
pub struct DirectoryNode {
    /// Directory path; empty for the root
    pub path: String,
    /// Children keyed by (name, kind), in canonical hash order
    pub children: BTreeMap<(String, NodeKind), TreeNode>,
    pub hash: Digest,
}

/// Tree node type
#[derive(Debug, Clone)]
pub enum TreeNode {
    File(FileNode),
    Directory(DirectoryNode),
}

impl TreeNode {
    pub fn hash(&self) -> Digest {
        match self {
            TreeNode::File(node) => node.hash,
            TreeNode::Directory(node) => node.hash,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            TreeNode::File(node) => &node.path,
            TreeNode::Directory(node) => &node.path,
        }
    }
}

impl DirectoryNode {
    /// Build the full hierarchy for an entry map
    pub fn build(entries: &BTreeMap<String, FileEntry>) -> DirectoryNode {
        let flat = entries
            .iter()
            .map(|(path, entry)| (path.as_str(), entry))
            .collect();
        build_directory(String::new(), flat)
    }

    /// Count of file leaves below this directory
    pub fn file_count(&self) -> usize {
        self.children
            .values()
            .map(|child| match child {
                TreeNode::File(_) => 1,
                TreeNode::Directory(dir) => dir.file_count(),
            })
            .sum()
    }

    /// Find the node for a directory or file path
    pub fn find(&self, path: &str) -> Option<&TreeNode> {
        let (head, rest) = match path.split_once('/') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        match rest {
            None => self
                .children
                .get(&(head.to_string(), NodeKind::File))
                .or_else(|| self.children.get(&(head.to_string(), NodeKind::Directory))),
            Some(rest) => match self.children.get(&(head.to_string(), NodeKind::Directory)) {
                Some(TreeNode::Directory(dir)) => dir.find(rest),
                _ => None,
            },
        }
    }
}

fn build_directory(path: String, entries: Vec<(&str, &FileEntry)>) -> DirectoryNode {
    let mut children = BTreeMap::new();
    let mut subdirs: BTreeMap<&str, Vec<(&str, &FileEntry)>> = BTreeMap::new();

    for (relative, entry) in entries {
        match relative.split_once('/') {
            None => {
                let node = FileNode {
                    path: entry.path.clone(),
                    content_hash: entry.content_hash,
                    hash: leaf_hash(&entry.path, &entry.content_hash),
                };
                children.insert((relative.to_string(), NodeKind::File), TreeNode::File(node));
            }
            Some((head, rest)) => subdirs.entry(head).or_default().push((rest, entry)),
        }
    }

    for (name, group) in subdirs {
        let child_path = if path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", path, name)
        };
        let node = build_directory(child_path, group);
        children.insert(
            (name.to_string(), NodeKind::Directory),
            TreeNode::Directory(node),
        );
    }

    let hash = directory_hash(
        children
            .iter()
            .map(|((name, kind), node)| (name.as_str(), *kind, node.hash())),
    );

    DirectoryNode {
        path,
        children,
        hash,
    }
}
