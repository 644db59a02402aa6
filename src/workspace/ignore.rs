//! Ignore rules for scanning and watching.
//!
//! Patterns are matched against normalized tree paths, segment by segment:
//! `**` spans any number of segments, `*` and `?` match within one segment.

use serde::{Deserialize, Serialize};

/// Files the engine itself creates or owns
pub const TEMP_FILE_MARKER: &str = ".hashsync-tmp-";

pub fn default_ignore_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/.hashsync/**".to_string(),
        ".hashsync.toml".to_string(),
        format!("**/*{}*", TEMP_FILE_MARKER),
        "**/.DS_Store".to_string(),
        "**/*.swp".to_string(),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IgnoreRules {
    patterns: Vec<String>,
}

impl IgnoreRules {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether the tree path `path` is excluded
    pub fn is_ignored(&self, path: &str) -> bool {
        let path = path.replace('\\', "/");
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.patterns.iter().any(|pattern| {
            let pattern = pattern.replace('\\', "/");
            let parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
            matches_segments(&parts, &segments)
        })
    }
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::new(default_ignore_patterns())
    }
}

fn matches_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => (0..=path.len()).any(|skip| matches_segments(rest, &path[skip..])),
        Some((head, rest)) => match path.split_first() {
            Some((segment, remaining)) => {
                matches_glob(head.as_bytes(), segment.as_bytes()) && matches_segments(rest, remaining)
            }
            None => false,
        },
    }
}

fn matches_glob(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| matches_glob(rest, &text[skip..])),
        Some((b'?', rest)) => !text.is_empty() && matches_glob(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && matches_glob(rest, &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules() {
        let rules = IgnoreRules::default();
        assert!(rules.is_ignored(".git/config"));
        assert!(rules.is_ignored("sub/.git/objects/ab"));
        assert!(rules.is_ignored(".hashsync.toml"));
        assert!(rules.is_ignored("docs/.a.txt.hashsync-tmp-12"));
        assert!(rules.is_ignored("notes/.DS_Store"));
        assert!(!rules.is_ignored("docs/a.txt"));
        assert!(!rules.is_ignored("docs/a.conflict-1f2e3d4c.txt"));
        assert!(!rules.is_ignored("sub/.hashsync.toml"));
    }

    #[test]
    fn test_glob_segments() {
        let rules = IgnoreRules::new(vec!["build/*.o".to_string(), "**/cache/**".to_string()]);
        assert!(rules.is_ignored("build/main.o"));
        assert!(!rules.is_ignored("build/sub/main.o"));
        assert!(rules.is_ignored("a/b/cache/x"));
        assert!(rules.is_ignored("cache/x/y"));
        assert!(!rules.is_ignored("cachex/y"));
    }

    #[test]
    fn test_question_mark() {
        let rules = IgnoreRules::new(vec!["**/?.tmp".to_string()]);
        assert!(rules.is_ignored("a.tmp"));
        assert!(!rules.is_ignored("ab.tmp"));
    }
}
