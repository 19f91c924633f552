use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hash algorithm name (as reported by the remote) -> hex digest
pub type ArchiveHashes = BTreeMap<String, String>;

/// Identifies the remote archive the local mirror was last synchronized with.
/// Stored in `synced` inside the work directory.
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct SyncStamp {
    #[serde(default)]
    pub hashes: ArchiveHashes,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl SyncStamp {
    pub fn new(hashes: ArchiveHashes) -> Self {
        Self {
            hashes,
            synced_at: Some(Utc::now()),
        }
    }

    /// True when at least one algorithm is reported on both sides with the
    /// same digest. Remotes may expose different algorithms across calls, so a
    /// single agreeing algorithm is enough. Disjoint sets never match.
    pub fn matches(&self, remote: &ArchiveHashes) -> bool {
        self.hashes.iter().any(|(algorithm, digest)| {
            remote
                .get(algorithm)
                .is_some_and(|other| other.eq_ignore_ascii_case(digest))
        })
    }
}

/// Refs that changed locally but were not confirmed uploaded.
/// Stored in `upload_failed`; consumed by the next push attempt.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct RetrySet {
    refs: Vec<String>,
}

impl RetrySet {
    pub fn new(refs: impl IntoIterator<Item = String>) -> Self {
        let mut set = Self::default();
        set.extend(refs);
        set
    }

    /// Append refs, keeping first-seen order and skipping duplicates
    pub fn extend(&mut self, refs: impl IntoIterator<Item = String>) {
        for name in refs {
            if !self.refs.contains(&name) {
                self.refs.push(name);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn refs(&self) -> &[String] {
        &self.refs
    }

    pub fn into_refs(self) -> Vec<String> {
        self.refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashes(pairs: &[(&str, &str)]) -> ArchiveHashes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_any_shared_algorithm_matches() {
        let stamp = SyncStamp::new(hashes(&[("md5", "aaa")]));
        assert!(stamp.matches(&hashes(&[("sha1", "bbb"), ("md5", "aaa")])));
    }

    #[test]
    fn test_disjoint_algorithms_never_match() {
        let stamp = SyncStamp::new(hashes(&[("md5", "aaa")]));
        assert!(!stamp.matches(&hashes(&[("sha1", "aaa")])));
        assert!(!stamp.matches(&ArchiveHashes::new()));
    }

    #[test]
    fn test_differing_digest_does_not_match() {
        let stamp = SyncStamp::new(hashes(&[("md5", "aaa"), ("sha1", "bbb")]));
        assert!(!stamp.matches(&hashes(&[("md5", "ccc"), ("sha1", "ddd")])));
        assert!(stamp.matches(&hashes(&[("md5", "ccc"), ("sha1", "BBB")])));
    }

    #[test]
    fn test_retry_set_dedupes_in_order() {
        let mut set = RetrySet::new(vec!["refs/heads/a".to_string(), "refs/heads/b".to_string()]);
        set.extend(vec!["refs/heads/b".to_string(), "refs/heads/c".to_string()]);
        assert_eq!(set.refs(), ["refs/heads/a", "refs/heads/b", "refs/heads/c"]);
    }

    #[test]
    fn test_retry_set_yaml_is_a_plain_list() -> anyhow::Result<()> {
        let set = RetrySet::new(vec!["refs/heads/main".to_string()]);
        let yaml = serde_yaml::to_string(&set)?;
        assert_eq!(yaml.trim(), "- refs/heads/main");
        let back: RetrySet = serde_yaml::from_str(&yaml)?;
        assert_eq!(back, set);
        Ok(())
    }
}
