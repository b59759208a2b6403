//! Runtime configuration: where state lives and what's on the ballot.
//!
//! A deployment of this service is parameterized by one directory on disk
//! and a fixed candidate list decided at election setup time. Both are
//! collected here so [`crate::main`] has a single place to wire from.

use std::path::{Path, PathBuf};

/// The candidate list for this election. Fixed at compile time since
/// changing candidates after ballots have been cast would invalidate the
/// ledger's tallies; a real deployment would read this from the same
/// directory as the rest of its state, generated at election setup.
pub const CANDIDATES: &[&str] = &["alice", "bob", "carol"];

/// Filesystem layout for one running instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory this instance owns. Everything it persists lives
    /// under here, so wiping the directory resets the instance entirely.
    pub data_dir: PathBuf,
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// The SQLite file backing the voter registry and issuer keystore.
    pub fn registry_db_path(&self) -> PathBuf {
        self.data_dir.join("registry.db")
    }

    /// The JSON file backing the hash-chained ballot ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger.json")
    }

    pub fn ensure_data_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

/// True iff `candidate` is on the fixed ballot.
pub fn is_valid_candidate(candidate: &str) -> bool {
    CANDIDATES.contains(&candidate)
}

pub fn data_dir_from_env(default: impl AsRef<Path>) -> PathBuf {
    std::env::var_os("ANONVOTE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| default.as_ref().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_validation() {
        assert!(is_valid_candidate("alice"));
        assert!(!is_valid_candidate("dave"));
    }

    #[test]
    fn paths_are_nested_under_data_dir() {
        let config = Config::new("/tmp/anonvote-test");
        assert_eq!(
            config.registry_db_path(),
            PathBuf::from("/tmp/anonvote-test/registry.db")
        );
        assert_eq!(
            config.ledger_path(),
            PathBuf::from("/tmp/anonvote-test/ledger.json")
        );
    }
}
