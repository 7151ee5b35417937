//! Commit provenance for ledger entries.

use std::{path::PathBuf, process::Command};

/// Recorded when no version-control context is available.
pub const UNKNOWN_COMMIT: &str = "unknown";

/// Source of the commit hash recorded with each ledger entry.
///
/// Lookups are best-effort: `None` means "no commit available" and is never an error.
pub trait CommitSource: Send + Sync {
    fn latest_commit_hash(&self) -> Option<String>;

    /// The commit hash, or [`UNKNOWN_COMMIT`].
    fn commit_or_sentinel(&self) -> String {
        self.latest_commit_hash()
            .unwrap_or_else(|| UNKNOWN_COMMIT.to_string())
    }
}

/// Reads `HEAD` of a git checkout.
#[derive(Debug, Clone, Default)]
pub struct GitCommitSource {
    repo_dir: Option<PathBuf>,
}

impl GitCommitSource {
    pub fn new(repo_dir: Option<PathBuf>) -> Self {
        Self { repo_dir }
    }
}

impl CommitSource for GitCommitSource {
    fn latest_commit_hash(&self) -> Option<String> {
        let mut cmd = Command::new("git");
        if let Some(dir) = &self.repo_dir {
            cmd.arg("-C").arg(dir);
        }
        cmd.args(["rev-parse", "HEAD"]);

        let output = match cmd.output() {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                tracing::warn!(
                    status = ?output.status,
                    "git rev-parse failed, recording unknown commit"
                );
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "git is not available, recording unknown commit");
                return None;
            }
        };

        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!hash.is_empty()).then_some(hash)
    }
}

/// A fixed commit hash, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticCommit(pub Option<String>);

impl CommitSource for StaticCommit {
    fn latest_commit_hash(&self) -> Option<String> {
        self.0.clone()
    }
}
