//! Approvals kept outside the bundle archive.
//!
//! Key layout: `approvals/<digest>/<role>-<user>-<unix ts>-<id>.json`, where
//! `<digest>` is the claimed bundle digest made path safe and `<id>` tells
//! apart identities that sanitize to the same name. Approvals are
//! grouped by the digest they claim; verification still binds them to the
//! bundle's recomputed digest.

use crate::bundle::LoadDefect;
use crate::repository::{Repository, RepositoryError, RepositoryResult};
use crate::types::{sanitize_component, Approval};

const PREFIX: &str = "approvals";

#[derive(Debug)]
pub struct ApprovalStore<R> {
    repo: R,
}

/// Approvals found under one digest plus the documents that did not parse.
#[derive(Debug, Default)]
pub struct StoredApprovals {
    pub approvals: Vec<Approval>,
    pub defects: Vec<LoadDefect>,
}

impl<R: Repository> ApprovalStore<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn key_for(approval: &Approval) -> String {
        format!(
            "{}{}",
            Self::digest_prefix(&approval.bundle_digest),
            approval.file_name()
        )
    }

    fn digest_prefix(digest: &str) -> String {
        format!("{PREFIX}/{}/", sanitize_component(digest))
    }

    /// Persist an approval; returns its key.
    pub fn save(&self, approval: &Approval) -> RepositoryResult<String> {
        let key = Self::key_for(approval);
        let bytes = serde_json::to_vec_pretty(approval).map_err(|e| RepositoryError::Io {
            key: key.clone(),
            source: e.into(),
        })?;
        self.repo.store(&key, &bytes)?;
        tracing::info!(key = %key, role = %approval.role, user = %approval.user, "approval stored");
        Ok(key)
    }

    /// Approvals stored for `digest`.
    pub fn load_for_digest(&self, digest: &str) -> RepositoryResult<StoredApprovals> {
        self.load_prefix(&Self::digest_prefix(digest))
    }

    /// Every stored approval, whatever digest it claims.
    pub fn load_all(&self) -> RepositoryResult<StoredApprovals> {
        self.load_prefix(&format!("{PREFIX}/"))
    }

    fn load_prefix(&self, prefix: &str) -> RepositoryResult<StoredApprovals> {
        let mut out = StoredApprovals::default();
        for key in self.repo.list(prefix)? {
            if !key.ends_with(".json") {
                continue;
            }
            let bytes = self.repo.load(&key)?;
            match serde_json::from_slice::<Approval>(&bytes) {
                Ok(approval) => out.approvals.push(approval),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping unreadable approval");
                    out.defects.push(LoadDefect {
                        entry: key,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(out)
    }
}
