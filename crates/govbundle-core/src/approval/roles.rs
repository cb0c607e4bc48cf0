//! Required-role accounting.

use crate::types::ApprovalIdentity;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Which required roles are covered by valid approvals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleCoverage {
    /// Role -> users with a valid approval for it.
    pub satisfied: BTreeMap<String, BTreeSet<String>>,
    pub missing: BTreeSet<String>,
}

impl RoleCoverage {
    /// Coverage of `required` by `valid`. Approvals for roles that are not
    /// required are ignored. Role names compare exactly.
    pub fn compute<'r, 'v>(
        required: impl IntoIterator<Item = &'r str>,
        valid: impl IntoIterator<Item = &'v ApprovalIdentity>,
    ) -> Self {
        let required: BTreeSet<&str> = required.into_iter().collect();
        let mut satisfied: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for identity in valid {
            if required.contains(identity.role.as_str()) {
                satisfied
                    .entry(identity.role.clone())
                    .or_default()
                    .insert(identity.user.clone());
            }
        }
        let missing = required
            .into_iter()
            .filter(|role| !satisfied.contains_key(*role))
            .map(str::to_string)
            .collect();
        Self { satisfied, missing }
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}
