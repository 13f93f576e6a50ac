//! Identity resolution: which vault object (if any) mirrors a CRM record.
//!
//! The vault has no uniqueness constraint on the correlation properties, so
//! "at most one vault object per CRM record" only holds because every create
//! is preceded by a resolve.

use crate::ids::{ExternalId, ObjectKind, VaultObjectRef, defs};
use crate::vault::{PropertyFilter, VaultClient, VaultError};

use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("{count} vault {kind} objects carry external id {external_id}: {ids:?}")]
    DuplicateRecords {
        kind: ObjectKind,
        external_id: ExternalId,
        count: usize,
        ids: Vec<i64>,
    },
}

/// What to do when several vault objects carry the same external id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Use the first object the vault returns and log the others.
    #[default]
    FirstWins,
    /// Fail the resolve with `ResolveError::DuplicateRecords`.
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" | "first-wins" => Ok(DuplicatePolicy::FirstWins),
            "reject" => Ok(DuplicatePolicy::Reject),
            other => Err(format!("unknown duplicate policy: {}", other)),
        }
    }
}

/// Outcome of a resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Found(VaultObjectRef),
    Missing,
}

impl Resolution {
    pub fn exists(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }

    pub fn internal_id(&self) -> Option<i64> {
        match self {
            Resolution::Found(r) => Some(r.internal_id),
            Resolution::Missing => None,
        }
    }
}

pub struct IdentityResolver<'a> {
    vault: &'a dyn VaultClient,
    policy: DuplicatePolicy,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(vault: &'a dyn VaultClient) -> Self {
        Self {
            vault,
            policy: DuplicatePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Look up the vault object mirroring `external_id`. Never creates.
    pub async fn resolve(
        &self,
        kind: ObjectKind,
        external_id: &ExternalId,
    ) -> Result<Resolution, ResolveError> {
        let filters = [
            PropertyFilter::new(defs::EXTERNAL_ID, external_id.as_str()),
            PropertyFilter::new(defs::EXTERNAL_TYPE, kind.crm_type_id()),
        ];
        let hits = self.vault.find_objects(kind.object_type(), &filters).await?;

        let Some(first) = hits.first() else {
            debug!("No vault {} for external id {}", kind, external_id);
            return Ok(Resolution::Missing);
        };

        if hits.len() > 1 {
            let ids: Vec<i64> = hits.iter().map(|h| h.obj_ver.id).collect();
            match self.policy {
                DuplicatePolicy::FirstWins => {
                    warn!(
                        "{} vault {} objects for external id {} ({:?}), using {}",
                        hits.len(),
                        kind,
                        external_id,
                        ids,
                        first.obj_ver.id
                    );
                }
                DuplicatePolicy::Reject => {
                    return Err(ResolveError::DuplicateRecords {
                        kind,
                        external_id: external_id.clone(),
                        count: ids.len(),
                        ids,
                    });
                }
            }
        }

        debug!(
            "Resolved {} {} to vault id {}",
            kind, external_id, first.obj_ver.id
        );
        Ok(Resolution::Found(VaultObjectRef::new(kind, first.obj_ver.id)))
    }
}
