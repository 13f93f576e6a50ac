//! SyncEngine: Mirrors a CRM company and its contacts into the vault.
//!
//! One synchronization run goes through these steps:
//!
//! 1. Fetch the company from the CRM with its linked contacts. A missing
//!    company ends the run with a non-success result and no vault writes.
//! 2. Resolve the company's vault object, then create it (first sync) or
//!    update its business properties (later syncs).
//! 3. For each distinct linked contact, in CRM order: fetch it, resolve it,
//!    then create it linked to the company or update it and its association.
//!
//! Contacts are processed one at a time. Nothing is rolled back when a
//! contact fails; `ContactFailurePolicy` decides whether the run continues.

use crate::crm::{CrmClient, CrmError, CrmObject};
use crate::ids::{ExternalId, IdError, ObjectKind, defs};
use crate::mapper::{self, WriteMode};
use crate::resolver::{DuplicatePolicy, IdentityResolver, ResolveError, Resolution};
use crate::vault::{VaultClient, VaultError};

use serde::Serialize;
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Message of the result returned for a company the CRM doesn't know.
pub const COMPANY_NOT_FOUND: &str = "Company not found in HubSpot";

/// Association path of a company's contacts in the CRM.
const CONTACTS_ASSOCIATION: &str = "contacts";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("CRM error: {0}")]
    Crm(#[from] CrmError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Invalid id: {0}")]
    InvalidId(#[from] IdError),

    #[error("{} vault {kind} objects carry external id {external_id}: {ids:?}", .ids.len())]
    DuplicateRecords {
        kind: ObjectKind,
        external_id: ExternalId,
        ids: Vec<i64>,
    },
}

impl From<ResolveError> for SyncError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Vault(e) => SyncError::Vault(e),
            ResolveError::DuplicateRecords {
                kind,
                external_id,
                ids,
                ..
            } => SyncError::DuplicateRecords {
                kind,
                external_id,
                ids,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// What happens when one contact of a company cannot be synchronized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContactFailurePolicy {
    /// Record the failure in the result and continue with the next contact.
    #[default]
    Collect,
    /// Abort the run with the contact's error.
    Abort,
}

impl FromStr for ContactFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "collect" => Ok(ContactFailurePolicy::Collect),
            "abort" => Ok(ContactFailurePolicy::Abort),
            other => Err(format!("unknown contact failure policy: {}", other)),
        }
    }
}

/// How an existing contact's company list is rewritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AssociationMode {
    /// The synced company becomes the contact's only company.
    #[default]
    Replace,
    /// The synced company is appended to the contact's companies if missing.
    Merge,
}

impl FromStr for AssociationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "replace" => Ok(AssociationMode::Replace),
            "merge" => Ok(AssociationMode::Merge),
            other => Err(format!("unknown association mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub duplicates: DuplicatePolicy,
    pub contact_failures: ContactFailurePolicy,
    pub associations: AssociationMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Created,
    Updated,
}

/// Step of the contact loop at which a contact failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStage {
    Fetch,
    Resolve,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactFailure {
    pub contact_id: String,
    pub stage: ContactStage,
    pub error: String,
}

/// Externally visible outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<SyncAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mf_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_contacts: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_contacts: Vec<ContactFailure>,
}

impl SyncResult {
    /// Non-success result for a record the CRM doesn't have.
    pub fn not_found(message: &str) -> Self {
        Self {
            success: false,
            action: None,
            mf_id: None,
            linked_contacts: None,
            message: Some(message.to_string()),
            failed_contacts: Vec::new(),
        }
    }
}

/// A contact that failed, with the step it failed at.
struct ContactError {
    stage: ContactStage,
    error: SyncError,
}

impl ContactError {
    fn at(stage: ContactStage) -> impl FnOnce(SyncError) -> Self {
        move |error| Self { stage, error }
    }
}

/// Drives one company (and its contacts) from the CRM into the vault.
pub struct SyncEngine<'a> {
    crm: &'a dyn CrmClient,
    vault: &'a dyn VaultClient,
    options: SyncOptions,
}

impl<'a> SyncEngine<'a> {
    pub fn new(crm: &'a dyn CrmClient, vault: &'a dyn VaultClient) -> Self {
        Self {
            crm,
            vault,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    fn resolver(&self) -> IdentityResolver<'a> {
        IdentityResolver::new(self.vault).with_policy(self.options.duplicates)
    }

    /// Create or update the vault mirror of a CRM company and its contacts.
    ///
    /// A company missing from the CRM is a normal outcome (`success: false`).
    /// Any other CRM or vault failure on the company itself is returned as an error.
    #[instrument(level = "info", skip(self))]
    pub async fn synchronize_company(&self, company_id: &str) -> Result<SyncResult> {
        let company = match self
            .crm
            .get_company(
                company_id,
                mapper::crm_properties(ObjectKind::Company),
                &[CONTACTS_ASSOCIATION],
            )
            .await
        {
            Ok(company) => company,
            Err(CrmError::NotFound(_)) => {
                info!("Company {} not found in CRM", company_id);
                return Ok(SyncResult::not_found(COMPANY_NOT_FOUND));
            }
            Err(e) => return Err(e.into()),
        };

        let (action, mf_company_id) = self.upsert_company(&company).await?;

        let contact_ids = dedupe(company.associated_ids(CONTACTS_ASSOCIATION));
        debug!(
            "Company {} has {} linked contact(s)",
            company.id,
            contact_ids.len()
        );

        let mut linked = 0;
        let mut failed_contacts = Vec::new();
        for contact_id in &contact_ids {
            match self.sync_contact(contact_id, mf_company_id).await {
                Ok(()) => linked += 1,
                Err(failure) => match self.options.contact_failures {
                    ContactFailurePolicy::Abort => return Err(failure.error),
                    ContactFailurePolicy::Collect => {
                        warn!(
                            "Contact {} failed at {:?}: {}",
                            contact_id, failure.stage, failure.error
                        );
                        failed_contacts.push(ContactFailure {
                            contact_id: contact_id.clone(),
                            stage: failure.stage,
                            error: failure.error.to_string(),
                        });
                    }
                },
            }
        }

        info!(
            "Synchronized company {} -> vault {} ({:?}, {} contact(s) linked, {} failed)",
            company.id,
            mf_company_id,
            action,
            linked,
            failed_contacts.len()
        );

        Ok(SyncResult {
            success: true,
            action: Some(action),
            mf_id: Some(mf_company_id),
            linked_contacts: Some(linked),
            message: None,
            failed_contacts,
        })
    }

    /// Resolve the company, then create or update it. Returns the vault id.
    async fn upsert_company(&self, company: &CrmObject) -> Result<(SyncAction, i64)> {
        let external_id = ExternalId::new(company.id.as_str())?;
        let kind = ObjectKind::Company;

        match self.resolver().resolve(kind, &external_id).await? {
            Resolution::Missing => {
                let properties = mapper::to_vault_properties(
                    kind,
                    &company.properties,
                    WriteMode::Create {
                        external_id: &external_id,
                    },
                );
                let ver = self
                    .vault
                    .create_object(kind.object_type(), &properties, &[])
                    .await?;
                info!("Created vault company {} for {}", ver.id, external_id);
                Ok((SyncAction::Created, ver.id))
            }
            Resolution::Found(existing) => {
                let properties =
                    mapper::to_vault_properties(kind, &company.properties, WriteMode::Update);
                self.vault
                    .update_properties(kind.object_type(), existing.internal_id, &properties)
                    .await?;
                debug!(
                    "Updated vault company {} for {}",
                    existing.internal_id, external_id
                );
                Ok((SyncAction::Updated, existing.internal_id))
            }
        }
    }

    async fn sync_contact(
        &self,
        contact_id: &str,
        mf_company_id: i64,
    ) -> std::result::Result<(), ContactError> {
        let kind = ObjectKind::Contact;
        let external_id = ExternalId::new(contact_id)
            .map_err(|e| ContactError::at(ContactStage::Fetch)(e.into()))?;

        let contact = self
            .crm
            .get_contact(contact_id)
            .await
            .map_err(|e| ContactError::at(ContactStage::Fetch)(e.into()))?;

        let resolution = self
            .resolver()
            .resolve(kind, &external_id)
            .await
            .map_err(|e| ContactError::at(ContactStage::Resolve)(e.into()))?;

        self.write_contact(&contact, &external_id, resolution, mf_company_id)
            .await
            .map_err(ContactError::at(ContactStage::Write))
    }

    async fn write_contact(
        &self,
        contact: &CrmObject,
        external_id: &ExternalId,
        resolution: Resolution,
        mf_company_id: i64,
    ) -> Result<()> {
        let kind = ObjectKind::Contact;

        match resolution {
            Resolution::Missing => {
                let mut properties = mapper::to_vault_properties(
                    kind,
                    &contact.properties,
                    WriteMode::Create { external_id },
                );
                properties.push(mapper::association_property([mf_company_id]));
                let ver = self
                    .vault
                    .create_object(kind.object_type(), &properties, &[])
                    .await?;
                debug!("Created vault contact {} for {}", ver.id, external_id);
            }
            Resolution::Found(existing) => {
                let companies = self
                    .companies_for(existing.internal_id, mf_company_id)
                    .await?;
                let mut properties =
                    mapper::to_vault_properties(kind, &contact.properties, WriteMode::Update);
                properties.push(mapper::association_property(companies));
                self.vault
                    .update_properties(kind.object_type(), existing.internal_id, &properties)
                    .await?;
                debug!(
                    "Updated vault contact {} for {}",
                    existing.internal_id, external_id
                );
            }
        }
        Ok(())
    }

    /// Company list to write on an existing contact.
    async fn companies_for(&self, contact_id: i64, mf_company_id: i64) -> Result<Vec<i64>> {
        match self.options.associations {
            AssociationMode::Replace => Ok(vec![mf_company_id]),
            AssociationMode::Merge => {
                let current = self
                    .vault
                    .get_properties(ObjectKind::Contact.object_type(), contact_id)
                    .await?;
                let mut companies = mapper::lookup_ids(&current, defs::COMPANIES);
                if !companies.contains(&mf_company_id) {
                    companies.push(mf_company_id);
                }
                Ok(companies)
            }
        }
    }
}

/// Drop repeated ids, keeping the first occurrence.
fn dedupe(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
