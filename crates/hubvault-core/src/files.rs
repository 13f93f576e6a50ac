//! File-list reconciliation between a company and the CRM file manager.
//!
//! A company keeps the files attached to it as a JSON array in its `files`
//! property. Files deleted from the file manager leave stale entries behind;
//! reconciling drops every entry whose id is no longer listed.

use crate::crm::{CrmClient, CrmError, CrmObject};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

/// Company property holding the JSON-encoded file list.
pub const FILES_PROPERTY: &str = "files";

/// Message of the result returned for a company the CRM doesn't know.
pub const COMPANY_NOT_FOUND: &str = "Company not found";

/// A CRM file attached to a company.
///
/// Only `id` is interpreted. Everything else (`name`, `url`, `size`, `type`
/// and unknown keys) is kept verbatim, whatever its JSON type, so a rewrite
/// doesn't lose or reshape data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReference {
    pub id: String,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl FileReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Display name, when stored as a string.
    pub fn name(&self) -> Option<&str> {
        self.metadata.get("name").and_then(|v| v.as_str())
    }
}

/// Parse a stored file list.
///
/// Missing, blank or malformed JSON yields an empty list. Array elements
/// that aren't file references are dropped.
pub fn parse_file_list(raw: Option<&str>) -> Vec<FileReference> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Vec::new();
    };

    let items: Vec<serde_json::Value> = match serde_json::from_str(raw) {
        Ok(items) => items,
        Err(e) => {
            warn!("Stored file list is not a JSON array, treating as empty: {}", e);
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(file) => Some(file),
            Err(e) => {
                debug!("Dropping invalid file reference: {}", e);
                None
            }
        })
        .collect()
}

/// Ids of every file in the file manager, following the cursor to the last page.
///
/// Any page failure aborts the listing; partial results are discarded.
pub async fn list_all_file_ids(crm: &dyn CrmClient) -> Result<HashSet<String>, CrmError> {
    let mut ids = HashSet::new();
    let mut after: Option<String> = None;
    let mut pages = 0;

    loop {
        let page = crm.list_files(after.as_deref()).await?;
        pages += 1;
        ids.extend(page.results.into_iter().map(|f| f.id));

        match page.next_after {
            Some(next) => after = Some(next),
            None => break,
        }
    }

    debug!("File manager lists {} file(s) over {} page(s)", ids.len(), pages);
    Ok(ids)
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub enum FileReconcileOutcome {
    CompanyNotFound,
    Reconciled {
        /// Company as returned by the CRM after the write
        company: CrmObject,
        kept: Vec<FileReference>,
        removed: Vec<FileReference>,
    },
}

/// JSON summary of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport<'a> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<&'a CrmObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kept: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<&'a str>,
}

impl FileReconcileOutcome {
    pub fn report(&self) -> ReconcileReport<'_> {
        match self {
            FileReconcileOutcome::CompanyNotFound => ReconcileReport {
                success: false,
                message: Some(COMPANY_NOT_FOUND),
                company: None,
                kept: None,
                removed: Vec::new(),
            },
            FileReconcileOutcome::Reconciled {
                company,
                kept,
                removed,
            } => ReconcileReport {
                success: true,
                message: None,
                company: Some(company),
                kept: Some(kept.len()),
                removed: removed.iter().map(|f| f.id.as_str()).collect(),
            },
        }
    }
}

/// Drop file references the file manager no longer lists, then write the list back.
///
/// The list is written even when nothing changed.
#[instrument(level = "info", skip(crm))]
pub async fn reconcile_company_files(
    crm: &dyn CrmClient,
    company_id: &str,
) -> Result<FileReconcileOutcome, CrmError> {
    let company = match crm.get_company(company_id, &[FILES_PROPERTY], &[]).await {
        Ok(company) => company,
        Err(CrmError::NotFound(_)) => {
            info!("Company {} not found in CRM", company_id);
            return Ok(FileReconcileOutcome::CompanyNotFound);
        }
        Err(e) => return Err(e),
    };

    let stored = parse_file_list(company.property(FILES_PROPERTY));
    let live = list_all_file_ids(crm).await?;

    let (kept, removed): (Vec<_>, Vec<_>) =
        stored.into_iter().partition(|f| live.contains(&f.id));

    let serialized =
        serde_json::to_string(&kept).map_err(|e| CrmError::Malformed(e.to_string()))?;
    let company = crm
        .update_company_property(company_id, FILES_PROPERTY, &serialized)
        .await?;

    info!(
        "Company {} files reconciled: {} kept, {} removed",
        company_id,
        kept.len(),
        removed.len()
    );
    Ok(FileReconcileOutcome::Reconciled {
        company,
        kept,
        removed,
    })
}
