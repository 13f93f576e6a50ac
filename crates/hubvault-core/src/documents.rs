//! Listing of the vault documents attached to a CRM company or contact.

use crate::ids::{ExternalId, ObjectKind, ObjectType};
use crate::resolver::{DuplicatePolicy, IdentityResolver, Resolution};
use crate::sync_engine::Result;
use crate::vault::{ObjectFile, PropertyFilter, VaultClient, VaultObject};

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFile {
    pub id: i64,
    pub name: String,
    pub extension: String,
    pub size: u64,
}

impl From<ObjectFile> for DocumentFile {
    fn from(file: ObjectFile) -> Self {
        Self {
            id: file.id,
            name: file.name,
            extension: file.extension,
            size: file.size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedDocument {
    pub title: String,
    pub display_id: String,
    pub object_id: i64,
    pub files: Vec<DocumentFile>,
}

impl From<VaultObject> for LinkedDocument {
    fn from(hit: VaultObject) -> Self {
        Self {
            title: hit.title,
            display_id: hit.display_id,
            object_id: hit.obj_ver.id,
            files: hit.files.into_iter().map(DocumentFile::from).collect(),
        }
    }
}

/// Documents linked to one vault object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedDocuments {
    pub mf_id: i64,
    pub documents: Vec<LinkedDocument>,
}

/// One vault document with its files, read by vault id.
pub async fn document(vault: &dyn VaultClient, document_id: i64) -> Result<LinkedDocument> {
    let hit = vault.get_object(ObjectType::Document, document_id).await?;
    debug!("Document {} has {} file(s)", document_id, hit.files.len());
    Ok(hit.into())
}

/// Documents attached to the vault mirror of a CRM record.
///
/// Returns `None` when the record has never been synchronized.
pub async fn documents_for(
    vault: &dyn VaultClient,
    kind: ObjectKind,
    external_id: &ExternalId,
    duplicates: DuplicatePolicy,
) -> Result<Option<LinkedDocuments>> {
    let resolution = IdentityResolver::new(vault)
        .with_policy(duplicates)
        .resolve(kind, external_id)
        .await?;
    let Resolution::Found(target) = resolution else {
        debug!("No vault {} for {}, no documents", kind, external_id);
        return Ok(None);
    };

    let filter = PropertyFilter::new(
        kind.document_link_property(),
        target.internal_id.to_string(),
    );
    let hits = vault.find_objects(ObjectType::Document, &[filter]).await?;
    debug!(
        "Vault {} {} has {} document(s)",
        kind,
        target.internal_id,
        hits.len()
    );

    Ok(Some(LinkedDocuments {
        mf_id: target.internal_id,
        documents: hits.into_iter().map(LinkedDocument::from).collect(),
    }))
}
