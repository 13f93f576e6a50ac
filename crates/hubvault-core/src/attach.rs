//! Document attach pipeline: upload a binary, then create a vault document
//! linked to a company or contact.

use crate::ids::{ObjectType, VaultObjectRef, defs};
use crate::property::PropertyValue;
use crate::vault::{FileUpload, ObjVer, Result, VaultClient};

use tracing::{debug, info, instrument};

/// Extension of a file name: the text after the last `.`, empty if there is none.
pub fn extract_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(dot) => &file_name[dot + 1..],
        None => "",
    }
}

/// A document to store in the vault and the object it belongs to.
#[derive(Debug, Clone)]
pub struct AttachRequest {
    pub file: FileUpload,
    pub title: String,
    pub target: VaultObjectRef,
}

impl AttachRequest {
    /// Properties of the new document object.
    fn document_properties(&self) -> Vec<PropertyValue> {
        let kind = self.target.kind;
        vec![
            PropertyValue::lookup(defs::CLASS, kind.document_class_id()),
            PropertyValue::lookup(kind.document_link_property(), self.target.internal_id),
            PropertyValue::text(defs::NAME, &self.title),
        ]
    }
}

/// Upload `request.file` and create a document object carrying it.
///
/// The upload is left orphaned in the vault's temporary store if the create fails.
#[instrument(level = "info", skip(vault, request), fields(title = %request.title))]
pub async fn attach_document(vault: &dyn VaultClient, request: &AttachRequest) -> Result<ObjVer> {
    let mut uploaded = vault.upload_file(&request.file).await?;
    uploaded.extension = extract_extension(&request.file.file_name).to_string();
    debug!(
        "Uploaded {} as upload {}",
        request.file.file_name, uploaded.upload_id
    );

    let ver = vault
        .create_object(
            ObjectType::Document,
            &request.document_properties(),
            std::slice::from_ref(&uploaded),
        )
        .await?;

    info!(
        "Attached document {} to vault {} {}",
        ver.id, request.target.kind, request.target.internal_id
    );
    Ok(ver)
}
