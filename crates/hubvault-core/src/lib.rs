//! hubvault-core: Synchronization engine between HubSpot CRM records and an M-Files vault.
//!
//! This crate provides:
//! - Identity resolution of CRM entities against vault objects
//! - Translation of CRM property bags into vault property values
//! - The company/contact upsert flow and association maintenance
//! - Reconciliation of a company's stored file list against the file manager
//! - Attaching documents to vault objects and listing them
//! - CrmClient and VaultClient trait abstractions (with in-memory doubles)

pub mod attach;
pub mod crm;
pub mod documents;
pub mod files;
pub mod ids;
pub mod mapper;
pub mod property;
pub mod resolver;
pub mod sync_engine;
pub mod vault;

pub use attach::{AttachRequest, attach_document, extract_extension};
pub use crm::{CrmClient, CrmError, CrmObject, FilePage, InMemoryCrm};
pub use documents::{DocumentFile, LinkedDocument, LinkedDocuments, document, documents_for};
pub use files::{FileReconcileOutcome, FileReference, ReconcileReport, reconcile_company_files};
pub use ids::{ExternalId, ObjectKind, ObjectType, VaultObjectRef};
pub use property::{PropertyValue, TypedValue};
pub use resolver::{DuplicatePolicy, IdentityResolver, Resolution};
pub use sync_engine::{
    AssociationMode, ContactFailure, ContactFailurePolicy, ContactStage, SyncAction, SyncEngine,
    SyncError, SyncOptions, SyncResult,
};
pub use vault::{
    FileUpload, InMemoryVault, ObjVer, PropertyFilter, UploadedFile, VaultClient, VaultError,
    VaultObject,
};
