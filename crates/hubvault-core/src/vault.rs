//! VaultClient trait abstraction over the M-Files REST API.
//!
//! Implementations:
//! - `InMemoryVault` - For testing
//! - `MFilesClient` (in hubvault-cli) - Uses the M-Files REST API over HTTP

use crate::ids::{ObjectType, defs};
use crate::property::PropertyValue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Vault unavailable: {0}")]
    Unavailable(String),

    #[error("Vault rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed vault response: {0}")]
    Malformed(String),

    #[error("Failed to write file content: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// Version-qualified object identity as returned by the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjVer {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "Type")]
    pub object_type: i32,
    #[serde(rename = "Version", default)]
    pub version: i32,
}

/// A file stored on a vault object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectFile {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub size: u64,
}

/// A search hit or a single object read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VaultObject {
    pub obj_ver: ObjVer,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "DisplayID", default)]
    pub display_id: String,
    #[serde(default)]
    pub files: Vec<ObjectFile>,
}

/// Equality filter on a property (`p{def}={value}` in search queries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFilter {
    pub property_def: u32,
    pub value: String,
}

impl PropertyFilter {
    pub fn new(property_def: u32, value: impl Into<String>) -> Self {
        Self {
            property_def,
            value: value.into(),
        }
    }
}

/// A binary payload to store in the vault.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Descriptor of an uploaded file, referenced when creating an object.
///
/// Fields the vault sends that are not modelled here are kept in `extra`
/// and sent back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UploadedFile {
    #[serde(rename = "UploadID")]
    pub upload_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub size: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Object/property store with file uploads.
#[async_trait]
pub trait VaultClient: Send + Sync {
    /// Objects of `object_type` matching every filter, in vault order.
    async fn find_objects(
        &self,
        object_type: ObjectType,
        filters: &[PropertyFilter],
    ) -> Result<Vec<VaultObject>>;

    /// Create an object with the given properties and (optionally) uploaded files.
    async fn create_object(
        &self,
        object_type: ObjectType,
        properties: &[PropertyValue],
        files: &[UploadedFile],
    ) -> Result<ObjVer>;

    /// Set properties on the latest version of an object. Unlisted properties are kept.
    async fn update_properties(
        &self,
        object_type: ObjectType,
        id: i64,
        properties: &[PropertyValue],
    ) -> Result<ObjVer>;

    /// All properties of the latest version of an object.
    async fn get_properties(&self, object_type: ObjectType, id: i64)
    -> Result<Vec<PropertyValue>>;

    /// Latest version of one object, with its files.
    async fn get_object(&self, object_type: ObjectType, id: i64) -> Result<VaultObject>;

    /// Upload a binary to the vault's temporary file store.
    async fn upload_file(&self, upload: &FileUpload) -> Result<UploadedFile>;

    /// Stream the content of a document's file into `out`, returning the byte count.
    async fn download_file(
        &self,
        document_id: i64,
        file_id: i64,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64>;

    /// Destroy an object and all its versions.
    async fn destroy_object(&self, object_type: ObjectType, id: i64) -> Result<()>;
}

/// A write recorded by `InMemoryVault`.
#[derive(Debug, Clone, PartialEq)]
pub enum VaultWrite {
    Create { object_type: i32, id: i64 },
    Update { object_type: i32, id: i64 },
    Destroy { object_type: i32, id: i64 },
}

#[derive(Debug, Clone)]
struct StoredObject {
    properties: Vec<PropertyValue>,
    files: Vec<UploadedFile>,
    version: i32,
}

/// In-memory vault for testing
pub struct InMemoryVault {
    /// (object type, id) -> object
    objects: RwLock<BTreeMap<(i32, i64), StoredObject>>,
    next_ids: RwLock<HashMap<i32, i64>>,
    next_upload_id: RwLock<i64>,
    /// Upload id -> content
    contents: RwLock<HashMap<i64, Vec<u8>>>,
    writes: RwLock<Vec<VaultWrite>>,
    /// External ids whose lookups fail with `Unavailable`
    failing_lookups: RwLock<HashSet<String>>,
    /// Objects whose updates fail with `Unavailable`
    failing_updates: RwLock<HashSet<(i32, i64)>>,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            next_ids: RwLock::new(HashMap::new()),
            next_upload_id: RwLock::new(1),
            contents: RwLock::new(HashMap::new()),
            writes: RwLock::new(Vec::new()),
            failing_lookups: RwLock::new(HashSet::new()),
            failing_updates: RwLock::new(HashSet::new()),
        }
    }

    /// Seed an object directly, bypassing the write log.
    pub fn insert_object(&self, object_type: ObjectType, properties: Vec<PropertyValue>) -> i64 {
        let id = self.allocate_id(object_type);
        self.objects.write().unwrap().insert(
            (object_type.id(), id),
            StoredObject {
                properties,
                files: Vec::new(),
                version: 1,
            },
        );
        id
    }

    pub fn fail_lookups_for(&self, external_id: &str) {
        self.failing_lookups
            .write()
            .unwrap()
            .insert(external_id.to_string());
    }

    pub fn fail_updates_for(&self, object_type: ObjectType, id: i64) {
        self.failing_updates
            .write()
            .unwrap()
            .insert((object_type.id(), id));
    }

    pub fn writes(&self) -> Vec<VaultWrite> {
        self.writes.read().unwrap().clone()
    }

    pub fn creations(&self) -> usize {
        self.writes()
            .iter()
            .filter(|w| matches!(w, VaultWrite::Create { .. }))
            .count()
    }

    /// Stored properties of an object, if it exists.
    pub fn properties(&self, object_type: ObjectType, id: i64) -> Option<Vec<PropertyValue>> {
        self.objects
            .read()
            .unwrap()
            .get(&(object_type.id(), id))
            .map(|o| o.properties.clone())
    }

    pub fn files(&self, object_type: ObjectType, id: i64) -> Vec<UploadedFile> {
        self.objects
            .read()
            .unwrap()
            .get(&(object_type.id(), id))
            .map(|o| o.files.clone())
            .unwrap_or_default()
    }

    pub fn object_count(&self, object_type: ObjectType) -> usize {
        self.objects
            .read()
            .unwrap()
            .keys()
            .filter(|(t, _)| *t == object_type.id())
            .count()
    }

    fn allocate_id(&self, object_type: ObjectType) -> i64 {
        let mut next_ids = self.next_ids.write().unwrap();
        let next = next_ids.entry(object_type.id()).or_insert(1);
        let id = *next;
        *next += 1;
        id
    }

    fn matches(properties: &[PropertyValue], filter: &PropertyFilter) -> bool {
        properties
            .iter()
            .filter(|p| p.property_def == filter.property_def)
            .any(|p| {
                p.as_text() == Some(filter.value.as_str())
                    || p
                        .lookup_ids()
                        .iter()
                        .any(|id| id.to_string() == filter.value)
            })
    }

    fn to_search_hit(object_type: i32, id: i64, object: &StoredObject) -> VaultObject {
        let title = object
            .properties
            .iter()
            .find(|p| p.property_def == defs::NAME)
            .and_then(|p| p.as_text())
            .unwrap_or_default()
            .to_string();
        VaultObject {
            obj_ver: ObjVer {
                id,
                object_type,
                version: object.version,
            },
            title,
            display_id: id.to_string(),
            files: object
                .files
                .iter()
                .map(|f| ObjectFile {
                    id: f.upload_id,
                    name: f.title.clone(),
                    extension: f.extension.clone(),
                    size: f.size,
                })
                .collect(),
        }
    }
}

impl Default for InMemoryVault {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VaultClient for InMemoryVault {
    async fn find_objects(
        &self,
        object_type: ObjectType,
        filters: &[PropertyFilter],
    ) -> Result<Vec<VaultObject>> {
        {
            let failing = self.failing_lookups.read().unwrap();
            let hit_failing = filters
                .iter()
                .any(|f| f.property_def == defs::EXTERNAL_ID && failing.contains(&f.value));
            if hit_failing {
                return Err(VaultError::Unavailable("lookup failed".to_string()));
            }
        }

        let objects = self.objects.read().unwrap();
        Ok(objects
            .iter()
            .filter(|((t, _), _)| *t == object_type.id())
            .filter(|(_, o)| filters.iter().all(|f| Self::matches(&o.properties, f)))
            .map(|((t, id), o)| Self::to_search_hit(*t, *id, o))
            .collect())
    }

    async fn create_object(
        &self,
        object_type: ObjectType,
        properties: &[PropertyValue],
        files: &[UploadedFile],
    ) -> Result<ObjVer> {
        let id = self.allocate_id(object_type);
        self.objects.write().unwrap().insert(
            (object_type.id(), id),
            StoredObject {
                properties: properties.to_vec(),
                files: files.to_vec(),
                version: 1,
            },
        );
        self.writes.write().unwrap().push(VaultWrite::Create {
            object_type: object_type.id(),
            id,
        });
        Ok(ObjVer {
            id,
            object_type: object_type.id(),
            version: 1,
        })
    }

    async fn update_properties(
        &self,
        object_type: ObjectType,
        id: i64,
        properties: &[PropertyValue],
    ) -> Result<ObjVer> {
        let key = (object_type.id(), id);
        if self.failing_updates.read().unwrap().contains(&key) {
            return Err(VaultError::Unavailable(format!("update of {} failed", id)));
        }

        let mut objects = self.objects.write().unwrap();
        let object = objects.get_mut(&key).ok_or_else(|| VaultError::Rejected {
            status: 404,
            body: format!("object {}/{} not found", object_type, id),
        })?;
        for value in properties {
            object.properties.retain(|p| p.property_def != value.property_def);
            object.properties.push(value.clone());
        }
        object.version += 1;
        let version = object.version;
        drop(objects);

        self.writes.write().unwrap().push(VaultWrite::Update {
            object_type: object_type.id(),
            id,
        });
        Ok(ObjVer {
            id,
            object_type: object_type.id(),
            version,
        })
    }

    async fn get_properties(
        &self,
        object_type: ObjectType,
        id: i64,
    ) -> Result<Vec<PropertyValue>> {
        self.properties(object_type, id)
            .ok_or_else(|| VaultError::Rejected {
                status: 404,
                body: format!("object {}/{} not found", object_type, id),
            })
    }

    async fn get_object(&self, object_type: ObjectType, id: i64) -> Result<VaultObject> {
        let objects = self.objects.read().unwrap();
        objects
            .get(&(object_type.id(), id))
            .map(|o| Self::to_search_hit(object_type.id(), id, o))
            .ok_or_else(|| VaultError::Rejected {
                status: 404,
                body: format!("object {}/{} not found", object_type, id),
            })
    }

    async fn upload_file(&self, upload: &FileUpload) -> Result<UploadedFile> {
        let upload_id = {
            let mut next = self.next_upload_id.write().unwrap();
            let id = *next;
            *next += 1;
            id
        };
        self.contents
            .write()
            .unwrap()
            .insert(upload_id, upload.bytes.clone());
        Ok(UploadedFile {
            upload_id,
            title: upload.file_name.clone(),
            extension: String::new(),
            size: upload.bytes.len() as u64,
            extra: serde_json::Map::new(),
        })
    }

    async fn download_file(
        &self,
        document_id: i64,
        file_id: i64,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let content = {
            let objects = self.objects.read().unwrap();
            let attached = objects
                .get(&(ObjectType::Document.id(), document_id))
                .is_some_and(|o| o.files.iter().any(|f| f.upload_id == file_id));
            let contents = self.contents.read().unwrap();
            match contents.get(&file_id) {
                Some(bytes) if attached => bytes.clone(),
                _ => {
                    return Err(VaultError::Rejected {
                        status: 404,
                        body: format!("file {} of document {} not found", file_id, document_id),
                    });
                }
            }
        };

        out.write_all(&content).await?;
        out.flush().await?;
        Ok(content.len() as u64)
    }

    async fn destroy_object(&self, object_type: ObjectType, id: i64) -> Result<()> {
        let removed = self
            .objects
            .write()
            .unwrap()
            .remove(&(object_type.id(), id));
        if removed.is_none() {
            return Err(VaultError::Rejected {
                status: 404,
                body: format!("object {}/{} not found", object_type, id),
            });
        }
        self.writes.write().unwrap().push(VaultWrite::Destroy {
            object_type: object_type.id(),
            id,
        });
        Ok(())
    }
}
