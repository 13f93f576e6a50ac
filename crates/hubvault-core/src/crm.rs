//! CrmClient trait abstraction over the HubSpot API.
//!
//! Implementations:
//! - `InMemoryCrm` - For testing
//! - `HubSpotClient` (in hubvault-cli) - Uses the HubSpot v3 REST API

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("CRM record not found: {0}")]
    NotFound(String),

    #[error("CRM unavailable: {0}")]
    Unavailable(String),

    #[error("CRM rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed CRM response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, CrmError>;

/// CRM field name → nullable string value.
pub type PropertyBag = BTreeMap<String, Option<String>>;

/// One associated record id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociatedId {
    pub id: String,
    /// Association label, e.g. "company_to_contact"
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationList {
    #[serde(default)]
    pub results: Vec<AssociatedId>,
}

/// A CRM company or contact record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrmObject {
    pub id: String,
    #[serde(default)]
    pub properties: PropertyBag,
    /// Keyed by associated object path ("contacts")
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub associations: BTreeMap<String, AssociationList>,
}

impl CrmObject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: PropertyBag::new(),
            associations: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: &str, value: Option<&str>) -> Self {
        self.properties
            .insert(name.to_string(), value.map(str::to_string));
        self
    }

    pub fn with_association(mut self, object_path: &str, id: &str) -> Self {
        self.associations
            .entry(object_path.to_string())
            .or_default()
            .results
            .push(AssociatedId {
                id: id.to_string(),
                label: None,
            });
        self
    }

    /// Property value, `None` when missing or null.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|v| v.as_deref())
    }

    /// Associated ids as returned by the CRM (may contain duplicates).
    pub fn associated_ids(&self, object_path: &str) -> Vec<String> {
        self.associations
            .get(object_path)
            .map(|list| list.results.iter().map(|a| a.id.clone()).collect())
            .unwrap_or_default()
    }
}

/// A file known to the CRM file manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrmFile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

impl CrmFile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            url: None,
            size: None,
            file_type: None,
            extension: None,
        }
    }
}

/// One page of the file manager listing.
#[derive(Debug, Clone, Default)]
pub struct FilePage {
    pub results: Vec<CrmFile>,
    /// Opaque cursor for the next page; `None` on the last page
    pub next_after: Option<String>,
}

/// Read/write access to CRM records and the file manager.
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Read a company with a property projection and associations.
    ///
    /// Fails with `CrmError::NotFound` when the company does not exist.
    async fn get_company(
        &self,
        id: &str,
        properties: &[&str],
        associations: &[&str],
    ) -> Result<CrmObject>;

    /// Read a contact's name, email and phone.
    async fn get_contact(&self, id: &str) -> Result<CrmObject>;

    /// Read one page of the file manager listing.
    async fn list_files(&self, after: Option<&str>) -> Result<FilePage>;

    /// Overwrite a single company property, returning the updated company.
    async fn update_company_property(&self, id: &str, name: &str, value: &str)
    -> Result<CrmObject>;
}

/// In-memory CRM for testing
pub struct InMemoryCrm {
    companies: RwLock<HashMap<String, CrmObject>>,
    contacts: RwLock<HashMap<String, CrmObject>>,
    files: RwLock<Vec<CrmFile>>,
    page_size: usize,
    /// Contact ids whose reads fail with `Unavailable`
    failing_contacts: RwLock<HashSet<String>>,
    /// Company ids whose read fails with `Unavailable`
    failing_companies: RwLock<HashSet<String>>,
    /// File page index (0-based) whose read fails with `Unavailable`
    failing_file_page: RwLock<Option<usize>>,
    /// Log of (company id, property, value) writes
    updates: RwLock<Vec<(String, String, String)>>,
}

impl InMemoryCrm {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            companies: RwLock::new(HashMap::new()),
            contacts: RwLock::new(HashMap::new()),
            files: RwLock::new(Vec::new()),
            page_size: page_size.max(1),
            failing_contacts: RwLock::new(HashSet::new()),
            failing_companies: RwLock::new(HashSet::new()),
            failing_file_page: RwLock::new(None),
            updates: RwLock::new(Vec::new()),
        }
    }

    pub fn insert_company(&self, company: CrmObject) {
        let mut companies = self.companies.write().unwrap();
        companies.insert(company.id.clone(), company);
    }

    pub fn insert_contact(&self, contact: CrmObject) {
        let mut contacts = self.contacts.write().unwrap();
        contacts.insert(contact.id.clone(), contact);
    }

    pub fn add_file(&self, file: CrmFile) {
        self.files.write().unwrap().push(file);
    }

    pub fn fail_contact(&self, id: &str) {
        self.failing_contacts.write().unwrap().insert(id.to_string());
    }

    pub fn fail_company(&self, id: &str) {
        self.failing_companies.write().unwrap().insert(id.to_string());
    }

    pub fn fail_file_page(&self, page: usize) {
        *self.failing_file_page.write().unwrap() = Some(page);
    }

    /// Current stored company, without projection.
    pub fn company(&self, id: &str) -> Option<CrmObject> {
        self.companies.read().unwrap().get(id).cloned()
    }

    pub fn updates(&self) -> Vec<(String, String, String)> {
        self.updates.read().unwrap().clone()
    }

    fn project(object: &CrmObject, properties: &[&str], associations: &[&str]) -> CrmObject {
        let properties = if properties.is_empty() {
            object.properties.clone()
        } else {
            properties
                .iter()
                .map(|name| {
                    let value = object.properties.get(*name).cloned().flatten();
                    (name.to_string(), value)
                })
                .collect()
        };
        let associations = object
            .associations
            .iter()
            .filter(|(path, _)| associations.contains(&path.as_str()))
            .map(|(path, list)| (path.clone(), list.clone()))
            .collect();
        CrmObject {
            id: object.id.clone(),
            properties,
            associations,
        }
    }
}

impl Default for InMemoryCrm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CrmClient for InMemoryCrm {
    async fn get_company(
        &self,
        id: &str,
        properties: &[&str],
        associations: &[&str],
    ) -> Result<CrmObject> {
        if self.failing_companies.read().unwrap().contains(id) {
            return Err(CrmError::Unavailable(format!("company {} read failed", id)));
        }
        let companies = self.companies.read().unwrap();
        companies
            .get(id)
            .map(|c| Self::project(c, properties, associations))
            .ok_or_else(|| CrmError::NotFound(format!("company {}", id)))
    }

    async fn get_contact(&self, id: &str) -> Result<CrmObject> {
        if self.failing_contacts.read().unwrap().contains(id) {
            return Err(CrmError::Unavailable(format!("contact {} read failed", id)));
        }
        let contacts = self.contacts.read().unwrap();
        contacts
            .get(id)
            .cloned()
            .ok_or_else(|| CrmError::NotFound(format!("contact {}", id)))
    }

    async fn list_files(&self, after: Option<&str>) -> Result<FilePage> {
        let start = match after {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| CrmError::Malformed(format!("bad cursor {}", cursor)))?,
            None => 0,
        };
        if *self.failing_file_page.read().unwrap() == Some(start / self.page_size) {
            return Err(CrmError::Unavailable("file listing failed".to_string()));
        }

        let files = self.files.read().unwrap();
        let end = (start + self.page_size).min(files.len());
        let results = files.get(start..end).map(<[CrmFile]>::to_vec).unwrap_or_default();
        let next_after = (end < files.len()).then(|| end.to_string());
        Ok(FilePage {
            results,
            next_after,
        })
    }

    async fn update_company_property(
        &self,
        id: &str,
        name: &str,
        value: &str,
    ) -> Result<CrmObject> {
        let mut companies = self.companies.write().unwrap();
        let company = companies
            .get_mut(id)
            .ok_or_else(|| CrmError::NotFound(format!("company {}", id)))?;
        company
            .properties
            .insert(name.to_string(), Some(value.to_string()));
        let updated = company.clone();
        drop(companies);

        self.updates
            .write()
            .unwrap()
            .push((id.to_string(), name.to_string(), value.to_string()));
        Ok(updated)
    }
}
