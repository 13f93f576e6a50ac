//! Identifiers shared by both sides of the sync, and the vault schema table.
//!
//! HubSpot identifies object kinds with string discriminators ("0-1" for
//! contacts, "0-2" for companies). The vault identifies them with numeric
//! object types, classes and property definitions. `ObjectKind` is the only
//! place where the two are tied together.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Vault property definition ids.
pub mod defs {
    pub const NAME: u32 = 0;
    pub const CLASS: u32 = 100;
    pub const FIRST_NAME: u32 = 1026;
    pub const LAST_NAME: u32 = 1027;
    pub const EMAIL: u32 = 1028;
    pub const PHONE: u32 = 1029;
    /// HubSpot record id of a synchronized object.
    pub const EXTERNAL_ID: u32 = 1030;
    pub const CONTACTS: u32 = 1032;
    /// Companies a contact belongs to (multi-select lookup).
    pub const COMPANIES: u32 = 1034;
    pub const ADDRESS: u32 = 1035;
    /// Single company lookup on a document.
    pub const COMPANY: u32 = 1037;
    /// Single contact lookup on a document.
    pub const CONTACT: u32 = 1038;
    /// HubSpot object type discriminator ("0-1", "0-2").
    pub const EXTERNAL_TYPE: u32 = 1039;
    pub const DOMAIN: u32 = 1040;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("Unknown object kind: {0}")]
    UnknownKind(String),
    #[error("External id must not be empty")]
    EmptyExternalId,
}

/// CRM-assigned identifier of a company or contact.
///
/// Stored on the vault side as the correlation property, never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdError::EmptyExternalId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ExternalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ExternalId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// The two CRM entity kinds that are mirrored into the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Company,
    Contact,
}

impl ObjectKind {
    /// HubSpot object type discriminator, stored in `defs::EXTERNAL_TYPE`.
    pub fn crm_type_id(self) -> &'static str {
        match self {
            ObjectKind::Company => "0-2",
            ObjectKind::Contact => "0-1",
        }
    }

    /// Path segment of the HubSpot CRM objects API.
    pub fn crm_object_path(self) -> &'static str {
        match self {
            ObjectKind::Company => "companies",
            ObjectKind::Contact => "contacts",
        }
    }

    pub fn object_type(self) -> ObjectType {
        match self {
            ObjectKind::Company => ObjectType::Company,
            ObjectKind::Contact => ObjectType::Contact,
        }
    }

    /// Vault class assigned on creation.
    pub fn class_id(self) -> i64 {
        match self {
            ObjectKind::Company => 3,
            ObjectKind::Contact => 2,
        }
    }

    /// Property linking a document to an object of this kind.
    pub fn document_link_property(self) -> u32 {
        match self {
            ObjectKind::Company => defs::COMPANY,
            ObjectKind::Contact => defs::CONTACT,
        }
    }

    /// Class of documents attached to an object of this kind.
    pub fn document_class_id(self) -> i64 {
        match self {
            ObjectKind::Company => 4,
            ObjectKind::Contact => 5,
        }
    }
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Company => f.write_str("company"),
            ObjectKind::Contact => f.write_str("contact"),
        }
    }
}

impl FromStr for ObjectKind {
    type Err = IdError;

    /// Accepts either the HubSpot discriminator or the kind name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0-2" | "company" | "companies" => Ok(ObjectKind::Company),
            "0-1" | "contact" | "contacts" => Ok(ObjectKind::Contact),
            _ => Err(IdError::UnknownKind(s.to_string())),
        }
    }
}

/// Vault object types touched by the sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Document,
    Contact,
    Company,
}

impl ObjectType {
    pub fn id(self) -> i32 {
        match self {
            ObjectType::Document => 0,
            ObjectType::Contact => 101,
            ObjectType::Company => 102,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(ObjectType::Document),
            101 => Some(ObjectType::Contact),
            102 => Some(ObjectType::Company),
            _ => None,
        }
    }
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// The vault's own identity for a synchronized record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultObjectRef {
    pub internal_id: i64,
    pub kind: ObjectKind,
}

impl VaultObjectRef {
    pub fn new(kind: ObjectKind, internal_id: i64) -> Self {
        Self { internal_id, kind }
    }
}
