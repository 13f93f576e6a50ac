//! Translation between CRM property bags and vault property values.
//!
//! Pure functions, no I/O. The vault rejects null scalars on required text
//! properties, so every mapped field has a substitution rule:
//! - company name falls back to the domain, then to `"Unknown"`
//! - every other field falls back to an empty string
//!
//! A null, missing or blank CRM value counts as absent.

use crate::crm::PropertyBag;
use crate::ids::{ExternalId, ObjectKind, defs};
use crate::property::PropertyValue;

/// Name used when a company has neither a name nor a domain.
pub const UNKNOWN_COMPANY_NAME: &str = "Unknown";

/// A CRM field and the vault property it maps to.
#[derive(Debug, Clone, Copy)]
struct FieldMapping {
    crm_field: &'static str,
    property_def: u32,
}

const fn field(crm_field: &'static str, property_def: u32) -> FieldMapping {
    FieldMapping {
        crm_field,
        property_def,
    }
}

/// Company fields other than the name (which has its own fallback chain).
const COMPANY_FIELDS: &[FieldMapping] = &[
    field("domain", defs::DOMAIN),
    field("phone", defs::PHONE),
    field("address", defs::ADDRESS),
];

const CONTACT_FIELDS: &[FieldMapping] = &[
    field("firstname", defs::FIRST_NAME),
    field("lastname", defs::LAST_NAME),
    field("email", defs::EMAIL),
    field("phone", defs::PHONE),
];

const COMPANY_PROJECTION: &[&str] = &["name", "domain", "phone", "address"];
const CONTACT_PROJECTION: &[&str] = &["firstname", "lastname", "email", "phone"];

fn business_fields(kind: ObjectKind) -> &'static [FieldMapping] {
    match kind {
        ObjectKind::Company => COMPANY_FIELDS,
        ObjectKind::Contact => CONTACT_FIELDS,
    }
}

/// CRM properties to request when reading a record of this kind.
pub fn crm_properties(kind: ObjectKind) -> &'static [&'static str] {
    match kind {
        ObjectKind::Company => COMPANY_PROJECTION,
        ObjectKind::Contact => CONTACT_PROJECTION,
    }
}

/// Whether the property list is meant for a new object or an existing one.
#[derive(Debug, Clone, Copy)]
pub enum WriteMode<'a> {
    /// Includes the class and the external id/type correlation properties.
    Create { external_id: &'a ExternalId },
    /// Mutable business fields only; class and correlation are fixed after creation.
    Update,
}

fn present<'b>(bag: &'b PropertyBag, key: &str) -> Option<&'b str> {
    bag.get(key)
        .and_then(|v| v.as_deref())
        .filter(|v| !v.trim().is_empty())
}

/// Company display name: name, else domain, else "Unknown".
pub fn company_name(bag: &PropertyBag) -> &str {
    present(bag, "name")
        .or_else(|| present(bag, "domain"))
        .unwrap_or(UNKNOWN_COMPANY_NAME)
}

/// Build the vault property values for a CRM record.
pub fn to_vault_properties(
    kind: ObjectKind,
    bag: &PropertyBag,
    mode: WriteMode<'_>,
) -> Vec<PropertyValue> {
    let mut values = Vec::new();

    if let WriteMode::Create { .. } = mode {
        values.push(PropertyValue::lookup(defs::CLASS, kind.class_id()));
    }

    if kind == ObjectKind::Company {
        values.push(PropertyValue::text(defs::NAME, company_name(bag)));
    }

    for mapping in business_fields(kind) {
        let value = present(bag, mapping.crm_field).unwrap_or_default();
        values.push(PropertyValue::text(mapping.property_def, value));
    }

    if let WriteMode::Create { external_id } = mode {
        values.push(PropertyValue::text(defs::EXTERNAL_ID, external_id.as_str()));
        values.push(PropertyValue::text(defs::EXTERNAL_TYPE, kind.crm_type_id()));
    }

    values
}

/// The contact → companies association list.
pub fn association_property(company_ids: impl IntoIterator<Item = i64>) -> PropertyValue {
    PropertyValue::multi_lookup(defs::COMPANIES, company_ids)
}

/// Read the business fields of a vault object back into a CRM-shaped bag.
///
/// Only properties present in `values` appear in the result.
pub fn from_vault_properties(kind: ObjectKind, values: &[PropertyValue]) -> PropertyBag {
    let text_of = |def: u32| {
        values
            .iter()
            .find(|v| v.property_def == def)
            .and_then(|v| v.as_text())
            .map(str::to_string)
    };

    let mut bag = PropertyBag::new();
    if kind == ObjectKind::Company {
        if let Some(name) = text_of(defs::NAME) {
            bag.insert("name".to_string(), Some(name));
        }
    }
    for mapping in business_fields(kind) {
        if let Some(value) = text_of(mapping.property_def) {
            bag.insert(mapping.crm_field.to_string(), Some(value));
        }
    }
    bag
}

/// Ids referenced by a lookup property, empty if the property is absent.
pub fn lookup_ids(values: &[PropertyValue], property_def: u32) -> Vec<i64> {
    values
        .iter()
        .find(|v| v.property_def == property_def)
        .map(PropertyValue::lookup_ids)
        .unwrap_or_default()
}
