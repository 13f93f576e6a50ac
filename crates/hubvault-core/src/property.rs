//! Vault property values in the REST API's JSON shape.

use serde::{Deserialize, Serialize};

/// Vault data type of a typed value.
///
/// Serialized as the vault's numeric code. Types the sync never writes
/// (dates, booleans, ...) are kept as `Other` so reads don't fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Text,
    Integer,
    Lookup,
    MultiSelectLookup,
    Other(u32),
}

impl DataType {
    pub fn code(self) -> u32 {
        match self {
            DataType::Text => 1,
            DataType::Integer => 2,
            DataType::Lookup => 9,
            DataType::MultiSelectLookup => 10,
            DataType::Other(code) => code,
        }
    }
}

impl From<u32> for DataType {
    fn from(code: u32) -> Self {
        match code {
            1 => DataType::Text,
            2 => DataType::Integer,
            9 => DataType::Lookup,
            10 => DataType::MultiSelectLookup,
            other => DataType::Other(other),
        }
    }
}

impl Serialize for DataType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u32(self.code())
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(DataType::from(u32::deserialize(d)?))
    }
}

/// Reference to another vault object (or value list item).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Lookup {
    pub item: i64,
    /// -1 means "latest version".
    #[serde(default = "latest_version")]
    pub version: i32,
}

fn latest_version() -> i32 {
    -1
}

impl Lookup {
    pub fn latest(item: i64) -> Self {
        Self {
            item,
            version: latest_version(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TypedValue {
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup: Option<Lookup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookups: Option<Vec<Lookup>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PropertyValue {
    pub property_def: u32,
    pub typed_value: TypedValue,
}

impl PropertyValue {
    pub fn text(property_def: u32, value: impl Into<String>) -> Self {
        Self {
            property_def,
            typed_value: TypedValue {
                data_type: DataType::Text,
                value: Some(serde_json::Value::String(value.into())),
                lookup: None,
                lookups: None,
            },
        }
    }

    pub fn lookup(property_def: u32, item: i64) -> Self {
        Self {
            property_def,
            typed_value: TypedValue {
                data_type: DataType::Lookup,
                value: None,
                lookup: Some(Lookup::latest(item)),
                lookups: None,
            },
        }
    }

    pub fn multi_lookup(property_def: u32, items: impl IntoIterator<Item = i64>) -> Self {
        Self {
            property_def,
            typed_value: TypedValue {
                data_type: DataType::MultiSelectLookup,
                value: None,
                lookup: None,
                lookups: Some(items.into_iter().map(Lookup::latest).collect()),
            },
        }
    }

    /// Text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self.typed_value.data_type {
            DataType::Text => self.typed_value.value.as_ref().and_then(|v| v.as_str()),
            _ => None,
        }
    }

    /// Referenced item ids of a lookup or multi-select lookup value.
    pub fn lookup_ids(&self) -> Vec<i64> {
        let tv = &self.typed_value;
        match (&tv.lookups, &tv.lookup) {
            (Some(lookups), _) => lookups.iter().map(|l| l.item).collect(),
            (None, Some(lookup)) => vec![lookup.item],
            (None, None) => Vec::new(),
        }
    }
}
