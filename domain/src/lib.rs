use serde::{Deserialize, Serialize}; // For entity and input (de)serialization
use serde_json::{Map, Value}; // To represent arbitrary pokemon attributes
use std::fmt;
use thiserror::Error; // For domain-specific errors

/// Key the document store uses for its own bookkeeping.
pub const ID_FIELD: &str = "_id";
/// Prefix marking store-owned fields such as the version key `__v`.
pub const INTERNAL_FIELD_PREFIX: &str = "__";

// --- Domain Errors ---
#[derive(Error, Debug, PartialEq)]
pub enum DomainError {
    #[error("Invalid field value for field '{field}': {reason}")]
    InvalidFieldValue { field: String, reason: String },
    #[error("'{0}' is a reserved field name and cannot be set")]
    ReservedField(String),
}

// --- Pokemon ID ---
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PokemonId(String);

impl PokemonId {
    pub fn new(id: String) -> Self {
        Self(id)
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<String> for PokemonId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}
impl From<PokemonId> for String {
    fn from(id: PokemonId) -> Self {
        id.0
    }
}
impl fmt::Display for PokemonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Pokemon Entity ---

/// A stored pokemon record.
///
/// `name` and `no` are unique across the collection; the store enforces that.
/// Anything else the caller sent lives in `attributes`, next to store-owned
/// fields like `__v`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Pokemon {
    #[serde(rename = "_id")]
    pub id: PokemonId,
    pub name: String,
    pub no: i64,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Pokemon {
    /// Shallow merge of this record with a patch: fields present in the patch win.
    pub fn merged_with(&self, patch: &PokemonPatch) -> Pokemon {
        let mut merged = self.clone();
        if let Some(name) = &patch.name {
            merged.name = name.clone();
        }
        if let Some(no) = patch.no {
            merged.no = no;
        }
        for (key, value) in &patch.attributes {
            merged.attributes.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Drops store-owned fields, the same projection a listing applies.
    pub fn without_internal_fields(mut self) -> Pokemon {
        self.attributes
            .retain(|key, _| !key.starts_with(INTERNAL_FIELD_PREFIX));
        self
    }
}

// --- Inputs ---

/// Data for a new pokemon record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewPokemon {
    pub name: String,
    pub no: i64,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl NewPokemon {
    pub fn new(name: impl Into<String>, no: i64) -> Self {
        Self {
            name: name.into(),
            no,
            attributes: Map::new(),
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        validate_name(&self.name)?;
        validate_no(self.no)?;
        validate_attributes(&self.attributes)
    }
}

/// Partial update for a pokemon record. Absent fields are left untouched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PokemonPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no: Option<i64>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl PokemonPatch {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(no) = self.no {
            validate_no(no)?;
        }
        validate_attributes(&self.attributes)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.no.is_none() && self.attributes.is_empty()
    }
}

fn validate_name(name: &str) -> Result<(), DomainError> {
    if name.trim().is_empty() {
        return Err(DomainError::InvalidFieldValue {
            field: "name".to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn validate_no(no: i64) -> Result<(), DomainError> {
    if no < 1 {
        return Err(DomainError::InvalidFieldValue {
            field: "no".to_string(),
            reason: format!("must be a positive integer, got {}", no),
        });
    }
    Ok(())
}

fn validate_attributes(attributes: &Map<String, Value>) -> Result<(), DomainError> {
    // `_id` and `__*` belong to the store
    match attributes
        .keys()
        .find(|key| *key == ID_FIELD || key.starts_with(INTERNAL_FIELD_PREFIX))
    {
        Some(key) => Err(DomainError::ReservedField(key.clone())),
        None => Ok(()),
    }
}
