//! The RPC client seam.
//!
//! The remote query/update/schema client is an external collaborator: this
//! crate never implements its network I/O, retries, pagination or auth. The
//! [`Client`] trait captures the minimal contract every proxy method calls
//! through, so hosts inject their own transport and tests inject
//! [`crate::test_support::MemoryClient`].
//!
//! Raw payloads stay `serde_json` values on this seam. Record dicts returned
//! by the client always carry at least `{"type": <str>, "id": <int>}`.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// A reference to one remote record: its type name and integer id.
///
/// This is the value type that travels through filters and field payloads as
/// `{"type": ..., "id": ...}`. Two references are equal iff type and id
/// match; proxy equality additionally compares the originating client's base
/// URL (see [`crate::Entity`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: i64,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: i64) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
        }
    }

    /// The `{"type": ..., "id": ...}` JSON object for this reference.
    pub fn to_value(&self) -> Value {
        serde_json::json!({"type": self.entity_type, "id": self.id})
    }

    /// Parse a reference out of a raw record object. Returns `None` unless
    /// both `type` and `id` are present with the right shapes.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let entity_type = obj.get("type")?.as_str()?;
        let id = obj.get("id")?.as_i64()?;
        Some(Self::new(entity_type, id))
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entity_type, self.id)
    }
}

impl From<(&str, i64)> for EntityRef {
    fn from((entity_type, id): (&str, i64)) -> Self {
        Self::new(entity_type, id)
    }
}

/// Server-side merge strategy for writes to a list-valued linking field.
///
/// Forwarded to the client verbatim; the remote service owns the merge
/// semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    Set,
    Add,
    Remove,
}

impl UpdateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Add => "add",
            Self::Remove => "remove",
        }
    }
}

/// Per-field multi-entity update modes, keyed by field name.
pub type UpdateModes = HashMap<String, UpdateMode>;

/// Optional knobs of a `find` call, mirroring the remote query surface.
#[derive(Debug, Clone)]
pub struct FindOptions {
    /// Sort specification, passed through opaquely.
    pub order: Option<Value>,
    /// Top-level combination of filter clauses (`"all"`/`"any"`).
    pub filter_operator: Option<String>,
    /// Maximum number of records; 0 means no limit.
    pub limit: usize,
    pub retired_only: bool,
    /// Page number; 0 means all pages.
    pub page: usize,
    pub include_archived_projects: bool,
    /// Server-side filter presets, passed through opaquely.
    pub additional_filter_presets: Option<Value>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            order: None,
            filter_operator: None,
            limit: 0,
            retired_only: false,
            page: 0,
            include_archived_projects: true,
            additional_filter_presets: None,
        }
    }
}

/// Raw connection parameters, forwarded to a client's own constructor.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub base_url: String,
    pub script_name: String,
    pub api_key: String,
}

/// The contract of the remote production-tracking client.
///
/// Every method is one synchronous, independent round trip. Errors surface
/// through [`crate::Error::Client`] unchanged.
pub trait Client: Send + Sync {
    /// Base URL of the remote site this client talks to. Used for proxy
    /// equality and for building detail-page URLs.
    fn base_url(&self) -> &str;

    /// Query records. `filters` is the raw JSON filter array; `fields` is
    /// the list of field names to return (`type` and `id` always come back).
    fn find(
        &self,
        entity_type: &str,
        filters: &Value,
        fields: &[String],
        options: &FindOptions,
    ) -> Result<Vec<Map<String, Value>>>;

    /// Query a single record, or `None` when nothing matches.
    fn find_one(
        &self,
        entity_type: &str,
        filters: &Value,
        fields: &[String],
    ) -> Result<Option<Map<String, Value>>>;

    /// Create a record and return it (restricted to `return_fields` when
    /// given).
    fn create(
        &self,
        entity_type: &str,
        data: &Map<String, Value>,
        return_fields: Option<&[String]>,
    ) -> Result<Map<String, Value>>;

    /// Update fields on a record. `modes` carries per-field multi-entity
    /// update modes.
    fn update(
        &self,
        entity_type: &str,
        id: i64,
        data: &Map<String, Value>,
        modes: Option<&UpdateModes>,
    ) -> Result<()>;

    /// Delete a record. Returns whether it existed.
    fn delete(&self, entity_type: &str, id: i64) -> Result<bool>;

    /// Upload a local file into a field and return the new attachment id.
    fn upload(
        &self,
        entity_type: &str,
        id: i64,
        path: &Path,
        field_name: &str,
        display_name: Option<&str>,
    ) -> Result<i64>;

    /// Download an attachment. When `file_path` is given the bytes are
    /// written there; otherwise they are returned.
    fn download_attachment(
        &self,
        attachment: &Value,
        file_path: Option<&Path>,
    ) -> Result<Option<Vec<u8>>>;

    /// Entity-level schema for all types.
    fn schema_entity_read(&self) -> Result<Map<String, Value>>;

    /// Field schemas for one type, optionally restricted to one field and
    /// scoped to a project context.
    fn schema_field_read(
        &self,
        entity_type: &str,
        field: Option<&str>,
        project: Option<&EntityRef>,
    ) -> Result<Map<String, Value>>;

    /// Update field schema properties, optionally scoped to a project.
    fn schema_field_update(
        &self,
        entity_type: &str,
        field: &str,
        properties: &Map<String, Value>,
        project: Option<&EntityRef>,
    ) -> Result<bool>;

    /// Full schema dump: type name to field-schema map.
    fn schema_read(&self) -> Result<Map<String, Value>>;

    /// Session token for authenticated direct HTTP fetches (image
    /// downloads carry it as the `_session_id` cookie).
    fn session_token(&self) -> Result<String>;

    /// Proxy URL configured on the client, reused for direct HTTP fetches.
    fn proxy_url(&self) -> Option<String> {
        None
    }
}

/// Clients that can be constructed from raw connection parameters.
pub trait Connect: Client + Sized {
    fn connect(credentials: &Credentials) -> Result<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ref_round_trips_through_json() {
        let r = EntityRef::new("Project", 1);
        let value = r.to_value();
        assert_eq!(value, serde_json::json!({"type": "Project", "id": 1}));
        assert_eq!(EntityRef::from_value(&value), Some(r));
    }

    #[test]
    fn entity_ref_rejects_non_records() {
        assert_eq!(EntityRef::from_value(&serde_json::json!(42)), None);
        assert_eq!(
            EntityRef::from_value(&serde_json::json!({"type": "Project"})),
            None
        );
        assert_eq!(
            EntityRef::from_value(&serde_json::json!({"id": 1, "type": 7})),
            None
        );
    }

    #[test]
    fn update_mode_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(UpdateMode::Remove).unwrap(),
            serde_json::json!("remove")
        );
        assert_eq!(UpdateMode::Add.as_str(), "add");
    }

    #[test]
    fn find_options_default_includes_archived() {
        let options = FindOptions::default();
        assert!(options.include_archived_projects);
        assert_eq!(options.limit, 0);
        assert!(options.order.is_none());
    }
}
