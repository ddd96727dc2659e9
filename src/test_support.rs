//! An in-memory [`Client`] for tests.
//!
//! [`MemoryClient`] keeps records, field schemas and uploaded bytes in a
//! shared store and evaluates the common filter operators against them,
//! including dotted field paths through linked records. Clones share the
//! store, so a test can hold one handle for seeding and assertions while the
//! session owns another. Every trait call is logged and countable, which is
//! how tests assert that pure builders perform no I/O.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};

use crate::client::{Client, Connect, Credentials, EntityRef, FindOptions, UpdateMode, UpdateModes};
use crate::error::{Error, Result};
use crate::session::Session;

/// One logged trait call: the method name and a JSON rendering of its
/// arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub method: String,
    pub payload: Value,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, Vec<Map<String, Value>>>,
    field_schemas: HashMap<String, Map<String, Value>>,
    entity_schemas: Map<String, Value>,
    attachment_bytes: HashMap<i64, Vec<u8>>,
    next_id: i64,
    calls: Vec<CallRecord>,
}

/// In-memory stand-in for the remote client.
#[derive(Clone)]
pub struct MemoryClient {
    base_url: String,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::with_base_url("https://test.example.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            inner: Arc::new(Mutex::new(Inner {
                next_id: 1,
                ..Inner::default()
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed one record. Non-object `fields` seed an empty record. Returns
    /// the reference of the stored record.
    pub fn add_entity(&self, entity_type: &str, fields: Value) -> EntityRef {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let mut row = fields.as_object().cloned().unwrap_or_default();
        row.insert("type".into(), entity_type.into());
        row.insert("id".into(), id.into());
        inner
            .records
            .entry(entity_type.to_string())
            .or_default()
            .push(row);
        EntityRef::new(entity_type, id)
    }

    /// Seed the schema of one field.
    pub fn set_field_schema(&self, entity_type: &str, field: &str, schema: Value) {
        self.lock()
            .field_schemas
            .entry(entity_type.to_string())
            .or_default()
            .insert(field.to_string(), schema);
    }

    /// Seed the entity-level schema of one type.
    pub fn set_entity_schema(&self, entity_type: &str, schema: Value) {
        self.lock()
            .entity_schemas
            .insert(entity_type.to_string(), schema);
    }

    /// The full call log so far.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.lock().calls.clone()
    }

    /// How many trait calls have been made.
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn log(&self, method: &str, payload: Value) {
        self.lock().calls.push(CallRecord {
            method: method.to_string(),
            payload,
        });
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Client for MemoryClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn find(
        &self,
        entity_type: &str,
        filters: &Value,
        fields: &[String],
        options: &FindOptions,
    ) -> Result<Vec<Map<String, Value>>> {
        self.log(
            "find",
            serde_json::json!({"entity_type": entity_type, "filters": filters, "fields": fields}),
        );
        let inner = self.lock();
        let any = options.filter_operator.as_deref() == Some("any");
        let clauses = filters.as_array().cloned().unwrap_or_default();

        let mut rows: Vec<Map<String, Value>> = inner
            .records
            .get(entity_type)
            .into_iter()
            .flatten()
            .filter(|row| {
                if clauses.is_empty() {
                    return true;
                }
                if any {
                    clauses.iter().any(|c| matches_filter(&inner, row, c))
                } else {
                    clauses.iter().all(|c| matches_filter(&inner, row, c))
                }
            })
            .map(|row| project_fields(row, fields))
            .collect();

        if options.limit > 0 {
            rows.truncate(options.limit);
        }
        Ok(rows)
    }

    fn find_one(
        &self,
        entity_type: &str,
        filters: &Value,
        fields: &[String],
    ) -> Result<Option<Map<String, Value>>> {
        let options = FindOptions {
            limit: 1,
            ..FindOptions::default()
        };
        Ok(self.find(entity_type, filters, fields, &options)?.pop())
    }

    fn create(
        &self,
        entity_type: &str,
        data: &Map<String, Value>,
        return_fields: Option<&[String]>,
    ) -> Result<Map<String, Value>> {
        self.log(
            "create",
            serde_json::json!({"entity_type": entity_type, "data": data}),
        );
        let entity = self.add_entity(entity_type, Value::Object(data.clone()));
        let inner = self.lock();
        let row = find_record(&inner, entity_type, entity.id)
            .cloned()
            .ok_or_else(|| Error::client(format!("lost record {entity}")))?;
        Ok(match return_fields {
            Some(fields) => project_fields(&row, fields),
            None => row,
        })
    }

    fn update(
        &self,
        entity_type: &str,
        id: i64,
        data: &Map<String, Value>,
        modes: Option<&UpdateModes>,
    ) -> Result<()> {
        self.log(
            "update",
            serde_json::json!({
                "entity_type": entity_type,
                "id": id,
                "data": data,
                "modes": modes.map(|m| serde_json::to_value(m).unwrap_or(Value::Null)),
            }),
        );
        let mut inner = self.lock();
        let row = find_record_mut(&mut inner, entity_type, id)
            .ok_or_else(|| Error::client(format!("no such record: {entity_type} {id}")))?;
        for (field, value) in data {
            let mode = modes
                .and_then(|m| m.get(field))
                .copied()
                .unwrap_or(UpdateMode::Set);
            apply_update(row, field, value, mode);
        }
        Ok(())
    }

    fn delete(&self, entity_type: &str, id: i64) -> Result<bool> {
        self.log(
            "delete",
            serde_json::json!({"entity_type": entity_type, "id": id}),
        );
        let mut inner = self.lock();
        let Some(rows) = inner.records.get_mut(entity_type) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|row| row.get("id").and_then(Value::as_i64) != Some(id));
        Ok(rows.len() != before)
    }

    fn upload(
        &self,
        entity_type: &str,
        id: i64,
        path: &Path,
        field_name: &str,
        display_name: Option<&str>,
    ) -> Result<i64> {
        self.log(
            "upload",
            serde_json::json!({
                "entity_type": entity_type,
                "id": id,
                "path": path.display().to_string(),
                "field_name": field_name,
            }),
        );
        let bytes = fs::read(path)?;
        let file_name = display_name
            .map(str::to_string)
            .or_else(|| {
                path.file_name()
                    .map(|name| name.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| "attachment".to_string());

        let attachment = self.add_entity(
            "Attachment",
            serde_json::json!({"name": file_name, "link_type": "upload"}),
        );
        let descriptor = serde_json::json!({
            "type": "Attachment",
            "id": attachment.id,
            "name": file_name,
            "link_type": "upload",
            "url": format!("{}/file_serve/attachment/{}", self.base_url, attachment.id),
        });

        let mut inner = self.lock();
        inner.attachment_bytes.insert(attachment.id, bytes);
        let row = find_record_mut(&mut inner, entity_type, id)
            .ok_or_else(|| Error::client(format!("no such record: {entity_type} {id}")))?;
        row.insert(field_name.to_string(), descriptor);
        Ok(attachment.id)
    }

    fn download_attachment(
        &self,
        attachment: &Value,
        file_path: Option<&Path>,
    ) -> Result<Option<Vec<u8>>> {
        self.log(
            "download_attachment",
            serde_json::json!({"attachment": attachment}),
        );
        let id = attachment
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::client("attachment descriptor without an id"))?;
        let bytes = self
            .lock()
            .attachment_bytes
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::client(format!("no uploaded bytes for attachment {id}")))?;
        match file_path {
            Some(path) => {
                fs::write(path, &bytes)?;
                Ok(None)
            }
            None => Ok(Some(bytes)),
        }
    }

    fn schema_entity_read(&self) -> Result<Map<String, Value>> {
        self.log("schema_entity_read", Value::Null);
        Ok(self.lock().entity_schemas.clone())
    }

    fn schema_field_read(
        &self,
        entity_type: &str,
        field: Option<&str>,
        _project: Option<&EntityRef>,
    ) -> Result<Map<String, Value>> {
        self.log(
            "schema_field_read",
            serde_json::json!({"entity_type": entity_type, "field": field}),
        );
        let inner = self.lock();
        let schemas = inner
            .field_schemas
            .get(entity_type)
            .cloned()
            .unwrap_or_default();
        Ok(match field {
            Some(field) => schemas
                .into_iter()
                .filter(|(name, _)| name == field)
                .collect(),
            None => schemas,
        })
    }

    fn schema_field_update(
        &self,
        entity_type: &str,
        field: &str,
        properties: &Map<String, Value>,
        _project: Option<&EntityRef>,
    ) -> Result<bool> {
        self.log(
            "schema_field_update",
            serde_json::json!({
                "entity_type": entity_type,
                "field": field,
                "properties": properties,
            }),
        );
        let mut inner = self.lock();
        let schemas = inner
            .field_schemas
            .entry(entity_type.to_string())
            .or_default();
        let schema = schemas
            .entry(field.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(schema) = schema.as_object_mut() else {
            return Ok(false);
        };
        for (property, value) in properties {
            schema.insert(
                property.clone(),
                serde_json::json!({"value": value, "editable": true}),
            );
        }
        Ok(true)
    }

    fn schema_read(&self) -> Result<Map<String, Value>> {
        self.log("schema_read", Value::Null);
        Ok(self
            .lock()
            .field_schemas
            .iter()
            .map(|(entity_type, fields)| (entity_type.clone(), Value::Object(fields.clone())))
            .collect())
    }

    fn session_token(&self) -> Result<String> {
        self.log("session_token", Value::Null);
        Ok("testsession".to_string())
    }
}

impl Connect for MemoryClient {
    fn connect(credentials: &Credentials) -> Result<Self> {
        Ok(Self::with_base_url(credentials.base_url.clone()))
    }
}

/// A session over a fresh [`MemoryClient`] with the default registry.
pub fn memory_session() -> Session {
    Session::new(MemoryClient::new())
}

fn find_record<'a>(inner: &'a Inner, entity_type: &str, id: i64) -> Option<&'a Map<String, Value>> {
    inner
        .records
        .get(entity_type)?
        .iter()
        .find(|row| row.get("id").and_then(Value::as_i64) == Some(id))
}

fn find_record_mut<'a>(
    inner: &'a mut Inner,
    entity_type: &str,
    id: i64,
) -> Option<&'a mut Map<String, Value>> {
    inner
        .records
        .get_mut(entity_type)?
        .iter_mut()
        .find(|row| row.get("id").and_then(Value::as_i64) == Some(id))
}

fn project_fields(row: &Map<String, Value>, fields: &[String]) -> Map<String, Value> {
    if fields.is_empty() {
        return row.clone();
    }
    let mut projected = Map::new();
    projected.insert("type".into(), row.get("type").cloned().unwrap_or_default());
    projected.insert("id".into(), row.get("id").cloned().unwrap_or_default());
    for field in fields {
        projected.insert(
            field.clone(),
            row.get(field).cloned().unwrap_or(Value::Null),
        );
    }
    projected
}

fn apply_update(row: &mut Map<String, Value>, field: &str, value: &Value, mode: UpdateMode) {
    match mode {
        UpdateMode::Set => {
            row.insert(field.to_string(), value.clone());
        }
        UpdateMode::Add => {
            let existing = row
                .entry(field.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let (Some(items), Some(additions)) = (existing.as_array().cloned(), value.as_array())
            {
                let mut items = items;
                for addition in additions {
                    if !items.iter().any(|item| values_equal(item, addition)) {
                        items.push(addition.clone());
                    }
                }
                *existing = Value::Array(items);
            }
        }
        UpdateMode::Remove => {
            if let (Some(items), Some(removals)) = (
                row.get(field).and_then(Value::as_array).cloned(),
                value.as_array(),
            ) {
                let remaining: Vec<Value> = items
                    .into_iter()
                    .filter(|item| !removals.iter().any(|removal| values_equal(item, removal)))
                    .collect();
                row.insert(field.to_string(), Value::Array(remaining));
            }
        }
    }
}

/// Whether a filter node matches a record.
fn matches_filter(inner: &Inner, row: &Map<String, Value>, filter: &Value) -> bool {
    if let Some(group) = filter.as_object() {
        if group.get("filter_operator").and_then(Value::as_str) == Some("any") {
            return group
                .get("filters")
                .and_then(Value::as_array)
                .is_some_and(|filters| filters.iter().any(|f| matches_filter(inner, row, f)));
        }
        return false;
    }
    let Some(clause) = filter.as_array() else {
        return false;
    };
    let [field, op, expected] = clause.as_slice() else {
        return false;
    };
    let (Some(field), Some(op)) = (field.as_str(), op.as_str()) else {
        return false;
    };
    let actual = resolve_path(inner, row, field);
    matches_op(&actual, op, expected)
}

fn matches_op(actual: &Value, op: &str, expected: &Value) -> bool {
    match op {
        "is" => values_equal(actual, expected),
        "is_not" => !values_equal(actual, expected),
        "in" => expected
            .as_array()
            .is_some_and(|options| options.iter().any(|option| values_equal(actual, option))),
        "contains" => match actual {
            Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
            Value::String(text) => expected
                .as_str()
                .is_some_and(|needle| text.contains(needle)),
            _ => false,
        },
        "greater_than" => compare(actual, expected) == Some(std::cmp::Ordering::Greater),
        "less_than" => compare(actual, expected) == Some(std::cmp::Ordering::Less),
        _ => false,
    }
}

/// Equality with record-reference awareness: two objects that both parse as
/// references compare by type and id only, ignoring extra keys like `name`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (EntityRef::from_value(a), EntityRef::from_value(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => Some(a.as_str()?.cmp(b.as_str()?)),
    }
}

/// Resolve a possibly dotted field path against a record, following
/// `field.LinkedType.field` hops through linked records.
fn resolve_path(inner: &Inner, row: &Map<String, Value>, path: &str) -> Value {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = row.clone();
    let mut index = 0;
    while index + 2 < segments.len() {
        let link = match current.get(segments[index]).map(EntityRef::from_value) {
            Some(Some(link)) => link,
            _ => return Value::Null,
        };
        if link.entity_type != segments[index + 1] {
            return Value::Null;
        }
        current = match find_record(inner, &link.entity_type, link.id) {
            Some(linked) => linked.clone(),
            None => return Value::Null,
        };
        index += 2;
    }
    current.get(segments[index]).cloned().unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn find_matches_dotted_paths_through_links() {
        let client = MemoryClient::new();
        let step = client.add_entity("Step", json!({"code": "Compositing", "short_name": "Comp"}));
        client.add_entity("Task", json!({"code": "comp", "step": step.to_value()}));
        client.add_entity("Task", json!({"code": "anim"}));

        let rows = client
            .find(
                "Task",
                &json!([["step.Step.short_name", "is", "Comp"]]),
                &["code".to_string()],
                &FindOptions::default(),
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("code"), Some(&json!("comp")));
    }

    #[test]
    fn projection_always_returns_type_and_id() {
        let client = MemoryClient::new();
        let shot = client.add_entity("Shot", json!({"code": "sh0010", "sg_cut_in": 1001}));
        let rows = client
            .find("Shot", &json!([]), &["code".to_string()], &FindOptions::default())
            .unwrap();
        assert_eq!(
            Value::Object(rows[0].clone()),
            json!({"type": "Shot", "id": shot.id, "code": "sh0010"})
        );
    }

    #[test]
    fn update_modes_merge_list_fields() {
        let client = MemoryClient::new();
        let shot = client.add_entity("Shot", json!({"assets": [{"type": "Asset", "id": 99}]}));
        let addition = json!({"type": "Asset", "id": 100});
        let mut data = Map::new();
        data.insert("assets".into(), json!([addition]));
        let modes: UpdateModes = [("assets".to_string(), UpdateMode::Add)].into();
        client.update("Shot", shot.id, &data, Some(&modes)).unwrap();

        let rows = client
            .find("Shot", &json!([["id", "is", shot.id]]), &[], &FindOptions::default())
            .unwrap();
        assert_eq!(
            rows[0].get("assets"),
            Some(&json!([{"type": "Asset", "id": 99}, {"type": "Asset", "id": 100}]))
        );
    }

    #[test]
    fn reference_equality_ignores_extra_keys() {
        assert!(values_equal(
            &json!({"type": "Shot", "id": 1, "name": "sh0010"}),
            &json!({"type": "Shot", "id": 1}),
        ));
        assert!(!values_equal(
            &json!({"type": "Shot", "id": 1}),
            &json!({"type": "Shot", "id": 2}),
        ));
    }
}
