//! The entity proxy.
//!
//! An [`Entity`] wraps `(session, type, id)` and nothing else: no field data
//! is cached, every access is a fresh round trip unless the caller batches
//! fields through [`Entity::get`]. The relationship query builders at the
//! bottom are the building blocks the typed wrappers in
//! [`crate::entities`] narrow into named helpers.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::client::{EntityRef, FindOptions, UpdateModes};
use crate::convert::{FieldValue, fields_to_proxy, fields_to_raw, new_site};
use crate::entities::{PublishedFile, Task, Version};
use crate::error::{Error, Result};
use crate::field::{Field, FieldSchema};
use crate::filter::{Filter, filters_to_raw};
use crate::registry::{AnySite, RegisteredEntity, TypedEntity};
use crate::session::Session;

/// A pipeline-step filter argument: either a concrete step record or a name
/// matched against the step's `code` and `short_name`.
#[derive(Debug, Clone, PartialEq)]
pub enum StepRef {
    Entity(EntityRef),
    Name(String),
}

impl From<EntityRef> for StepRef {
    fn from(entity: EntityRef) -> Self {
        Self::Entity(entity)
    }
}

impl From<&str> for StepRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

/// Proxy for a single remote record.
#[derive(Debug, Clone)]
pub struct Entity {
    session: Session,
    entity_type: String,
    id: i64,
}

impl Entity {
    pub fn new(session: Session, entity_type: impl Into<String>, id: i64) -> Self {
        Self {
            session,
            entity_type: entity_type.into(),
            id,
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The `(type, id)` record reference. Pure, no I/O.
    pub fn to_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type.clone(), self.id)
    }

    /// Detail-page URL for this record.
    ///
    /// Only works for types with a detail view enabled in the site settings.
    pub fn url(&self) -> String {
        format!(
            "{}/detail/{}/{}",
            self.session.base_url(),
            self.entity_type,
            self.id
        )
    }

    /// The site wrapper for the session this entity belongs to.
    pub fn site(&self) -> Result<AnySite> {
        new_site(&self.session)
    }

    /// A field proxy. Construct only; no I/O happens until the field is
    /// read or written.
    pub fn field(&self, name: impl Into<String>) -> Field {
        Field::new(self.clone(), name)
    }

    /// Fetch the requested fields in one round trip, converting linked
    /// records into proxy objects. The implicit `type`/`id` keys are
    /// stripped from the result.
    pub fn get(&self, fields: &[&str]) -> Result<HashMap<String, FieldValue>> {
        let raw = self.get_raw(fields)?;
        fields_to_proxy(&self.session, &raw)
    }

    /// Like [`Entity::get`] but returning the client's raw values.
    pub fn get_raw(&self, fields: &[&str]) -> Result<Map<String, Value>> {
        debug!(entity_type = %self.entity_type, id = self.id, count = fields.len(), "fetching fields");
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let mut row = self
            .session
            .client()
            .find_one(&self.entity_type, &self.id_filter(), &fields)?
            .ok_or_else(|| self.not_found())?;
        row.remove("id");
        row.remove("type");
        Ok(row)
    }

    /// Set several fields in one update call. Proxy values collapse to raw
    /// record references; `modes` forwards per-field multi-entity update
    /// modes unchanged (the server owns the merge semantics).
    pub fn set(&self, data: &[(&str, FieldValue)], modes: Option<&UpdateModes>) -> Result<()> {
        debug!(entity_type = %self.entity_type, id = self.id, count = data.len(), "updating fields");
        self.session
            .client()
            .update(&self.entity_type, self.id, &fields_to_raw(data), modes)
    }

    /// Delete this record. The proxy is conceptually dead afterwards;
    /// further calls are undefined.
    pub fn delete(&self) -> Result<bool> {
        debug!(entity_type = %self.entity_type, id = self.id, "deleting entity");
        self.session.client().delete(&self.entity_type, self.id)
    }

    /// Field proxies for every field visible on this type, optionally in
    /// the context of a project.
    pub fn fields(&self, project: Option<&EntityRef>) -> Result<Vec<Field>> {
        Ok(self
            .visible_fields(project)?
            .into_iter()
            .map(|name| self.field(name))
            .collect())
    }

    /// All visible fields and their values, converted to proxy objects.
    pub fn all_field_values(
        &self,
        project: Option<&EntityRef>,
    ) -> Result<HashMap<String, FieldValue>> {
        let raw = self.all_field_values_raw(project)?;
        fields_to_proxy(&self.session, &raw)
    }

    /// All visible fields and their raw values.
    pub fn all_field_values_raw(&self, project: Option<&EntityRef>) -> Result<Map<String, Value>> {
        let fields = self.visible_fields(project)?;
        self.session
            .client()
            .find_one(&self.entity_type, &self.id_filter(), &fields)?
            .ok_or_else(|| self.not_found())
    }

    /// A batch-operation descriptor for deferred execution. Pure builder;
    /// performs no I/O.
    pub fn batch_update_dict(&self, data: &[(&str, FieldValue)]) -> Map<String, Value> {
        let mut request = Map::new();
        request.insert("request_type".into(), "update".into());
        request.insert("entity_type".into(), self.entity_type.clone().into());
        request.insert("entity_id".into(), self.id.into());
        request.insert("data".into(), Value::Object(fields_to_raw(data)));
        request
    }

    /// Entity-level schema metadata for this type.
    pub fn schema(&self) -> Result<Value> {
        let mut schemas = self.session.client().schema_entity_read()?;
        schemas
            .remove(&self.entity_type)
            .ok_or_else(|| Error::MissingSchema {
                entity_type: self.entity_type.clone(),
                missing: self.entity_type.clone(),
            })
    }

    /// Display name of this entity type.
    pub fn type_display_name(&self) -> Result<String> {
        let schema = self.schema()?;
        schema
            .pointer("/name/value")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::MissingSchema {
                entity_type: self.entity_type.clone(),
                missing: "name".into(),
            })
    }

    /// Schema proxies for every field of this type.
    pub fn field_schemas(&self) -> Result<HashMap<String, FieldSchema>> {
        let schemas = self
            .session
            .client()
            .schema_field_read(&self.entity_type, None, None)?;
        Ok(schemas
            .keys()
            .map(|name| {
                (
                    name.clone(),
                    FieldSchema::new(self.session.clone(), &self.entity_type, name),
                )
            })
            .collect())
    }

    /// The conventional name field of this type: the first of `code`,
    /// `name` or `title` that exists in the schema.
    pub fn name_field(&self) -> Result<Field> {
        let schemas = self
            .session
            .client()
            .schema_field_read(&self.entity_type, None, None)?;
        for candidate in ["code", "name", "title"] {
            if schemas.contains_key(candidate) {
                return Ok(self.field(candidate));
            }
        }
        Err(Error::NoNameField {
            entity_type: self.entity_type.clone(),
        })
    }

    fn id_filter(&self) -> Value {
        filters_to_raw(&[Filter::clause("id", "is", self.id)])
    }

    fn not_found(&self) -> Error {
        Error::RecordNotFound {
            entity_type: self.entity_type.clone(),
            id: self.id,
        }
    }

    fn visible_fields(&self, project: Option<&EntityRef>) -> Result<Vec<String>> {
        let schemas = self
            .session
            .client()
            .schema_field_read(&self.entity_type, None, project)?;
        Ok(schemas
            .iter()
            .filter(|(_, schema)| {
                schema
                    .pointer("/visible/value")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            })
            .map(|(name, _)| name.clone())
            .collect())
    }

    // ------------------------------------------------------------------
    // Relationship query builders. Publishes, tasks and versions hang off
    // different link fields per entity type, so the typed wrappers supply
    // the base filter and expose these with narrowed signatures.
    // ------------------------------------------------------------------

    /// Query published files. With `latest`, publishes sharing a `name` are
    /// grouped and only the entry with the highest
    /// `(created_at, version_number)` survives per group; ties fall to input
    /// order (last wins), and the winners come back sorted by name.
    pub fn publishes_filtered(
        &self,
        base_filter: Vec<Filter>,
        pub_types: Option<&[&str]>,
        latest: bool,
        additional: &[Filter],
    ) -> Result<Vec<PublishedFile>> {
        let mut filters = base_filter;
        if let Some(pub_types) = pub_types {
            filters.push(match pub_types {
                [single] => Filter::clause("published_file_type.PublishedFileType.code", "is", *single),
                many => Filter::any(many.iter().map(|name| {
                    Filter::clause("published_file_type.PublishedFileType.code", "is", *name)
                })),
            });
        }
        filters.extend_from_slice(additional);

        let fields = ["name", "version_number", "created_at"].map(String::from);
        let mut rows = self.session.client().find(
            "PublishedFile",
            &filters_to_raw(&filters),
            &fields,
            &FindOptions::default(),
        )?;

        if latest {
            rows = latest_publishes(rows);
        }

        rows.iter().map(|row| self.row_id(row)).collect::<Result<Vec<_>>>().map(|ids| {
            ids.into_iter()
                .map(|id| PublishedFile::from_id(self.session.clone(), id))
                .collect()
        })
    }

    /// Query tasks, filtered by name(s), linked entity, assignee and/or
    /// pipeline step.
    pub fn tasks_filtered(
        &self,
        names: Option<&[&str]>,
        entity: Option<EntityRef>,
        assignee: Option<EntityRef>,
        step: Option<StepRef>,
        additional: &[Filter],
    ) -> Result<Vec<Task>> {
        let mut filters = Vec::new();
        if let Some(entity) = entity {
            filters.push(Filter::clause("entity", "is", entity));
        }
        if let Some(assignee) = assignee {
            filters.push(Filter::clause("task_assignees", "contains", assignee));
        }
        if let Some(names) = names {
            filters.push(match names {
                [single] => Filter::clause("code", "is", *single),
                many => Filter::any(many.iter().map(|name| Filter::clause("code", "is", *name))),
            });
        }
        if let Some(step) = step {
            filters.push(match step {
                StepRef::Entity(step) => Filter::clause("step", "is", step),
                StepRef::Name(name) => Filter::any([
                    Filter::clause("step.Step.code", "is", name.as_str()),
                    Filter::clause("step.Step.short_name", "is", name.as_str()),
                ]),
            });
        }
        filters.extend_from_slice(additional);

        let rows = self.session.client().find(
            "Task",
            &filters_to_raw(&filters),
            &[],
            &FindOptions::default(),
        )?;
        rows.iter()
            .map(|row| Ok(Task::from_id(self.session.clone(), self.row_id(row)?)))
            .collect()
    }

    /// Query versions linked to an entity and/or created by a user. With
    /// `latest`, only the newest version by `created_at` is returned.
    pub fn versions_filtered(
        &self,
        entity: Option<EntityRef>,
        user: Option<EntityRef>,
        latest: bool,
        additional: &[Filter],
    ) -> Result<Vec<Version>> {
        let mut filters = Vec::new();
        if let Some(entity) = entity {
            filters.push(Filter::clause("entity", "is", entity));
        }
        if let Some(user) = user {
            filters.push(Filter::clause("user", "is", user));
        }
        filters.extend_from_slice(additional);

        let fields = ["created_at"].map(String::from);
        let mut rows = self.session.client().find(
            "Version",
            &filters_to_raw(&filters),
            &fields,
            &FindOptions::default(),
        )?;

        if latest {
            rows.sort_by(|a, b| cmp_values(a.get("created_at"), b.get("created_at")));
            rows = rows.pop().into_iter().collect();
        }

        rows.iter()
            .map(|row| Ok(Version::from_id(self.session.clone(), self.row_id(row)?)))
            .collect()
    }

    fn row_id(&self, row: &Map<String, Value>) -> Result<i64> {
        row.get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::MalformedRecord {
                record: Value::Object(row.clone()),
            })
    }
}

/// Structural equality: same type, same id, same remote site.
impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.entity_type == other.entity_type
            && self.id == other.id
            && self.session.base_url() == other.session.base_url()
    }
}

impl TypedEntity for Entity {
    fn entity(&self) -> &Entity {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<&Entity> for EntityRef {
    fn from(entity: &Entity) -> Self {
        entity.to_ref()
    }
}

/// Group publishes by `name`, keep the highest
/// `(created_at, version_number)` per group, return the winners sorted by
/// name. The per-group sort is stable and the last element is taken, so
/// full ties resolve to the record that came last in the input.
fn latest_publishes(rows: Vec<Map<String, Value>>) -> Vec<Map<String, Value>> {
    let mut groups: Vec<(String, Vec<Map<String, Value>>)> = Vec::new();
    for row in rows {
        let name = row
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match groups.iter_mut().find(|(group, _)| *group == name) {
            Some((_, members)) => members.push(row),
            None => groups.push((name, vec![row])),
        }
    }

    let mut winners: Vec<(String, Map<String, Value>)> = groups
        .into_iter()
        .filter_map(|(name, mut members)| {
            members.sort_by(|a, b| {
                cmp_values(a.get("created_at"), b.get("created_at"))
                    .then_with(|| cmp_values(a.get("version_number"), b.get("version_number")))
            });
            members.pop().map(|row| (name, row))
        })
        .collect();

    winners.sort_by(|(a, _), (b, _)| a.cmp(b));
    winners.into_iter().map(|(_, row)| row).collect()
}

/// Ordering over loosely typed sort keys: numbers compare numerically,
/// everything else by string form. Absent values sort first.
fn cmp_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a
                .as_str()
                .unwrap_or_default()
                .cmp(b.as_str().unwrap_or_default()),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::test_support::{MemoryClient, memory_session};

    use super::*;

    #[test]
    fn equality_is_structural() {
        let session = memory_session();
        let a = Entity::new(session.clone(), "Project", 1);
        let b = Entity::new(session.clone(), "Project", 1);
        assert_eq!(a, b);
        assert_ne!(a, Entity::new(session.clone(), "Project", 2));
        assert_ne!(a, Entity::new(session.clone(), "Shot", 1));

        let other_site = crate::Session::new(MemoryClient::with_base_url("https://other.example.com"));
        assert_ne!(a, Entity::new(other_site, "Project", 1));
    }

    #[test]
    fn to_ref_performs_no_io() {
        let client = MemoryClient::new();
        let session = crate::Session::new(client.clone());
        let entity = Entity::new(session, "Project", 1);
        assert_eq!(entity.to_ref(), EntityRef::new("Project", 1));
        assert_eq!(client.call_count(), 0);
    }

    #[test]
    fn url_points_at_detail_page() {
        let session = memory_session();
        let entity = Entity::new(session, "Shot", 17);
        assert_eq!(entity.url(), "https://test.example.com/detail/Shot/17");
    }

    #[test]
    fn batch_update_dict_builds_descriptor_without_io() {
        let client = MemoryClient::new();
        let session = crate::Session::new(client.clone());
        let entity = Entity::new(session, "Project", 1);
        let request = entity.batch_update_dict(&[("name", "FooBar".into())]);
        assert_eq!(
            Value::Object(request),
            json!({
                "request_type": "update",
                "entity_type": "Project",
                "entity_id": 1,
                "data": {"name": "FooBar"},
            })
        );
        assert_eq!(client.call_count(), 0);
    }

    #[test]
    fn batch_update_dict_converts_proxy_values() {
        let session = memory_session();
        let entity = Entity::new(session.clone(), "Shot", 5);
        let user = Entity::new(session, "HumanUser", 3);
        let request = entity.batch_update_dict(&[("sg_supervisor", user.into())]);
        assert_eq!(
            request.get("data"),
            Some(&json!({"sg_supervisor": {"type": "HumanUser", "id": 3}}))
        );
    }

    #[test]
    fn cmp_values_orders_numbers_numerically() {
        assert_eq!(
            cmp_values(Some(&json!(9)), Some(&json!(10))),
            Ordering::Less
        );
        assert_eq!(
            cmp_values(Some(&json!("2024-02-01")), Some(&json!("2024-01-02"))),
            Ordering::Greater
        );
        assert_eq!(cmp_values(None, Some(&json!(1))), Ordering::Less);
    }

    #[test]
    fn latest_publishes_last_one_wins_on_full_tie() {
        let rows: Vec<Map<String, Value>> = [
            json!({"id": 1, "name": "sh1111_city", "version_number": 2, "created_at": "2024-01-01T00:00:00Z"}),
            json!({"id": 2, "name": "sh1111_city", "version_number": 2, "created_at": "2024-01-01T00:00:00Z"}),
        ]
        .into_iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect();

        let winners = latest_publishes(rows);
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].get("id"), Some(&json!(2)));
    }
}
