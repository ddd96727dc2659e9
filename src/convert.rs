//! Bidirectional conversion between raw client values and proxy objects.
//!
//! Every entity/field/site method funnels its inputs through [`to_raw`] and
//! its outputs through [`to_proxy`], so relationship-returning methods never
//! need bespoke conversion code. Classification of a raw value is total and
//! order-independent: a list recurses, an object carrying `type` and `id`
//! becomes a registry-resolved proxy, everything else passes through
//! unchanged.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::client::EntityRef;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::registry::{AnyEntity, AnySite};
use crate::session::Session;

/// A converted field value: either a plain JSON value, a proxy for a linked
/// record, or a list of converted values.
#[derive(Clone)]
pub enum FieldValue {
    /// Scalars, nulls, and non-record objects (e.g. attachment descriptors),
    /// passed through from the client unchanged.
    Raw(Value),
    /// A linked record, wrapped by whichever class the registry resolved.
    Entity(AnyEntity),
    /// A list value, each element converted independently.
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Raw(value) => value.as_str(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Raw(value) => value.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Raw(value) => value.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Raw(value) => value.as_bool(),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&AnyEntity> {
        match self {
            Self::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&Value> {
        match self {
            Self::Raw(value) => Some(value),
            _ => None,
        }
    }

    /// Whether this is an empty field (`null` from the client).
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Raw(Value::Null))
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(value) => f.debug_tuple("Raw").field(value).finish(),
            Self::Entity(entity) => f.debug_tuple("Entity").field(entity.entity()).finish(),
            Self::List(items) => f.debug_list().entries(items).finish(),
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Raw(a), Self::Raw(b)) => a == b,
            (Self::Entity(a), Self::Entity(b)) => a.entity() == b.entity(),
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self::Raw(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Raw(Value::from(value))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Raw(Value::from(value))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Raw(Value::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Raw(Value::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Raw(Value::from(value))
    }
}

impl From<EntityRef> for FieldValue {
    fn from(entity: EntityRef) -> Self {
        Self::Raw(entity.to_value())
    }
}

impl From<Entity> for FieldValue {
    fn from(entity: Entity) -> Self {
        Self::Entity(std::sync::Arc::new(entity))
    }
}

impl From<AnyEntity> for FieldValue {
    fn from(entity: AnyEntity) -> Self {
        Self::Entity(entity)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// Construct a wrapper for a record reference via the session's registry.
pub fn new_entity(session: &Session, entity: impl Into<EntityRef>) -> Result<AnyEntity> {
    let entity = entity.into();
    let factory =
        session
            .registry()
            .resolve(&entity.entity_type)
            .ok_or_else(|| Error::UnregisteredType {
                entity_type: entity.entity_type.clone(),
            })?;
    Ok(factory(session.clone(), entity))
}

/// Construct the site wrapper via the session's registry.
pub fn new_site(session: &Session) -> Result<AnySite> {
    let factory = session
        .registry()
        .resolve_site()
        .ok_or(Error::NoSiteRegistered)?;
    Ok(factory(session.clone()))
}

/// Convert a raw client value into proxy objects where possible.
///
/// Produces a new value; the input is never mutated. List order and length
/// are preserved.
pub fn to_proxy(session: &Session, value: &Value) -> Result<FieldValue> {
    match value {
        Value::Array(items) => Ok(FieldValue::List(
            items
                .iter()
                .map(|item| to_proxy(session, item))
                .collect::<Result<Vec<_>>>()?,
        )),
        Value::Object(_) => match EntityRef::from_value(value) {
            Some(entity) => Ok(FieldValue::Entity(new_entity(session, entity)?)),
            None => Ok(FieldValue::Raw(value.clone())),
        },
        _ => Ok(FieldValue::Raw(value.clone())),
    }
}

/// Convert a proxy-bearing value back to raw client form.
pub fn to_raw(value: &FieldValue) -> Value {
    match value {
        FieldValue::Raw(raw) => raw.clone(),
        FieldValue::Entity(entity) => entity.entity().to_ref().to_value(),
        FieldValue::List(items) => Value::Array(items.iter().map(to_raw).collect()),
    }
}

/// Field-level conversion used by `get`: a `url`-typed value is unwrapped to
/// something directly usable before generic conversion runs.
///
/// An `upload` link returns the attachment descriptor verbatim (it carries
/// `type`/`id` keys, so generic conversion would otherwise swallow it into
/// an Attachment proxy). A `web` link collapses to its URL string, a `local`
/// link to its local filesystem path.
pub fn convert_checked(session: &Session, value: &Value) -> Result<FieldValue> {
    if let Some(obj) = value.as_object() {
        match obj.get("link_type").and_then(Value::as_str) {
            Some("upload") => return Ok(FieldValue::Raw(value.clone())),
            Some("web") => {
                return Ok(FieldValue::Raw(
                    obj.get("url").cloned().unwrap_or(Value::Null),
                ));
            }
            Some("local") => {
                return Ok(FieldValue::Raw(
                    obj.get("local_path").cloned().unwrap_or(Value::Null),
                ));
            }
            _ => {}
        }
    }
    to_proxy(session, value)
}

/// Convert every value of a fields map, as returned by a `find` call.
pub fn fields_to_proxy(
    session: &Session,
    fields: &Map<String, Value>,
) -> Result<HashMap<String, FieldValue>> {
    fields
        .iter()
        .map(|(name, value)| Ok((name.clone(), convert_checked(session, value)?)))
        .collect()
}

/// Convert a fields map of proxy-bearing values back to raw client form.
pub fn fields_to_raw(fields: &[(&str, FieldValue)]) -> Map<String, Value> {
    fields
        .iter()
        .map(|(name, value)| ((*name).to_string(), to_raw(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::test_support::memory_session;

    use super::*;

    #[test]
    fn record_reference_round_trips() {
        let session = memory_session();
        let raw = json!({"type": "Project", "id": 1});
        let proxied = to_proxy(&session, &raw).unwrap();
        assert_eq!(to_raw(&proxied), raw);
    }

    #[test]
    fn scalars_pass_through_unchanged() {
        let session = memory_session();
        for raw in [json!("text"), json!(17), json!(2.5), json!(true), json!(null)] {
            let converted = to_proxy(&session, &raw).unwrap();
            assert_eq!(converted, FieldValue::Raw(raw.clone()));
            assert_eq!(to_raw(&converted), raw);
        }
    }

    #[test]
    fn non_record_objects_pass_through() {
        let session = memory_session();
        let raw = json!({"name": "render.exr", "content_type": "image/exr"});
        assert_eq!(
            to_proxy(&session, &raw).unwrap(),
            FieldValue::Raw(raw.clone())
        );
    }

    #[test]
    fn list_mapping_preserves_order_and_length() {
        let session = memory_session();
        let raw = json!([
            {"type": "Shot", "id": 1},
            {"type": "Shot", "id": 2},
            {"type": "Shot", "id": 3},
        ]);
        let converted = to_proxy(&session, &raw).unwrap();
        let items = converted.as_list().unwrap();
        assert_eq!(items.len(), 3);
        for (index, item) in items.iter().enumerate() {
            let entity = item.as_entity().unwrap().entity();
            assert_eq!(entity.id(), index as i64 + 1);
            assert_eq!(entity.entity_type(), "Shot");
        }
        assert_eq!(to_raw(&converted), raw);
    }

    #[test]
    fn unregistered_type_without_fallback_fails() {
        let client = crate::test_support::MemoryClient::new();
        let session = Session::with_registry(client, crate::Registry::new());
        let err = to_proxy(&session, &json!({"type": "Note", "id": 7})).unwrap_err();
        assert!(matches!(err, Error::UnregisteredType { ref entity_type } if entity_type == "Note"));
    }

    #[test]
    fn fallback_resolution_is_idempotent() {
        let session = memory_session();
        let raw = json!({"type": "CustomEntity01", "id": 5});
        let first = to_proxy(&session, &raw).unwrap();
        let second = to_proxy(&session, &raw).unwrap();
        assert_eq!(first, second);
        // Registering afterwards takes effect immediately.
        session.registry_mut().register(
            "CustomEntity01",
            std::sync::Arc::new(|session, entity| {
                std::sync::Arc::new(Entity::new(session, entity.entity_type, entity.id))
            }),
        );
        assert!(session.registry().is_registered("CustomEntity01"));
    }

    #[test]
    fn web_link_collapses_to_url_string() {
        let session = memory_session();
        let raw = json!({"link_type": "web", "url": "https://example.com/page", "name": "page"});
        let converted = convert_checked(&session, &raw).unwrap();
        assert_eq!(converted.as_str(), Some("https://example.com/page"));
    }

    #[test]
    fn local_link_collapses_to_path_string() {
        let session = memory_session();
        let raw = json!({"link_type": "local", "local_path": "/mnt/projects/sh01.mov"});
        let converted = convert_checked(&session, &raw).unwrap();
        assert_eq!(converted.as_str(), Some("/mnt/projects/sh01.mov"));
    }

    #[test]
    fn upload_link_returns_descriptor_verbatim() {
        let session = memory_session();
        // Carries type/id keys; generic conversion would turn it into an
        // Attachment proxy, which callers do not want here.
        let raw = json!({
            "link_type": "upload",
            "type": "Attachment",
            "id": 12,
            "name": "notes.pdf",
            "url": "https://example.com/file/12",
        });
        let converted = convert_checked(&session, &raw).unwrap();
        assert_eq!(converted, FieldValue::Raw(raw.clone()));
    }
}
