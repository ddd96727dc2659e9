//! The site proxy: site-scoped queries returning proxy objects.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::client::{Client, Connect, Credentials, EntityRef, FindOptions};
use crate::convert::{FieldValue, fields_to_raw, new_entity};
use crate::entities::{HumanUser, Project};
use crate::error::{Error, Result};
use crate::field::FieldSchema;
use crate::filter::{Filter, filters_to_raw};
use crate::registry::{AnyEntity, RegisteredEntity, Registry, TypedSite};
use crate::session::Session;

/// A project lookup key: display/short name or numeric id.
#[derive(Debug, Clone, PartialEq)]
pub enum NameOrId {
    Name(String),
    Id(i64),
}

impl From<&str> for NameOrId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for NameOrId {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<i64> for NameOrId {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

/// Selection of projects by ids or by names.
///
/// Names match either the short name (`tank_name`) or the display name
/// (`name`). Ids and names cannot be mixed in one selector; that ambiguity
/// is deliberately unrepresentable.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectSelector {
    Ids(Vec<i64>),
    Names(Vec<String>),
}

impl ProjectSelector {
    fn matches(&self, row: &serde_json::Map<String, Value>) -> bool {
        match self {
            Self::Ids(ids) => row
                .get("id")
                .and_then(Value::as_i64)
                .is_some_and(|id| ids.contains(&id)),
            Self::Names(names) => ["tank_name", "name"].iter().any(|field| {
                row.get(*field)
                    .and_then(Value::as_str)
                    .is_some_and(|value| names.iter().any(|name| name == value))
            }),
        }
    }
}

impl From<NameOrId> for ProjectSelector {
    fn from(name_or_id: NameOrId) -> Self {
        match name_or_id {
            NameOrId::Name(name) => Self::Names(vec![name]),
            NameOrId::Id(id) => Self::Ids(vec![id]),
        }
    }
}

/// Proxy for the remote site as a whole.
#[derive(Debug, Clone)]
pub struct Site {
    session: Session,
}

impl Site {
    /// A site over an already-built client connection, with the default
    /// registry.
    pub fn new(client: impl Client + 'static) -> Self {
        Self::from_session(Session::new(client))
    }

    /// A site with an explicitly configured registry.
    pub fn with_registry(client: impl Client + 'static, registry: Registry) -> Self {
        Self::from_session(Session::with_registry(client, registry))
    }

    /// A site from raw connection parameters, forwarded to the client's own
    /// constructor.
    pub fn connect<C: Connect + 'static>(credentials: &Credentials) -> Result<Self> {
        Ok(Self::new(C::connect(credentials)?))
    }

    pub fn from_session(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Create a record and return its proxy. Proxy values in `data`
    /// collapse to raw record references.
    pub fn create(&self, entity_type: &str, data: &[(&str, FieldValue)]) -> Result<AnyEntity> {
        debug!(entity_type, count = data.len(), "creating entity");
        let row = self
            .session
            .client()
            .create(entity_type, &fields_to_raw(data), None)?;
        new_entity(&self.session, row_ref(&row)?)
    }

    /// Query records, returning proxy objects resolved through the
    /// registry.
    pub fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        options: &FindOptions,
    ) -> Result<Vec<AnyEntity>> {
        debug!(entity_type, clauses = filters.len(), "finding entities");
        let rows =
            self.session
                .client()
                .find(entity_type, &filters_to_raw(filters), &[], options)?;
        rows.iter()
            .map(|row| new_entity(&self.session, row_ref(row)?))
            .collect()
    }

    /// Query a single record; `Ok(None)` when nothing matches.
    pub fn find_one(
        &self,
        entity_type: &str,
        filters: &[Filter],
        options: &FindOptions,
    ) -> Result<Option<AnyEntity>> {
        Ok(self.find(entity_type, filters, options)?.into_iter().next())
    }

    /// Look up one project by name or id. Archived projects are included.
    pub fn project(&self, name_or_id: impl Into<NameOrId>) -> Result<Option<Project>> {
        let selector = ProjectSelector::from(name_or_id.into());
        Ok(self.projects(Some(&selector), true, false)?.into_iter().next())
    }

    /// Projects of the site, optionally narrowed by a selector.
    pub fn projects(
        &self,
        selector: Option<&ProjectSelector>,
        include_archived: bool,
        template_projects: bool,
    ) -> Result<Vec<Project>> {
        let options = FindOptions {
            include_archived_projects: include_archived,
            ..FindOptions::default()
        };
        let fields = ["tank_name", "name"].map(String::from);
        let filters = filters_to_raw(&[Filter::clause("is_template", "is", template_projects)]);
        let rows = self
            .session
            .client()
            .find("Project", &filters, &fields, &options)?;

        rows.iter()
            .filter(|row| selector.is_none_or(|selector| selector.matches(row)))
            .map(|row| Ok(Project::from_id(self.session.clone(), row_ref(row)?.id)))
            .collect()
    }

    /// People of the site. With `only_active`, retired and disabled users
    /// are filtered out server-side.
    pub fn people(&self, only_active: bool) -> Result<Vec<HumanUser>> {
        let mut filters = Vec::new();
        if only_active {
            filters.push(Filter::clause("sg_status_list", "is", "act"));
        }
        let rows = self.session.client().find(
            "HumanUser",
            &filters_to_raw(&filters),
            &[],
            &FindOptions::default(),
        )?;
        rows.iter()
            .map(|row| Ok(HumanUser::from_id(self.session.clone(), row_ref(row)?.id)))
            .collect()
    }

    /// Look up a pipeline configuration by name or id, optionally scoped to
    /// a project. With no arguments an arbitrary matching configuration is
    /// returned.
    pub fn pipeline_configuration(
        &self,
        name_or_id: Option<NameOrId>,
        project: Option<&EntityRef>,
    ) -> Result<Option<AnyEntity>> {
        let mut filters = Vec::new();
        match name_or_id {
            Some(NameOrId::Id(id)) => filters.push(Filter::clause("id", "is", id)),
            Some(NameOrId::Name(name)) => filters.push(Filter::clause("code", "is", name)),
            None => {}
        }
        if let Some(project) = project {
            filters.push(Filter::clause("project", "is", project.clone()));
        }
        self.find_one("PipelineConfiguration", &filters, &FindOptions::default())
    }

    /// Field schema proxies for every entity type of the site, from one
    /// full-schema fetch.
    pub fn entity_field_schemas(&self) -> Result<HashMap<String, HashMap<String, FieldSchema>>> {
        let schema = self.session.client().schema_read()?;
        Ok(schema
            .iter()
            .map(|(entity_type, fields)| {
                let fields = fields
                    .as_object()
                    .map(|fields| {
                        fields
                            .keys()
                            .map(|field| {
                                (
                                    field.clone(),
                                    FieldSchema::new(self.session.clone(), entity_type, field),
                                )
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                (entity_type.clone(), fields)
            })
            .collect())
    }
}

impl TypedSite for Site {
    fn site(&self) -> &Site {
        self
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn row_ref(row: &serde_json::Map<String, Value>) -> Result<EntityRef> {
    EntityRef::from_value(&Value::Object(row.clone())).ok_or_else(|| Error::MalformedRecord {
        record: Value::Object(row.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matches_ids_exactly() {
        let selector = ProjectSelector::Ids(vec![1, 3]);
        let row = serde_json::json!({"id": 3, "name": "Other"});
        assert!(selector.matches(row.as_object().unwrap()));
        let row = serde_json::json!({"id": 2, "name": "Other"});
        assert!(!selector.matches(row.as_object().unwrap()));
    }

    #[test]
    fn selector_matches_either_name_field() {
        let selector = ProjectSelector::Names(vec!["tpa".into()]);
        let by_short = serde_json::json!({"id": 1, "tank_name": "tpa", "name": "Test Project A"});
        assert!(selector.matches(by_short.as_object().unwrap()));
        let by_display = serde_json::json!({"id": 1, "tank_name": "x", "name": "tpa"});
        assert!(selector.matches(by_display.as_object().unwrap()));
        let neither = serde_json::json!({"id": 1, "tank_name": "x", "name": "y"});
        assert!(!selector.matches(neither.as_object().unwrap()));
    }
}
