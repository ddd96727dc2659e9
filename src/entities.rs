//! Typed wrappers for the builtin record types.
//!
//! Each wrapper derefs to [`Entity`] and adds the helpers that make sense
//! for its type, mostly by narrowing the relationship query builders on
//! [`Entity`] to the link field the type uses. They carry no state beyond
//! the proxy itself; a host wanting different behavior registers its own
//! wrapper under the same type name.

use std::any::Any;
use std::ops::Deref;

use serde_json::{Map, Value};

use crate::client::{EntityRef, FindOptions};
use crate::entity::{Entity, StepRef};
use crate::error::{Error, Result};
use crate::filter::{Filter, filters_to_raw};
use crate::registry::{AnyEntity, RegisteredEntity, TypedEntity};
use crate::session::Session;

macro_rules! entity_wrapper {
    ($(#[$doc:meta])* $name:ident => $type_name:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            entity: Entity,
        }

        impl $name {
            pub fn new(session: Session, id: i64) -> Self {
                <Self as RegisteredEntity>::from_id(session, id)
            }
        }

        impl RegisteredEntity for $name {
            const TYPE_NAME: &'static str = $type_name;

            fn from_id(session: Session, id: i64) -> Self {
                Self {
                    entity: Entity::new(session, $type_name, id),
                }
            }
        }

        impl TypedEntity for $name {
            fn entity(&self) -> &Entity {
                &self.entity
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        impl Deref for $name {
            type Target = Entity;

            fn deref(&self) -> &Entity {
                &self.entity
            }
        }

        impl From<&$name> for EntityRef {
            fn from(wrapper: &$name) -> Self {
                wrapper.entity.to_ref()
            }
        }

        impl From<$name> for crate::convert::FieldValue {
            fn from(wrapper: $name) -> Self {
                Self::Entity(std::sync::Arc::new(wrapper))
            }
        }
    };
}

entity_wrapper! {
    /// A project.
    Project => "Project"
}

entity_wrapper! {
    /// A shot within a project.
    Shot => "Shot"
}

entity_wrapper! {
    /// An asset within a project.
    Asset => "Asset"
}

entity_wrapper! {
    /// A task on a shot, asset or other entity.
    Task => "Task"
}

entity_wrapper! {
    /// A published file.
    PublishedFile => "PublishedFile"
}

entity_wrapper! {
    /// A review version.
    Version => "Version"
}

entity_wrapper! {
    /// A playlist of versions.
    Playlist => "Playlist"
}

entity_wrapper! {
    /// A person with a login on the site.
    HumanUser => "HumanUser"
}

impl Project {
    /// Shots of this project, optionally narrowed by a glob pattern over
    /// the shot `code` (`*` and `?` wildcards, case sensitive).
    pub fn shots(&self, glob_pattern: Option<&str>) -> Result<Vec<Shot>> {
        let rows = self.find_in_project("Shot")?;
        collect_named(self.session(), rows, glob_pattern, Shot::from_id)
    }

    /// Assets of this project, optionally narrowed by a glob pattern over
    /// the asset `code`.
    pub fn assets(&self, glob_pattern: Option<&str>) -> Result<Vec<Asset>> {
        let rows = self.find_in_project("Asset")?;
        collect_named(self.session(), rows, glob_pattern, Asset::from_id)
    }

    /// Tasks within this project.
    pub fn tasks(
        &self,
        names: Option<&[&str]>,
        entity: Option<EntityRef>,
        assignee: Option<EntityRef>,
        step: Option<StepRef>,
    ) -> Result<Vec<Task>> {
        let project_filter = [Filter::clause("project", "is", self.to_ref())];
        self.tasks_filtered(names, entity, assignee, step, &project_filter)
    }

    /// Publishes of this project.
    pub fn publishes(
        &self,
        pub_types: Option<&[&str]>,
        latest: bool,
        additional: &[Filter],
    ) -> Result<Vec<PublishedFile>> {
        let base = vec![Filter::clause("project", "is", self.to_ref())];
        self.publishes_filtered(base, pub_types, latest, additional)
    }

    /// Versions of this project, optionally narrowed to one linked entity
    /// or creating user.
    pub fn versions(
        &self,
        entity: Option<EntityRef>,
        user: Option<EntityRef>,
        latest: bool,
    ) -> Result<Vec<Version>> {
        let project_filter = [Filter::clause("project", "is", self.to_ref())];
        self.versions_filtered(entity, user, latest, &project_filter)
    }

    /// People assigned to this project.
    pub fn people(&self) -> Result<Vec<HumanUser>> {
        let filters = filters_to_raw(&[Filter::clause("projects", "contains", self.to_ref())]);
        let rows = self.session().client().find(
            "HumanUser",
            &filters,
            &[],
            &FindOptions::default(),
        )?;
        rows.iter()
            .map(|row| Ok(HumanUser::from_id(self.session().clone(), row_id(row)?)))
            .collect()
    }

    /// Playlists of this project.
    pub fn playlists(&self) -> Result<Vec<Playlist>> {
        let rows = self.find_in_project("Playlist")?;
        rows.iter()
            .map(|row| Ok(Playlist::from_id(self.session().clone(), row_id(row)?)))
            .collect()
    }

    fn find_in_project(&self, entity_type: &str) -> Result<Vec<Map<String, Value>>> {
        let filters = filters_to_raw(&[Filter::clause("project", "is", self.to_ref())]);
        let fields = ["code"].map(String::from);
        self.session()
            .client()
            .find(entity_type, &filters, &fields, &FindOptions::default())
    }
}

impl Shot {
    pub fn publishes(
        &self,
        pub_types: Option<&[&str]>,
        latest: bool,
        additional: &[Filter],
    ) -> Result<Vec<PublishedFile>> {
        let base = vec![Filter::clause("entity", "is", self.to_ref())];
        self.publishes_filtered(base, pub_types, latest, additional)
    }

    pub fn tasks(
        &self,
        names: Option<&[&str]>,
        assignee: Option<EntityRef>,
        step: Option<StepRef>,
    ) -> Result<Vec<Task>> {
        self.tasks_filtered(names, Some(self.to_ref()), assignee, step, &[])
    }

    pub fn versions(&self, user: Option<EntityRef>, latest: bool) -> Result<Vec<Version>> {
        self.versions_filtered(Some(self.to_ref()), user, latest, &[])
    }
}

impl Asset {
    pub fn publishes(
        &self,
        pub_types: Option<&[&str]>,
        latest: bool,
        additional: &[Filter],
    ) -> Result<Vec<PublishedFile>> {
        let base = vec![Filter::clause("entity", "is", self.to_ref())];
        self.publishes_filtered(base, pub_types, latest, additional)
    }

    pub fn tasks(
        &self,
        names: Option<&[&str]>,
        assignee: Option<EntityRef>,
        step: Option<StepRef>,
    ) -> Result<Vec<Task>> {
        self.tasks_filtered(names, Some(self.to_ref()), assignee, step, &[])
    }

    pub fn versions(&self, user: Option<EntityRef>, latest: bool) -> Result<Vec<Version>> {
        self.versions_filtered(Some(self.to_ref()), user, latest, &[])
    }
}

impl Task {
    pub fn publishes(
        &self,
        pub_types: Option<&[&str]>,
        latest: bool,
        additional: &[Filter],
    ) -> Result<Vec<PublishedFile>> {
        let base = vec![Filter::clause("task", "is", self.to_ref())];
        self.publishes_filtered(base, pub_types, latest, additional)
    }

    pub fn versions(&self, user: Option<EntityRef>, latest: bool) -> Result<Vec<Version>> {
        let task_filter = [Filter::clause("sg_task", "is", self.to_ref())];
        self.versions_filtered(None, user, latest, &task_filter)
    }
}

impl Playlist {
    /// Versions of this playlist, in playlist order.
    pub fn media(&self) -> Result<Vec<AnyEntity>> {
        let versions = self.field("versions").get()?;
        Ok(versions
            .as_list()
            .unwrap_or_default()
            .iter()
            .filter_map(|item| item.as_entity().cloned())
            .collect())
    }
}

impl HumanUser {
    /// Tasks assigned to this user.
    pub fn tasks(
        &self,
        names: Option<&[&str]>,
        entity: Option<EntityRef>,
        step: Option<StepRef>,
    ) -> Result<Vec<Task>> {
        self.tasks_filtered(names, entity, Some(self.to_ref()), step, &[])
    }

    /// Publishes created by this user.
    pub fn publishes(
        &self,
        pub_types: Option<&[&str]>,
        latest: bool,
        additional: &[Filter],
    ) -> Result<Vec<PublishedFile>> {
        let base = vec![Filter::clause("created_by", "is", self.to_ref())];
        self.publishes_filtered(base, pub_types, latest, additional)
    }

    /// Versions created by this user.
    pub fn versions(&self, entity: Option<EntityRef>, latest: bool) -> Result<Vec<Version>> {
        self.versions_filtered(entity, Some(self.to_ref()), latest, &[])
    }
}

fn collect_named<T>(
    session: &Session,
    rows: Vec<Map<String, Value>>,
    glob_pattern: Option<&str>,
    from_id: impl Fn(Session, i64) -> T,
) -> Result<Vec<T>> {
    rows.iter()
        .filter(|row| match glob_pattern {
            Some(pattern) => row
                .get("code")
                .and_then(Value::as_str)
                .is_some_and(|code| glob_match(pattern, code)),
            None => true,
        })
        .map(|row| Ok(from_id(session.clone(), row_id(row)?)))
        .collect()
}

fn row_id(row: &Map<String, Value>) -> Result<i64> {
    row.get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::MalformedRecord {
            record: Value::Object(row.clone()),
        })
}

/// Shell-style glob matching: `*` matches any run of characters, `?` any
/// single character. Case sensitive.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(pattern: &[char], text: &[char]) -> bool {
        match pattern {
            [] => text.is_empty(),
            ['*', rest @ ..] => {
                (0..=text.len()).any(|skip| inner(rest, &text[skip..]))
            }
            ['?', rest @ ..] => !text.is_empty() && inner(rest, &text[1..]),
            [ch, rest @ ..] => text.first() == Some(ch) && inner(rest, &text[1..]),
        }
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    inner(&pattern, &text)
}
