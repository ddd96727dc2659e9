//! Field and field-schema proxies.
//!
//! A [`Field`] is transient: it is constructed on each access, carries no
//! cache, and every read is one round trip. [`FieldSchema`] reflects the
//! field's metadata independently of any record id.
//!
//! Naming note: the remote schema calls a field's display name `name`, which
//! is why the display-name accessors read and write the `name` property.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::client::{EntityRef, UpdateMode};
use crate::convert::{FieldValue, convert_checked, to_raw};
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::filter::{Filter, filters_to_raw};
use crate::session::Session;

/// Proxy for one field on one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    entity: Entity,
    name: String,
}

impl Field {
    pub(crate) fn new(entity: Entity, name: impl Into<String>) -> Self {
        Self {
            entity,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    fn session(&self) -> &Session {
        self.entity.session()
    }

    /// Fetch the field value, converting linked records to proxies. A
    /// `url`-typed value collapses to something directly usable: an upload
    /// link yields the attachment descriptor, a web link its URL string, a
    /// local link its filesystem path.
    pub fn get(&self) -> Result<FieldValue> {
        let raw = self.get_raw()?;
        convert_checked(self.session(), &raw)
    }

    /// Fetch the raw field value as the client returned it.
    pub fn get_raw(&self) -> Result<Value> {
        let filters = filters_to_raw(&[Filter::clause("id", "is", self.entity.id())]);
        let fields = [self.name.clone()];
        let mut row = self
            .session()
            .client()
            .find_one(self.entity.entity_type(), &filters, &fields)?
            .ok_or_else(|| Error::RecordNotFound {
                entity_type: self.entity.entity_type().to_string(),
                id: self.entity.id(),
            })?;
        Ok(row.remove(&self.name).unwrap_or(Value::Null))
    }

    /// Set the field to the given value in one update call.
    pub fn set(&self, value: impl Into<FieldValue>) -> Result<()> {
        self.entity.set(&[(&self.name, value.into())], None)
    }

    /// Add values to this multi-entity field.
    pub fn add(&self, values: impl IntoIterator<Item = FieldValue>) -> Result<()> {
        self.update_with_mode(values, UpdateMode::Add)
    }

    /// Remove values from this multi-entity field.
    pub fn remove(&self, values: impl IntoIterator<Item = FieldValue>) -> Result<()> {
        self.update_with_mode(values, UpdateMode::Remove)
    }

    fn update_with_mode(
        &self,
        values: impl IntoIterator<Item = FieldValue>,
        mode: UpdateMode,
    ) -> Result<()> {
        let values = FieldValue::List(values.into_iter().collect());
        let modes: HashMap<String, UpdateMode> = [(self.name.clone(), mode)].into();
        self.entity.set(&[(&self.name, values)], Some(&modes))
    }

    /// Upload a local file into this field. Returns the proxy for the
    /// Attachment record created for it.
    pub fn upload(&self, path: impl AsRef<Path>, display_name: Option<&str>) -> Result<Entity> {
        let path = path.as_ref();
        debug!(
            entity_type = %self.entity.entity_type(),
            id = self.entity.id(),
            field = %self.name,
            path = %path.display(),
            "uploading file"
        );
        let attachment_id = self.session().client().upload(
            self.entity.entity_type(),
            self.entity.id(),
            path,
            &self.name,
            display_name,
        )?;
        Ok(Entity::new(
            self.session().clone(),
            "Attachment",
            attachment_id,
        ))
    }

    /// Download the file behind this field.
    ///
    /// A `url`-typed field delegates to the client's attachment download; an
    /// `image`-typed field resolves the value to a URL and fetches it
    /// directly, carrying the service session cookie and reusing the
    /// client's proxy settings. Any other data type fails before anything is
    /// written.
    ///
    /// When `path` has a file extension it is the exact destination file;
    /// otherwise it is treated as a directory and the file name is taken
    /// from the attachment name (or the resolved URL).
    pub fn download(&self, path: impl AsRef<Path>, create_folders: bool) -> Result<PathBuf> {
        let path = path.as_ref();
        let data_type = self.schema().data_type()?;
        match data_type.as_str() {
            "url" => self.download_attachment(path, create_folders),
            "image" => self.download_image(path, create_folders),
            other => Err(Error::NotDownloadable {
                field: self.name.clone(),
                data_type: other.to_string(),
            }),
        }
    }

    fn download_attachment(&self, path: &Path, create_folders: bool) -> Result<PathBuf> {
        let attachment = self.get_raw()?;
        if attachment.is_null() {
            return Err(self.nothing_uploaded());
        }
        let file_name = attachment
            .pointer("/name")
            .and_then(Value::as_str)
            .unwrap_or("attachment");
        let destination = destination_path(path, file_name);
        prepare_destination(&destination, create_folders)?;
        debug!(field = %self.name, destination = %destination.display(), "downloading attachment");
        self.session()
            .client()
            .download_attachment(&attachment, Some(&destination))?;
        Ok(destination)
    }

    fn download_image(&self, path: &Path, create_folders: bool) -> Result<PathBuf> {
        let value = self.get_raw()?;
        let url = match value.as_str() {
            Some(url) => url,
            None => return Err(self.nothing_uploaded()),
        };
        let destination = destination_path(path, &file_name_from_url(url));
        prepare_destination(&destination, create_folders)?;
        debug!(field = %self.name, url, destination = %destination.display(), "downloading image");

        let mut builder = reqwest::blocking::Client::builder();
        if let Some(proxy) = self.session().client().proxy_url() {
            builder = builder.proxy(reqwest::Proxy::all(&proxy)?);
        }
        let http = builder.build()?;
        let token = self.session().client().session_token()?;
        let bytes = http
            .get(url)
            .header(reqwest::header::COOKIE, format!("_session_id={token}"))
            .send()?
            .error_for_status()?
            .bytes()?;
        fs::write(&destination, &bytes)?;
        Ok(destination)
    }

    fn nothing_uploaded(&self) -> Error {
        Error::NothingUploaded {
            entity_type: self.entity.entity_type().to_string(),
            id: self.entity.id(),
            field: self.name.clone(),
        }
    }

    /// A batch-operation descriptor updating just this field. Pure builder.
    pub fn batch_update_dict(&self, value: impl Into<FieldValue>) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert(self.name.clone(), to_raw(&value.into()));
        let mut request = Map::new();
        request.insert("request_type".into(), "update".into());
        request.insert(
            "entity_type".into(),
            self.entity.entity_type().to_string().into(),
        );
        request.insert("entity_id".into(), self.entity.id().into());
        request.insert("data".into(), Value::Object(data));
        request
    }

    /// The schema proxy for this field. Construct only, no I/O.
    pub fn schema(&self) -> FieldSchema {
        FieldSchema::new(
            self.session().clone(),
            self.entity.entity_type(),
            &self.name,
        )
    }
}

/// Proxy for the schema metadata of one field on one entity type.
///
/// Readers fetch fresh metadata per call; writers issue one schema update,
/// optionally scoped to a project context.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    session: Session,
    entity_type: String,
    field_name: String,
}

impl FieldSchema {
    pub fn new(session: Session, entity_type: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            session,
            entity_type: entity_type.into(),
            field_name: field_name.into(),
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// The full schema object for this field.
    pub fn read(&self) -> Result<Value> {
        let mut schemas = self.session.client().schema_field_read(
            &self.entity_type,
            Some(&self.field_name),
            None,
        )?;
        schemas
            .remove(&self.field_name)
            .ok_or_else(|| Error::MissingSchema {
                entity_type: self.entity_type.clone(),
                missing: self.field_name.clone(),
            })
    }

    fn read_value(&self, property: &str) -> Result<Value> {
        self.read()?
            .pointer(&format!("/{property}/value"))
            .cloned()
            .ok_or_else(|| Error::MissingSchema {
                entity_type: self.entity_type.clone(),
                missing: format!("{}.{property}", self.field_name),
            })
    }

    fn read_string(&self, property: &str) -> Result<String> {
        Ok(self
            .read_value(property)?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    fn update(&self, property: &str, value: Value, project: Option<&EntityRef>) -> Result<bool> {
        let mut properties = Map::new();
        properties.insert(property.to_string(), value);
        self.session.client().schema_field_update(
            &self.entity_type,
            &self.field_name,
            &properties,
            project,
        )
    }

    pub fn data_type(&self) -> Result<String> {
        self.read_string("data_type")
    }

    pub fn set_data_type(&self, value: &str, project: Option<&EntityRef>) -> Result<bool> {
        self.update("data_type", value.into(), project)
    }

    pub fn description(&self) -> Result<String> {
        self.read_string("description")
    }

    pub fn set_description(&self, value: &str, project: Option<&EntityRef>) -> Result<bool> {
        self.update("description", value.into(), project)
    }

    pub fn display_name(&self) -> Result<String> {
        self.read_string("name")
    }

    pub fn set_display_name(&self, value: &str, project: Option<&EntityRef>) -> Result<bool> {
        self.update("name", value.into(), project)
    }

    pub fn custom_metadata(&self) -> Result<String> {
        self.read_string("custom_metadata")
    }

    pub fn set_custom_metadata(&self, value: &str, project: Option<&EntityRef>) -> Result<bool> {
        self.update("custom_metadata", value.into(), project)
    }

    /// The properties object of the field. Its shape depends strongly on
    /// the data type; a status field carries its valid values here, for
    /// example.
    pub fn properties(&self) -> Result<Value> {
        self.read()?
            .get("properties")
            .cloned()
            .ok_or_else(|| Error::MissingSchema {
                entity_type: self.entity_type.clone(),
                missing: format!("{}.properties", self.field_name),
            })
    }

    pub fn set_properties(&self, value: Value, project: Option<&EntityRef>) -> Result<bool> {
        self.update("properties", value, project)
    }

    /// Entity types a link field of this schema may point at.
    pub fn valid_types(&self) -> Result<Vec<String>> {
        let properties = self.properties()?;
        Ok(properties
            .pointer("/valid_types/value")
            .and_then(Value::as_array)
            .map(|types| {
                types
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn destination_path(path: &Path, file_name: &str) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.join(file_name)
    }
}

fn prepare_destination(destination: &Path, create_folders: bool) -> Result<()> {
    if create_folders
        && let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn file_name_from_url(url: &str) -> String {
    let trimmed = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .trim_end_matches('/');
    let name = trimmed.rsplit('/').next().unwrap_or_default();
    if name.is_empty() {
        "attachment".to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn destination_path_respects_extensions() {
        assert_eq!(
            destination_path(Path::new("/tmp/out.mov"), "clip.mov"),
            PathBuf::from("/tmp/out.mov")
        );
        assert_eq!(
            destination_path(Path::new("/tmp/renders"), "clip.mov"),
            PathBuf::from("/tmp/renders/clip.mov")
        );
    }

    #[test]
    fn file_name_from_url_strips_query() {
        assert_eq!(
            file_name_from_url("https://example.com/thumbs/sh0010.jpg?sig=abc"),
            "sh0010.jpg"
        );
        assert_eq!(file_name_from_url("https://example.com/"), "attachment");
    }

    #[test]
    fn batch_update_dict_converts_value() {
        let session = crate::test_support::memory_session();
        let shot = Entity::new(session.clone(), "Shot", 4);
        let user = Entity::new(session, "HumanUser", 9);
        let request = shot.field("sg_supervisor").batch_update_dict(user);
        assert_eq!(
            Value::Object(request),
            json!({
                "request_type": "update",
                "entity_type": "Shot",
                "entity_id": 4,
                "data": {"sg_supervisor": {"type": "HumanUser", "id": 9}},
            })
        );
    }
}
