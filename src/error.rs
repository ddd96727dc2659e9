//! Crate-wide error type.
//!
//! Configuration mistakes (an unregistered record type with no fallback, a
//! missing site factory) fail loudly. Lookups that legitimately find nothing
//! return `Ok(None)` and never show up here. Errors raised by the underlying
//! RPC client pass through the [`Error::Client`] variant untranslated; this
//! layer adds no retry policy.

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the proxy layer itself, plus pass-through variants for
/// the injected client and the one HTTP download path this crate owns.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record type was converted without a registered plugin or fallback.
    /// This is an initialization-order bug in the host application.
    #[error("no entity class registered for type `{entity_type}` and no fallback set")]
    UnregisteredType { entity_type: String },

    /// Site construction was attempted with no site factory registered.
    #[error("no site class registered")]
    NoSiteRegistered,

    /// A record row from the client is missing its `type` or `id` key.
    #[error("malformed record from client: expected `type` and `id` keys, got {record}")]
    MalformedRecord { record: serde_json::Value },

    /// A field fetch targeted a record that no longer exists.
    #[error("{entity_type} with id {id} not found")]
    RecordNotFound { entity_type: String, id: i64 },

    /// The entity type has none of the conventional name fields.
    #[error("entity type `{entity_type}` has no `code`, `name` or `title` field")]
    NoNameField { entity_type: String },

    /// A download was requested from a field that holds no uploaded value.
    #[error("cannot download from field `{field}` on {entity_type} {id}: nothing was uploaded")]
    NothingUploaded {
        entity_type: String,
        id: i64,
        field: String,
    },

    /// A download was requested from a field whose data type supports none.
    #[error("field `{field}` has data type `{data_type}`, expected `url` or `image`")]
    NotDownloadable { field: String, data_type: String },

    /// The schema returned by the client lacks the requested type or field.
    #[error("schema for `{entity_type}` is missing `{missing}`")]
    MissingSchema {
        entity_type: String,
        missing: String,
    },

    /// An error raised by the underlying RPC client, passed through unchanged.
    #[error(transparent)]
    Client(Box<dyn std::error::Error + Send + Sync>),

    /// HTTP failure while fetching an image/thumbnail URL.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Filesystem failure while writing a downloaded file.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an arbitrary client error (or message) for pass-through.
    pub fn client(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Client(err.into())
    }
}
