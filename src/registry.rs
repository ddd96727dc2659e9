//! The plugin registry: record type names to proxy constructors.
//!
//! The registry decides which wrapper represents each record a query
//! returns. It is an explicit, injectable object owned by the
//! [`crate::Session`] — independent sessions (for example in tests) carry
//! independent registries and never interfere with each other.
//!
//! Registration is last-write-wins by design: a host application overrides a
//! builtin wrapper by registering its own under the same type name. The
//! fallback factory covers every type nobody registered; with the default
//! registry that is a plain [`Entity`].

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::client::EntityRef;
use crate::entity::Entity;
use crate::session::Session;
use crate::site::Site;

/// The shared capability every registered entity wrapper exposes.
///
/// `entity()` yields the underlying proxy (type, id, session); `as_any()`
/// lets hosts downcast a converted value back to their concrete registered
/// type.
pub trait TypedEntity: Send + Sync + 'static {
    fn entity(&self) -> &Entity;
    fn as_any(&self) -> &dyn Any;
}

/// A converted record: some registered wrapper behind the shared interface.
pub type AnyEntity = Arc<dyn TypedEntity>;

/// The capability of the registered site wrapper.
pub trait TypedSite: Send + Sync + 'static {
    fn site(&self) -> &Site;
    fn as_any(&self) -> &dyn Any;
}

/// The constructed site wrapper.
pub type AnySite = Arc<dyn TypedSite>;

/// Entity wrappers with a declared default record type, registerable without
/// naming the type at the call site.
pub trait RegisteredEntity: TypedEntity + Sized {
    /// The record type this wrapper represents by default.
    const TYPE_NAME: &'static str;

    fn from_id(session: Session, id: i64) -> Self;
}

/// Constructs a wrapper for one record reference.
pub type EntityFactory = Arc<dyn Fn(Session, EntityRef) -> AnyEntity + Send + Sync>;

/// Constructs the site wrapper.
pub type SiteFactory = Arc<dyn Fn(Session) -> AnySite + Send + Sync>;

/// Mapping from record type name to wrapper factory, plus the fallback and
/// site singletons.
#[derive(Default, Clone)]
pub struct Registry {
    plugins: HashMap<String, EntityFactory>,
    fallback: Option<EntityFactory>,
    site: Option<SiteFactory>,
}

impl Registry {
    /// An empty registry: no plugins, no fallback, no site factory.
    /// Conversion against it fails for every record type until something is
    /// registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the builtin typed entities, [`Entity`] as fallback
    /// and [`Site`] as the site wrapper.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_entity::<crate::entities::Project>();
        registry.register_entity::<crate::entities::Shot>();
        registry.register_entity::<crate::entities::Asset>();
        registry.register_entity::<crate::entities::Task>();
        registry.register_entity::<crate::entities::PublishedFile>();
        registry.register_entity::<crate::entities::Version>();
        registry.register_entity::<crate::entities::Playlist>();
        registry.register_entity::<crate::entities::HumanUser>();
        registry.register_fallback(Arc::new(|session, entity| {
            Arc::new(Entity::new(session, entity.entity_type, entity.id))
        }));
        registry.register_site(Arc::new(|session| Arc::new(Site::from_session(session))));
        registry
    }

    /// Register a factory for a record type. Overwrites any previous
    /// registration for the same name.
    pub fn register(&mut self, type_name: impl Into<String>, factory: EntityFactory) {
        self.plugins.insert(type_name.into(), factory);
    }

    /// Register a wrapper under its declared default type.
    pub fn register_entity<T: RegisteredEntity>(&mut self) {
        self.register(
            T::TYPE_NAME,
            Arc::new(|session, entity| Arc::new(T::from_id(session, entity.id)) as AnyEntity),
        );
    }

    /// Register the factory used when no specific mapping exists.
    pub fn register_fallback(&mut self, factory: EntityFactory) {
        self.fallback = Some(factory);
    }

    /// Register the site wrapper factory.
    pub fn register_site(&mut self, factory: SiteFactory) {
        self.site = Some(factory);
    }

    /// The factory for a type name: the specific registration if any, else
    /// the fallback, else `None`.
    pub fn resolve(&self, type_name: &str) -> Option<EntityFactory> {
        self.plugins
            .get(type_name)
            .or(self.fallback.as_ref())
            .cloned()
    }

    /// The registered site factory, if any.
    pub fn resolve_site(&self) -> Option<SiteFactory> {
        self.site.clone()
    }

    /// Whether a specific (non-fallback) factory exists for a type name.
    pub fn is_registered(&self, type_name: &str) -> bool {
        self.plugins.contains_key(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_resolves_nothing() {
        let registry = Registry::new();
        assert!(registry.resolve("Project").is_none());
        assert!(registry.resolve_site().is_none());
    }

    #[test]
    fn defaults_cover_builtin_types_and_fallback() {
        let registry = Registry::with_defaults();
        for name in [
            "Project",
            "Shot",
            "Asset",
            "Task",
            "PublishedFile",
            "Version",
            "Playlist",
            "HumanUser",
        ] {
            assert!(registry.is_registered(name), "missing builtin: {name}");
        }
        // Unknown types fall back rather than failing.
        assert!(registry.resolve("CustomEntity01").is_some());
        assert!(!registry.is_registered("CustomEntity01"));
        assert!(registry.resolve_site().is_some());
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = Registry::with_defaults();
        let custom: EntityFactory = Arc::new(|session, entity| {
            Arc::new(Entity::new(session, "Shot", entity.id + 1000))
        });
        registry.register("Shot", custom);

        let session = crate::test_support::memory_session();
        let factory = registry.resolve("Shot").unwrap();
        let converted = factory(session, EntityRef::new("Shot", 1));
        assert_eq!(converted.entity().id(), 1001);
    }
}
