//! An object-relational convenience layer over a production-tracking site's
//! RPC client.
//!
//! Instead of assembling filter lists and field dicts for every call, you
//! work with proxy objects: a [`Site`], [`Entity`] wrappers per record and
//! [`Field`] handles per value. Proxies hold only `(session, type, id)` and
//! never cache field data, so everything you read is the current server
//! state.
//!
//! ```rust,no_run
//! use prodgrid::{Filter, Site};
//! # fn connect_client() -> prodgrid::test_support::MemoryClient { unimplemented!() }
//!
//! # fn main() -> prodgrid::Result<()> {
//! let site = Site::new(connect_client());
//!
//! let project = site.project("tpa")?.expect("project exists");
//! for shot in project.shots(Some("sh1111*"))? {
//!     let values = shot.get(&["code", "sg_cut_in", "sg_cut_out"])?;
//!     println!("{values:?}");
//! }
//!
//! let comp_tasks = project.tasks(None, None, None, Some("Comp".into()))?;
//! # let _ = comp_tasks;
//! # Ok(())
//! # }
//! ```
//!
//! Query results are converted through a per-session plugin [`Registry`]:
//! each record type maps to a wrapper class, unknown types fall back to a
//! plain [`Entity`], and a host overrides any mapping by registering its own
//! wrapper under the same type name. The underlying RPC transport stays an
//! injected [`Client`] implementation; this crate never owns network I/O
//! beyond direct image downloads.

pub mod client;
pub mod convert;
pub mod entities;
pub mod entity;
pub mod error;
pub mod field;
pub mod filter;
pub mod registry;
pub mod session;
pub mod site;
pub mod test_support;

pub use client::{Client, Connect, Credentials, EntityRef, FindOptions, UpdateMode, UpdateModes};
pub use convert::{FieldValue, fields_to_proxy, fields_to_raw, new_entity, new_site, to_proxy, to_raw};
pub use entity::{Entity, StepRef};
pub use error::{Error, Result};
pub use field::{Field, FieldSchema};
pub use filter::{Filter, filters_to_raw};
pub use registry::{
    AnyEntity, AnySite, EntityFactory, RegisteredEntity, Registry, SiteFactory, TypedEntity,
    TypedSite,
};
pub use session::Session;
pub use site::{NameOrId, ProjectSelector, Site};
