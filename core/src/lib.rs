//! Synchronous client core for Facility Registry (FRED) REST APIs.
//!
//! # Overview
//! Facilities are records with a fixed core schema plus free-form extended
//! properties. Both live in `PropertyMap`s built on `ChangeTrackingMap`, which
//! records which keys were added, touched, modified or deleted relative to
//! the snapshot the map was created from. A facility is dirty when it is new
//! or when either map reports a change.
//!
//! # Design
//! - `RegistryClient` builds `HttpRequest` values and parses `HttpResponse`
//!   values without touching the network. `Registry` pairs it with a
//!   `Transport` that performs the round trip (`UreqTransport` by default).
//! - Registries disagree on field names (`id`/`uuid`, `url`/`href`).
//!   `Backend` translates at the transport boundary, so the model only ever
//!   sees canonical names.
//! - `FacilityQuery` accumulates filters, one sort key and a field
//!   selection; running it yields facilities lazily.
//!
//! ```no_run
//! use fred_core::{Registry, RegistryConfig};
//!
//! # fn main() -> Result<(), fred_core::FredError> {
//! let config = RegistryConfig::from_env()?;
//! let registry = Registry::from_config(&config);
//! let mut query = registry.facilities();
//! query.filter([("active", true)]).sort_ascending("name")?;
//! for facility in query {
//!     println!("{:?}", facility?.name());
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod facility;
pub mod http;
pub mod property;
pub mod query;
pub mod registry;
pub mod tracking;
pub mod transport;
pub mod types;
pub mod value;

pub use backend::Backend;
pub use client::RegistryClient;
pub use config::RegistryConfig;
pub use error::{FredError, ResponseContext, TransportError};
pub use facility::Facility;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use property::PropertyMap;
pub use query::{Facilities, FacilityQuery, QueryRequest, SortClause, SortOrder};
pub use registry::Registry;
pub use tracking::{ChangeTrackingMap, Tracked};
#[cfg(feature = "ureq")]
pub use transport::UreqTransport;
pub use transport::Transport;
pub use types::{FacilityList, Identifier, Record};
pub use value::PropertyValue;
