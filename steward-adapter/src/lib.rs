//! External adapter boundary for Steward.
//!
//! An adapter is the only way the sync layer talks to a system of record.
//! This crate defines the capability ([`Adapter`]), how one is obtained for a
//! credential ([`AdapterFactory`], [`AdapterRegistry`]), the per-adapter
//! endpoint tables ([`Manifest`]) and name detection for tables and webhook
//! events. [`InMemoryAdapter`] stands in for a real HTTP client.

pub mod capability;
pub mod detect;
pub mod error;
pub mod manifest;
pub mod memory;
pub mod registry;

pub use capability::{
    Adapter, AdapterFactory, BucketHint, CanonicalRecord, ExternalRecord, FixedFactory,
    ListParams, Page, Reply,
};
pub use detect::{descriptor_for, detect_event, detect_table};
pub use error::{AdapterError, DetectError};
pub use manifest::{EntityEndpoint, Manifest, Method, Route};
pub use memory::{Call, InMemoryAdapter};
pub use registry::AdapterRegistry;
