//! Collaborator traits for the DNA reconciler
//!
//! This module defines the abstract interfaces the engine talks to.
//!
//! - [`NameResolver`]: Resolve hostnames to addresses
//! - [`TrafficSource`]: Fetch observed outbound traffic
//! - [`AddressListStore`]: Read and write address lists in the external store

pub mod name_resolver;
pub mod traffic_source;
pub mod address_list_store;

pub use name_resolver::NameResolver;
pub use traffic_source::TrafficSource;
pub use address_list_store::AddressListStore;
