// # dna-core
//
// Core library for DNA address list reconciliation.
//
// ## Architecture Overview
//
// A run observes outbound traffic, groups destination hostnames into
// address lists named `DNA_<key>-IPL`, and keeps those lists in the external
// store in step with what the hostnames resolve to:
// - **TrafficSource**: Trait for fetching observed outbound flows
// - **NameResolver**: Trait for resolving hostnames to addresses
// - **AddressListStore**: Trait for reading and importing address lists
// - **ReconcileEngine**: Core engine that runs one reconciliation
// - **RunReport**: What a run did, rendered as text or JSON
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Each pipeline stage is a plain value with no I/O
// 2. **Single Owner**: Every address ends a run in at most one list
// 3. **Append-Only Hostnames**: Hostnames are never removed from a list
// 4. **Corroborated Removal**: An address is only dropped when no traffic backs it
// 5. **Library-First**: All core functionality can be used as a library

pub mod traits;
pub mod engine;
pub mod config;
pub mod error;
pub mod model;
pub mod filter;
pub mod grouping;
pub mod zone;
pub mod arbiter;
pub mod delta;
pub mod deletion;
pub mod report;
pub mod resolver;
pub mod store;

// Re-export core types for convenience
pub use traits::{AddressListStore, NameResolver, TrafficSource};
pub use engine::{EngineEvent, ReconcileEngine};
pub use config::{EnvironmentClass, ReconcileConfig};
pub use error::{Error, Result};
pub use model::{AddressList, DeltaEntry, DeltaKind, Discovery, FlowRecord, TimeWindow};
pub use grouping::{GroupingRule, KeySpec, Matcher};
pub use report::RunReport;
pub use resolver::SystemResolver;
pub use store::MemoryAddressListStore;
