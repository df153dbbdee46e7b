//! Data model shared by every pipeline stage
//!
//! - [`FlowRecord`]: one observed outbound connection
//! - [`AddressList`]: one DNA-prefixed address list, existing or synthesized
//! - [`Discovery`]: what a grouping key gathered during a run
//! - [`OwnershipDecision`]: the winner of a contested address
//! - [`DeltaEntry`]: a create or update payload for the import collaborator

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// Marker preceding the run date in generated descriptions
const LAST_SEEN_MARKER: &str = "Last seen at";

/// Separator used by the `include` and `fqdns` payload columns
pub const MEMBER_SEPARATOR: &str = ";";

/// One observed outbound connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    /// Source of the connection (workload hostname or address)
    pub source: String,
    /// Destination address
    pub destination_address: IpAddr,
    /// Destination hostname as reported by the traffic collaborator
    pub destination_hostname: String,
    /// When the connection was observed
    pub timestamp: DateTime<Utc>,
}

impl FlowRecord {
    /// Create a new flow record
    pub fn new(
        source: impl Into<String>,
        destination_address: IpAddr,
        destination_hostname: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source: source.into(),
            destination_address,
            destination_hostname: destination_hostname.into(),
            timestamp,
        }
    }
}

/// A DNA-prefixed address list
///
/// Existing lists are read once at run start; new lists are synthesized by
/// the engine. `hostnames` only ever grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressList {
    /// Stable reference in the external store (`None` until created)
    pub identifier: Option<String>,
    /// Canonical name (e.g. `DNA_kafka.dev-IPL`)
    pub name: String,
    /// Free-form description, carries the `Last seen at` date
    pub description: String,
    /// Member addresses
    pub addresses: BTreeSet<IpAddr>,
    /// Member hostnames
    pub hostnames: BTreeSet<String>,
    /// Whether the list was synthesized during this run
    pub is_new: bool,
}

impl AddressList {
    /// An address list read back from the external store
    pub fn existing(
        identifier: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            identifier: Some(identifier.into()),
            name: name.into(),
            description: description.into(),
            addresses: BTreeSet::new(),
            hostnames: BTreeSet::new(),
            is_new: false,
        }
    }

    /// An address list synthesized during this run
    pub fn synthesized(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            identifier: None,
            name: name.into(),
            description: description.into(),
            addresses: BTreeSet::new(),
            hostnames: BTreeSet::new(),
            is_new: true,
        }
    }

    /// Add member addresses
    pub fn with_addresses(mut self, addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        self.addresses.extend(addresses);
        self
    }

    /// Add member hostnames (lower-cased)
    pub fn with_hostnames<S: AsRef<str>>(mut self, hostnames: impl IntoIterator<Item = S>) -> Self {
        self.hostnames
            .extend(hostnames.into_iter().map(|h| h.as_ref().trim().to_lowercase()));
        self
    }

    /// The `include` payload column
    pub fn include_field(&self) -> String {
        join_members(self.addresses.iter().map(|a| a.to_string()))
    }

    /// The `fqdns` payload column
    pub fn hostnames_field(&self) -> String {
        join_members(self.hostnames.iter().cloned())
    }

    /// Date parsed from a `Last seen at : YYYY-MM-DD` description
    pub fn last_seen(&self) -> Option<NaiveDate> {
        parse_last_seen(&self.description)
    }
}

/// Description written on every created or updated list
pub fn last_seen_description(date: NaiveDate) -> String {
    format!("{} : {}", LAST_SEEN_MARKER, date.format("%Y-%m-%d"))
}

/// Extract the date from a `Last seen at : YYYY-MM-DD` description
pub fn parse_last_seen(description: &str) -> Option<NaiveDate> {
    let start = description.find(LAST_SEEN_MARKER)? + LAST_SEEN_MARKER.len();
    let rest = description[start..].trim_start();
    let rest = rest.strip_prefix(':')?.trim_start();
    let date = rest.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn join_members(members: impl Iterator<Item = String>) -> String {
    members.collect::<Vec<_>>().join(MEMBER_SEPARATOR)
}

/// Addresses and hostnames gathered for one grouping key during a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discovery {
    /// Observed and resolved addresses
    pub addresses: BTreeSet<IpAddr>,
    /// Observed hostnames and their zone siblings
    pub hostnames: BTreeSet<String>,
}

impl Discovery {
    /// Merge another discovery into this one
    pub fn merge(&mut self, other: Discovery) {
        self.addresses.extend(other.addresses);
        self.hostnames.extend(other.hostnames);
    }
}

/// The single owner chosen for a contested address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipDecision {
    /// The contested address
    pub address: IpAddr,
    /// Canonical name of the winning list
    pub winner: String,
    /// Canonical names of the losing lists, sorted
    pub losers: Vec<String>,
}

/// Kind of a delta entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
    /// A new list to import
    Create,
    /// An existing list to update
    Update,
}

/// A create or update payload with its change sets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEntry {
    /// Create or update
    pub kind: DeltaKind,
    /// Final state of the list
    pub target: AddressList,
    /// Addresses not stored before this run
    pub added_addresses: BTreeSet<IpAddr>,
    /// Stored addresses dropped by this run
    pub removed_addresses: BTreeSet<IpAddr>,
    /// Hostnames not stored before this run
    pub added_hostnames: BTreeSet<String>,
}

impl DeltaEntry {
    /// True when the entry carries no change
    pub fn is_empty(&self) -> bool {
        self.added_addresses.is_empty()
            && self.removed_addresses.is_empty()
            && self.added_hostnames.is_empty()
    }
}

/// A closed time range used to query traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start
    pub start: DateTime<Utc>,
    /// Window end
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The window of `days` days ending at `end`
    pub fn days_back(end: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: end - Duration::days(i64::from(days)),
            end,
        }
    }
}
