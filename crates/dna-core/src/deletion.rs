//! Removal corroboration
//!
//! Before an address leaves a list, the engine asks the traffic source
//! whether anything talked to it over the (wider) lookback window. The
//! query needs a list in the store, so a temporary list holding every
//! candidate is created first and always deleted afterwards.

use crate::delta::Proposal;
use crate::error::Result;
use crate::model::{AddressList, TimeWindow};
use crate::traits::{AddressListStore, TrafficSource};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use tracing::{debug, info, warn};

/// Name prefix of the temporary corroboration list
pub const TEMPORARY_LIST_PREFIX: &str = "_tmp_ip.to.delete_";

/// Last-seen timestamps observed by the secondary query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecondarySample {
    last_seen: BTreeMap<IpAddr, DateTime<Utc>>,
    available: bool,
    cleanup_error: Option<String>,
}

impl SecondarySample {
    /// A sample for a run with nothing to corroborate
    pub fn empty() -> Self {
        Self {
            last_seen: BTreeMap::new(),
            available: true,
            cleanup_error: None,
        }
    }

    /// A sample built from observed last-seen timestamps
    pub fn observed(last_seen: BTreeMap<IpAddr, DateTime<Utc>>) -> Self {
        Self {
            last_seen,
            available: true,
            cleanup_error: None,
        }
    }

    /// No sample could be taken; every proposed removal is retained
    pub fn unavailable() -> Self {
        Self {
            last_seen: BTreeMap::new(),
            available: false,
            cleanup_error: None,
        }
    }

    /// Whether the secondary query ran
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Last time an address was seen, if it was
    pub fn last_seen(&self, address: &IpAddr) -> Option<DateTime<Utc>> {
        self.last_seen.get(address).copied()
    }

    /// Whether a proposed removal must be kept
    pub fn retains(&self, address: &IpAddr) -> bool {
        !self.available || self.last_seen.contains_key(address)
    }

    /// Error raised while deleting the temporary list
    pub fn cleanup_error(&self) -> Option<&str> {
        self.cleanup_error.as_deref()
    }
}

/// One proposed removal, as reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionCandidate {
    /// The address
    pub address: IpAddr,
    /// List that stored it
    pub list: String,
    /// Last time the secondary query saw traffic to it
    pub last_seen: Option<DateTime<Utc>>,
    /// Whether the address was actually dropped from the list
    pub removed: bool,
}

/// Queries the secondary sample and classifies removal candidates
#[derive(Debug, Clone)]
pub struct DeletionCandidateResolver {
    lookback_days: u32,
    stale_days: u32,
}

impl DeletionCandidateResolver {
    /// Create a resolver
    pub fn new(lookback_days: u32, stale_days: u32) -> Self {
        Self { lookback_days, stale_days }
    }

    /// Name of the temporary list for a run started at `now`
    pub fn temporary_list_name(now: DateTime<Utc>) -> String {
        format!("{}{}", TEMPORARY_LIST_PREFIX, now.format("%Y%m%d-%H%M%S"))
    }

    /// Query the lookback window for traffic to `candidates`
    ///
    /// A failure to create or query the temporary list is returned as an
    /// error; the caller decides to retain every candidate. A failure to
    /// delete it is only recorded on the sample.
    pub async fn sample(
        &self,
        candidates: &BTreeSet<IpAddr>,
        store: &dyn AddressListStore,
        traffic: &dyn TrafficSource,
        now: DateTime<Utc>,
    ) -> Result<SecondarySample> {
        if candidates.is_empty() {
            return Ok(SecondarySample::empty());
        }

        let mut list = AddressList::synthesized(Self::temporary_list_name(now), "")
            .with_addresses(candidates.iter().copied());
        info!(
            "Creating temporary list {} with {} candidate(s)",
            list.name,
            candidates.len()
        );
        let identifier = store.create_temporary_list(&list).await?;
        list.identifier = Some(identifier.clone());

        let window = TimeWindow::days_back(now, self.lookback_days);
        let queried = traffic.flows_to_list(&list, &window).await;

        let cleanup_error = match store.delete_list(&identifier).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Failed to delete temporary list {} ({}): {}", list.name, identifier, e);
                Some(e.to_string())
            }
        };

        let mut last_seen: BTreeMap<IpAddr, DateTime<Utc>> = BTreeMap::new();
        for flow in queried? {
            if !candidates.contains(&flow.destination_address) {
                continue;
            }
            last_seen
                .entry(flow.destination_address)
                .and_modify(|seen| *seen = (*seen).max(flow.timestamp))
                .or_insert(flow.timestamp);
        }
        debug!("{} of {} candidate(s) seen during lookback", last_seen.len(), candidates.len());

        Ok(SecondarySample {
            last_seen,
            available: true,
            cleanup_error,
        })
    }

    /// Candidates worth reporting
    ///
    /// Removed addresses are always reported. Retained ones are reported
    /// when they were last seen more than the staleness threshold ago, or
    /// when no sample was available to decide.
    pub fn classify(
        &self,
        proposal: &Proposal,
        sample: &SecondarySample,
        now: DateTime<Utc>,
    ) -> Vec<DeletionCandidate> {
        let threshold = now - Duration::days(i64::from(self.stale_days));
        let mut reported = Vec::new();

        for (address, lists) in proposal.removal_candidates() {
            let last_seen = sample.last_seen(&address);
            let removed = !sample.retains(&address);
            let stale = last_seen.is_some_and(|seen| seen < threshold);
            if !(removed || stale || !sample.is_available()) {
                continue;
            }
            for list in lists {
                reported.push(DeletionCandidate {
                    address,
                    list,
                    last_seen,
                    removed,
                });
            }
        }

        reported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::ProposedUpdate;
    use chrono::TimeZone;

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn proposal(unresolved: &[&str]) -> Proposal {
        Proposal {
            creates: Vec::new(),
            updates: vec![ProposedUpdate {
                stored: AddressList::existing("/iplists/1", "DNA_x-IPL", ""),
                observed: false,
                added_addresses: BTreeSet::new(),
                added_hostnames: BTreeSet::new(),
                lost_addresses: BTreeSet::new(),
                unresolved_addresses: unresolved.iter().map(|a| addr(a)).collect(),
            }],
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 5).unwrap()
    }

    #[test]
    fn test_temporary_list_name() {
        assert_eq!(
            DeletionCandidateResolver::temporary_list_name(now()),
            "_tmp_ip.to.delete_20250601-123005"
        );
    }

    #[test]
    fn test_recently_seen_address_not_reported() {
        let resolver = DeletionCandidateResolver::new(60, 21);
        let sample = SecondarySample::observed(BTreeMap::from([(
            addr("10.0.0.2"),
            now() - Duration::days(10),
        )]));

        assert!(resolver.classify(&proposal(&["10.0.0.2"]), &sample, now()).is_empty());
    }

    #[test]
    fn test_stale_and_unseen_addresses_reported() {
        let resolver = DeletionCandidateResolver::new(60, 21);
        let seen = now() - Duration::days(40);
        let sample = SecondarySample::observed(BTreeMap::from([(addr("10.0.0.2"), seen)]));

        let reported = resolver.classify(&proposal(&["10.0.0.2", "10.0.0.3"]), &sample, now());

        assert_eq!(reported.len(), 2);
        assert_eq!(reported[0].address, addr("10.0.0.2"));
        assert_eq!(reported[0].last_seen, Some(seen));
        assert!(!reported[0].removed);
        assert_eq!(reported[1].address, addr("10.0.0.3"));
        assert!(reported[1].removed);
    }

    #[test]
    fn test_unavailable_sample_retains_everything() {
        let resolver = DeletionCandidateResolver::new(60, 21);
        let sample = SecondarySample::unavailable();

        assert!(sample.retains(&addr("10.0.0.3")));
        let reported = resolver.classify(&proposal(&["10.0.0.3"]), &sample, now());
        assert_eq!(reported.len(), 1);
        assert!(!reported[0].removed);
        assert_eq!(reported[0].last_seen, None);
    }
}
