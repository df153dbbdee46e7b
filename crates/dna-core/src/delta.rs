//! Delta computation
//!
//! Turns the arbitrated desired state into create and update payloads.
//! Hostnames are append-only. A stored address survives when it is still
//! produced by the list's hostnames this run or when the secondary traffic
//! sample saw it; removal is therefore decided in two steps:
//!
//! 1. [`DeltaBuilder::propose`] flags stored addresses that no hostname
//!    produced anymore
//! 2. [`DeltaBuilder::finalize`] drops only the flagged addresses the
//!    secondary sample did not corroborate

use crate::arbiter::Arbitration;
use crate::deletion::SecondarySample;
use crate::model::{AddressList, DeltaEntry, DeltaKind, Discovery, last_seen_description};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use tracing::{debug, info};

/// An update before removal corroboration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedUpdate {
    /// The list as stored
    pub stored: AddressList,
    /// Whether the list was discovered in this run's traffic
    pub observed: bool,
    /// Arbitration-won addresses not stored yet
    pub added_addresses: BTreeSet<IpAddr>,
    /// Discovered hostnames not stored yet
    pub added_hostnames: BTreeSet<String>,
    /// Stored addresses owned by another list; always removed
    pub lost_addresses: BTreeSet<IpAddr>,
    /// Stored addresses no hostname produced this run; removed unless corroborated
    pub unresolved_addresses: BTreeSet<IpAddr>,
}

/// Creates and pending updates for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proposal {
    /// New lists, final
    pub creates: Vec<DeltaEntry>,
    /// Existing lists, pending corroboration
    pub updates: Vec<ProposedUpdate>,
}

impl Proposal {
    /// Every stored address proposed for removal, with the lists storing it
    pub fn removal_candidates(&self) -> BTreeMap<IpAddr, Vec<String>> {
        let mut candidates: BTreeMap<IpAddr, Vec<String>> = BTreeMap::new();
        for update in &self.updates {
            for address in &update.unresolved_addresses {
                candidates.entry(*address).or_default().push(update.stored.name.clone());
            }
        }
        candidates
    }
}

/// Builds create/update entries
#[derive(Debug, Clone)]
pub struct DeltaBuilder {
    run_date: NaiveDate,
}

impl DeltaBuilder {
    /// Create a builder stamping descriptions with the run date
    pub fn new(run_date: NaiveDate) -> Self {
        Self { run_date }
    }

    /// Compute creates and pending updates
    ///
    /// # Parameters
    ///
    /// - `discovered`: list name → discovery of this run
    /// - `refreshed`: list name → addresses its stored hostnames resolve to now
    /// - `existing`: list name → existing managed list
    /// - `arbitration`: the owner of every claimed address
    pub fn propose(
        &self,
        discovered: &BTreeMap<String, Discovery>,
        refreshed: &BTreeMap<String, BTreeSet<IpAddr>>,
        existing: &BTreeMap<String, AddressList>,
        arbitration: &Arbitration,
    ) -> Proposal {
        let mut proposal = Proposal::default();

        for (name, discovery) in discovered {
            if existing.contains_key(name) {
                continue;
            }

            let owned: BTreeSet<IpAddr> = discovery
                .addresses
                .iter()
                .filter(|address| arbitration.owns(name, address))
                .copied()
                .collect();

            if owned.is_empty() {
                info!("Skipping creation of {}: every address is owned by another list", name);
                continue;
            }

            let target = AddressList::synthesized(name.clone(), last_seen_description(self.run_date))
                .with_addresses(owned.iter().copied())
                .with_hostnames(&discovery.hostnames);

            proposal.creates.push(DeltaEntry {
                kind: DeltaKind::Create,
                added_addresses: owned,
                removed_addresses: BTreeSet::new(),
                added_hostnames: target.hostnames.clone(),
                target,
            });
        }

        let empty = Discovery::default();
        let no_addresses = BTreeSet::new();
        for (name, stored) in existing {
            let discovery = discovered.get(name).unwrap_or(&empty);
            let refreshed = refreshed.get(name).unwrap_or(&no_addresses);

            let added_hostnames: BTreeSet<String> =
                discovery.hostnames.difference(&stored.hostnames).cloned().collect();
            let added_addresses: BTreeSet<IpAddr> = discovery
                .addresses
                .iter()
                .filter(|address| !stored.addresses.contains(address) && arbitration.owns(name, address))
                .copied()
                .collect();

            let mut lost_addresses = BTreeSet::new();
            let mut unresolved_addresses = BTreeSet::new();
            for address in &stored.addresses {
                if !arbitration.owns(name, address) {
                    lost_addresses.insert(*address);
                } else if !discovery.addresses.contains(address) && !refreshed.contains(address) {
                    unresolved_addresses.insert(*address);
                }
            }

            debug!(
                "{}: +{} address(es), +{} hostname(s), {} lost, {} unresolved",
                name,
                added_addresses.len(),
                added_hostnames.len(),
                lost_addresses.len(),
                unresolved_addresses.len()
            );

            proposal.updates.push(ProposedUpdate {
                stored: stored.clone(),
                observed: discovered.contains_key(name),
                added_addresses,
                added_hostnames,
                lost_addresses,
                unresolved_addresses,
            });
        }

        proposal
    }

    /// Final entries once the secondary sample is known
    ///
    /// Updates with nothing to change are dropped.
    pub fn finalize(&self, proposal: Proposal, sample: &SecondarySample) -> Vec<DeltaEntry> {
        let mut entries = proposal.creates;

        for update in proposal.updates {
            let mut removed_addresses = update.lost_addresses;
            removed_addresses.extend(
                update
                    .unresolved_addresses
                    .iter()
                    .filter(|address| !sample.retains(address))
                    .copied(),
            );

            let mut target = update.stored;
            target.addresses.retain(|address| !removed_addresses.contains(address));
            target.addresses.extend(update.added_addresses.iter().copied());
            target.hostnames.extend(update.added_hostnames.iter().cloned());
            if update.observed {
                target.description = last_seen_description(self.run_date);
            }

            let entry = DeltaEntry {
                kind: DeltaKind::Update,
                target,
                added_addresses: update.added_addresses,
                removed_addresses,
                added_hostnames: update.added_hostnames,
            };

            if entry.is_empty() {
                continue;
            }
            entries.push(entry);
        }

        entries
    }
}
