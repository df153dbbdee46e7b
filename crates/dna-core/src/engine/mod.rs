//! Core reconciliation engine
//!
//! The ReconcileEngine is responsible for:
//! - Reading existing address lists and observed outbound traffic
//! - Grouping, expanding and resolving destination hostnames
//! - Arbitrating address ownership between lists
//! - Corroborating removals against a wider traffic window
//! - Importing the resulting creates and updates
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ TrafficSource │   │ NameResolver │   │ AddressListStore │
//! └───────────────┘   └──────────────┘   └──────────────────┘
//!         │                  │                 ▲      │
//!         ▼                  ▼                 │      ▼
//!  FlowFilter ─► GroupingKeyResolver ─► ZoneExpander ─► OwnershipArbiter
//!                                                            │
//!                    DeltaBuilder ◄─ DeletionCandidateResolver ◄─┘
//!                         │
//!                         ▼
//!                    RunReport + EngineEvents
//! ```
//!
//! ## Run Flow
//!
//! 1. Load existing managed lists (one read)
//! 2. Fetch and filter outbound traffic for the primary window
//! 3. Resolve every observed hostname, its zone siblings and stored hostnames
//! 4. Arbitrate ownership of every claimed address
//! 5. Propose creates, updates and removals
//! 6. Corroborate removals with the lookback window
//! 7. Import creates, then updates (one write each, skipped in dry-run)

use crate::arbiter::{Arbitration, OwnershipArbiter};
use crate::config::{ReconcileConfig, WindowConfig};
use crate::deletion::{DeletionCandidateResolver, SecondarySample};
use crate::delta::DeltaBuilder;
use crate::error::{Error, Result};
use crate::filter::FlowFilter;
use crate::grouping::{GroupingKey, GroupingKeyResolver};
use crate::model::{AddressList, DeltaEntry, DeltaKind, Discovery, TimeWindow};
use crate::report::{self, ListChange, RunReport, StepOutcome};
use crate::traits::{AddressListStore, NameResolver, TrafficSource};
use crate::zone::ZoneExpander;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Step names, as they appear in the run report
pub mod steps {
    /// Existing lists read from the store
    pub const LOAD_LISTS: &str = "load_address_lists";
    /// Primary outbound traffic query
    pub const EXPORT_TRAFFIC: &str = "export_traffic";
    /// Zone expansion and resolution
    pub const RESOLVE: &str = "resolve_hostnames";
    /// Ownership arbitration
    pub const ARBITRATE: &str = "arbitrate_ownership";
    /// Secondary traffic query
    pub const CORROBORATE: &str = "corroborate_removals";
    /// Creates imported
    pub const IMPORT_NEW: &str = "import_new_lists";
    /// Updates imported
    pub const IMPORT_UPDATES: &str = "import_updated_lists";
}

/// Events emitted by the ReconcileEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Run started
    Started {
        dry_run: bool,
    },

    /// Existing managed lists loaded
    ListsLoaded {
        count: usize,
    },

    /// Primary traffic fetched and filtered
    TrafficFetched {
        received: usize,
        kept: usize,
    },

    /// Resolution batch completed
    ResolutionCompleted {
        resolved: usize,
        failed: usize,
    },

    /// An address was claimed by several lists
    OwnershipDecided {
        address: IpAddr,
        winner: String,
        losers: Vec<String>,
    },

    /// The secondary query could not run; removals were retained
    CorroborationFailed {
        error: String,
    },

    /// The temporary list could not be deleted
    CleanupFailed {
        list: String,
        error: String,
    },

    /// New lists imported
    ListsCreated {
        count: usize,
    },

    /// Existing lists updated
    ListsUpdated {
        count: usize,
    },

    /// Run finished
    Finished {
        created: usize,
        updated: usize,
        error: Option<String>,
    },
}

/// Core reconciliation engine
///
/// One call to [`ReconcileEngine::run()`] is one reconciliation run. The
/// engine holds no state between runs: everything it needs is read from the
/// store at the start of the run.
///
/// ## Lifecycle
///
/// 1. Create with [`ReconcileEngine::new()`]
/// 2. Run with [`ReconcileEngine::run()`] (or [`ReconcileEngine::run_at()`] for a fixed clock)
/// 3. Read the returned [`RunReport`] and drain the event receiver
///
/// ## Writes
///
/// At most three writes per run: the temporary corroboration list (created
/// then deleted), one import of new lists and one import of updated lists.
/// In dry-run mode none of them happen.
pub struct ReconcileEngine {
    /// Hostname → addresses
    resolver: Arc<dyn NameResolver>,

    /// Observed outbound traffic
    traffic: Box<dyn TrafficSource>,

    /// External address list store
    store: Box<dyn AddressListStore>,

    filter: FlowFilter,
    grouping: GroupingKeyResolver,
    expander: ZoneExpander,
    arbiter: OwnershipArbiter,
    deletion: DeletionCandidateResolver,
    windows: WindowConfig,
    dry_run: bool,
    metadata: HashMap<String, String>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl ReconcileEngine {
    /// Create a new reconciliation engine
    ///
    /// # Parameters
    ///
    /// - `resolver`: Name resolver shared with the resolution workers
    /// - `traffic`: Traffic source implementation
    /// - `store`: Address list store implementation
    /// - `config`: Reconciler configuration
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        resolver: Arc<dyn NameResolver>,
        traffic: Box<dyn TrafficSource>,
        store: Box<dyn AddressListStore>,
        config: ReconcileConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let engine = Self {
            resolver,
            traffic,
            store,
            filter: FlowFilter::new(&config.filter),
            grouping: GroupingKeyResolver::new(config.grouping_rules, config.naming),
            expander: ZoneExpander::new(&config.zones),
            arbiter: OwnershipArbiter::new(config.environments),
            deletion: DeletionCandidateResolver::new(
                config.windows.lookback_days,
                config.windows.stale_days,
            ),
            windows: config.windows,
            dry_run: config.engine.dry_run,
            metadata: config.engine.metadata,
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Run one reconciliation now
    pub async fn run(&self) -> RunReport {
        self.run_at(Utc::now()).await
    }

    /// Run one reconciliation as if started at `now`
    ///
    /// Never fails: a fatal error is recorded on the report, together with
    /// every step completed before it.
    pub async fn run_at(&self, now: DateTime<Utc>) -> RunReport {
        let mut report = RunReport::new(now, self.dry_run);
        report.metadata = self.metadata.clone();

        info!(
            "Starting reconciliation (store: {}, traffic: {}, resolver: {}, dry-run: {})",
            self.store.store_name(),
            self.traffic.source_name(),
            self.resolver.resolver_name(),
            self.dry_run
        );
        self.emit_event(EngineEvent::Started { dry_run: self.dry_run });

        if let Err(e) = self.reconcile(now, &mut report).await {
            error!("Reconciliation failed: {}", e);
            report.fatal_error = Some(e.to_string());
        }
        report.finished_at = Some(Utc::now());

        info!(
            "Reconciliation finished: {} created, {} updated, {} deletion candidate(s)",
            report.created.len(),
            report.updated.len(),
            report.deletion_candidates.len()
        );
        self.emit_event(EngineEvent::Finished {
            created: report.created.len(),
            updated: report.updated.len(),
            error: report.fatal_error.clone(),
        });

        report
    }

    async fn reconcile(&self, now: DateTime<Utc>, report: &mut RunReport) -> Result<()> {
        let today = now.date_naive();

        // 1. Existing lists
        let started = Utc::now();
        let loaded = self.load_existing().await;
        let existing = record(report, steps::LOAD_LISTS, started, loaded, |lists| {
            format!("{} managed list(s)", lists.len())
        })?;
        self.emit_event(EngineEvent::ListsLoaded { count: existing.len() });
        report.duplicate_addresses = report::duplicate_addresses(existing.values());

        // 2. Primary traffic
        let started = Utc::now();
        let window = TimeWindow::days_back(now, self.windows.traffic_window_days);
        let fetched = self.traffic.outbound_flows(&window).await;
        let raw = record(report, steps::EXPORT_TRAFFIC, started, fetched, |flows| {
            format!("{} record(s)", flows.len())
        })?;
        let received = raw.len();
        let flows = self.filter.apply(raw);
        info!("Kept {} of {} flow record(s)", flows.len(), received);
        self.emit_event(EngineEvent::TrafficFetched { received, kept: flows.len() });

        // 3. Resolution
        let started = Utc::now();
        let (discovered, refreshed) = self.discover(&flows, &existing, report).await;
        report.record_step(
            steps::RESOLVE,
            started,
            StepOutcome::Succeeded,
            format!(
                "{} key(s), {} failure(s)",
                discovered.len(),
                report.resolution_failures.len()
            ),
        );

        let observed: BTreeSet<&str> = discovered.keys().map(String::as_str).collect();
        report.stale_lists =
            report::stale_lists(existing.values(), &observed, today, self.windows.stale_days);

        // 4. Arbitration
        let started = Utc::now();
        let arbitrated = self.arbiter.arbitrate(&discovered, &existing);
        let arbitration = record(report, steps::ARBITRATE, started, arbitrated, |a| {
            format!("{} address(es), {} contested", a.owners.len(), a.decisions.len())
        })?;
        report.record_reassignments(&arbitration);
        for decision in &arbitration.decisions {
            self.emit_event(EngineEvent::OwnershipDecided {
                address: decision.address,
                winner: decision.winner.clone(),
                losers: decision.losers.clone(),
            });
        }

        // 5. Proposal
        let builder = DeltaBuilder::new(today);
        let proposal = builder.propose(&discovered, &refreshed, &existing, &arbitration);

        // 6. Corroboration
        let candidates: BTreeSet<IpAddr> = proposal.removal_candidates().into_keys().collect();
        let sample = self.corroborate(&candidates, now, report).await;
        report.deletion_candidates = self.deletion.classify(&proposal, &sample, now);

        let entries = builder.finalize(proposal, &sample);
        verify_exclusive_ownership(&entries, &existing, &arbitration)?;

        let (creates, updates): (Vec<DeltaEntry>, Vec<DeltaEntry>) = entries
            .into_iter()
            .partition(|entry| entry.kind == DeltaKind::Create);
        debug!("Delta: {} create(s), {} update(s)", creates.len(), updates.len());

        // 7. Imports
        if let Err(e) = self.import(steps::IMPORT_NEW, &creates, report).await {
            report.updated = updates.iter().map(ListChange::from).collect();
            report.record_step(
                steps::IMPORT_UPDATES,
                Utc::now(),
                StepOutcome::Skipped,
                format!("new list import failed, {} list(s) not written", updates.len()),
            );
            return Err(e);
        }
        self.import(steps::IMPORT_UPDATES, &updates, report).await?;

        Ok(())
    }

    async fn load_existing(&self) -> Result<BTreeMap<String, AddressList>> {
        let mut existing = BTreeMap::new();
        for list in self.store.load_lists().await? {
            if !self.grouping.is_managed(&list.name) {
                continue;
            }
            if existing.contains_key(&list.name) {
                warn!("Duplicate list name {} in store, keeping the first one", list.name);
                continue;
            }
            existing.insert(list.name.clone(), list);
        }
        Ok(existing)
    }

    /// Per list name: what this run discovered, and what the stored
    /// hostnames resolve to now
    async fn discover(
        &self,
        flows: &[crate::model::FlowRecord],
        existing: &BTreeMap<String, AddressList>,
        report: &mut RunReport,
    ) -> (BTreeMap<String, Discovery>, BTreeMap<String, BTreeSet<IpAddr>>) {
        let mut targets: BTreeSet<(GroupingKey, String)> = BTreeSet::new();
        let mut flow_addresses: BTreeMap<GroupingKey, BTreeSet<IpAddr>> = BTreeMap::new();
        for flow in flows {
            let hostname = flow.destination_hostname.trim().to_lowercase();
            let key = self.grouping.key_for(&hostname);
            flow_addresses
                .entry(key.clone())
                .or_default()
                .insert(flow.destination_address);
            targets.insert((key, hostname));
        }

        let mut hostnames: Vec<String> = targets
            .iter()
            .flat_map(|(_, hostname)| self.expander.variants(hostname))
            .collect();
        hostnames.extend(existing.values().flat_map(|list| list.hostnames.iter().cloned()));

        let batch = self
            .expander
            .resolve_all(Arc::clone(&self.resolver), hostnames)
            .await;
        self.emit_event(EngineEvent::ResolutionCompleted {
            resolved: batch.addresses.len(),
            failed: batch.failures.len(),
        });
        report.resolution_failures = batch
            .failures
            .iter()
            .map(|failure| format!("{}: {}", failure.hostname, failure.reason))
            .collect();

        let mut discovered: BTreeMap<String, Discovery> = BTreeMap::new();
        for (key, hostname) in &targets {
            discovered
                .entry(self.grouping.list_name(key))
                .or_default()
                .merge(self.expander.discovery_for(hostname, &batch));
        }
        for (key, addresses) in flow_addresses {
            discovered
                .entry(self.grouping.list_name(&key))
                .or_default()
                .addresses
                .extend(addresses);
        }

        let refreshed = existing
            .iter()
            .map(|(name, list)| {
                let addresses = list
                    .hostnames
                    .iter()
                    .flat_map(|hostname| batch.addresses_of(hostname))
                    .collect();
                (name.clone(), addresses)
            })
            .collect();

        (discovered, refreshed)
    }

    async fn corroborate(
        &self,
        candidates: &BTreeSet<IpAddr>,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> SecondarySample {
        let started = Utc::now();
        if candidates.is_empty() {
            report.record_step(steps::CORROBORATE, started, StepOutcome::Skipped, "no removal candidate");
            return SecondarySample::empty();
        }
        if self.dry_run {
            report.record_step(
                steps::CORROBORATE,
                started,
                StepOutcome::Skipped,
                format!("dry-run, {} candidate(s) retained", candidates.len()),
            );
            return SecondarySample::unavailable();
        }

        match self
            .deletion
            .sample(candidates, self.store.as_ref(), self.traffic.as_ref(), now)
            .await
        {
            Ok(sample) => {
                if let Some(e) = sample.cleanup_error() {
                    self.emit_event(EngineEvent::CleanupFailed {
                        list: DeletionCandidateResolver::temporary_list_name(now),
                        error: e.to_string(),
                    });
                }
                report.record_step(
                    steps::CORROBORATE,
                    started,
                    StepOutcome::Succeeded,
                    format!("{} candidate(s)", candidates.len()),
                );
                sample
            }
            Err(e) => {
                warn!("Secondary traffic query failed, retaining every candidate: {}", e);
                self.emit_event(EngineEvent::CorroborationFailed { error: e.to_string() });
                report.record_step(
                    steps::CORROBORATE,
                    started,
                    StepOutcome::Failed(e.to_string()),
                    format!("{} candidate(s) retained", candidates.len()),
                );
                SecondarySample::unavailable()
            }
        }
    }

    async fn import(&self, step: &str, entries: &[DeltaEntry], report: &mut RunReport) -> Result<()> {
        let started = Utc::now();
        let changes: Vec<ListChange> = entries.iter().map(ListChange::from).collect();
        let is_create = step == steps::IMPORT_NEW;

        // Reported even when the write below fails
        if is_create {
            report.created = changes;
        } else {
            report.updated = changes;
        }

        if entries.is_empty() || self.dry_run {
            let detail = if entries.is_empty() {
                "nothing to import".to_string()
            } else {
                format!("dry-run, {} list(s) not written", entries.len())
            };
            report.record_step(step, started, StepOutcome::Skipped, detail);
        } else {
            let lists: Vec<AddressList> = entries.iter().map(|entry| entry.target.clone()).collect();
            info!("{}: importing {} list(s) into {}", step, lists.len(), self.store.store_name());
            let written = if is_create {
                self.store.create_lists(&lists).await
            } else {
                self.store.update_lists(&lists).await
            };
            record(report, step, started, written, |_| format!("{} list(s)", lists.len()))?;
            self.emit_event(if is_create {
                EngineEvent::ListsCreated { count: lists.len() }
            } else {
                EngineEvent::ListsUpdated { count: lists.len() }
            });
        }
        Ok(())
    }

    /// Emit an event (non-blocking)
    ///
    /// If the channel is full, the event is dropped and a warning is logged.
    fn emit_event(&self, event: EngineEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Record a step from its result and hand the value back
fn record<T>(
    report: &mut RunReport,
    step: &str,
    started: DateTime<Utc>,
    result: Result<T>,
    detail: impl FnOnce(&T) -> String,
) -> Result<T> {
    match &result {
        Ok(value) => report.record_step(step, started, StepOutcome::Succeeded, detail(value)),
        Err(e) => report.record_step(step, started, StepOutcome::Failed(e.to_string()), ""),
    }
    result
}

/// Check that no address ends the run in two lists
fn verify_exclusive_ownership(
    entries: &[DeltaEntry],
    existing: &BTreeMap<String, AddressList>,
    arbitration: &Arbitration,
) -> Result<()> {
    let mut members: BTreeMap<&str, &BTreeSet<IpAddr>> = existing
        .iter()
        .map(|(name, list)| (name.as_str(), &list.addresses))
        .collect();
    for entry in entries {
        members.insert(entry.target.name.as_str(), &entry.target.addresses);
    }

    let mut owners: HashMap<IpAddr, &str> = HashMap::new();
    for (name, addresses) in members {
        for address in addresses {
            if let Some(other) = owners.insert(*address, name) {
                return Err(Error::arbitration(format!(
                    "{} would end up in both {} and {} (owner: {})",
                    address,
                    other,
                    name,
                    arbitration.owner_of(address).unwrap_or("none")
                )));
            }
        }
    }
    Ok(())
}
