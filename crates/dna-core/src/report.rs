//! Run report
//!
//! Every run produces a [`RunReport`], including failed ones: sections are
//! filled as stages complete, so a fatal error still leaves the progress
//! made so far. The report renders as plain text for operators and as JSON
//! for tooling.

use crate::arbiter::Arbitration;
use crate::deletion::DeletionCandidate;
use crate::model::{AddressList, DeltaEntry};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::net::IpAddr;

/// Outcome of one pipeline step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum StepOutcome {
    /// The step completed
    Succeeded,
    /// The step was not run
    Skipped,
    /// The step failed
    Failed(String),
}

/// One pipeline step with its timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step name
    pub name: String,
    /// When the step started
    pub started_at: DateTime<Utc>,
    /// When the step ended
    pub finished_at: DateTime<Utc>,
    /// Outcome
    pub outcome: StepOutcome,
    /// Short summary (counts, file names)
    pub detail: String,
}

/// A created or updated list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListChange {
    /// Canonical list name
    pub name: String,
    /// Store identifier (`None` for creates)
    pub identifier: Option<String>,
    /// Final addresses
    pub addresses: BTreeSet<IpAddr>,
    /// Final hostnames
    pub hostnames: BTreeSet<String>,
    /// Addresses added this run
    pub added_addresses: BTreeSet<IpAddr>,
    /// Addresses removed this run
    pub removed_addresses: BTreeSet<IpAddr>,
    /// Hostnames added this run
    pub added_hostnames: BTreeSet<String>,
}

impl From<&DeltaEntry> for ListChange {
    fn from(entry: &DeltaEntry) -> Self {
        Self {
            name: entry.target.name.clone(),
            identifier: entry.target.identifier.clone(),
            addresses: entry.target.addresses.clone(),
            hostnames: entry.target.hostnames.clone(),
            added_addresses: entry.added_addresses.clone(),
            removed_addresses: entry.removed_addresses.clone(),
            added_hostnames: entry.added_hostnames.clone(),
        }
    }
}

/// An existing list that has not been observed for a while
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleList {
    /// Canonical list name
    pub name: String,
    /// Store identifier
    pub identifier: Option<String>,
    /// Date parsed from the description
    pub last_seen: NaiveDate,
    /// Stored hostnames
    pub hostnames: BTreeSet<String>,
}

/// An address taken away from a list by arbitration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reassignment {
    /// The contested address
    pub address: IpAddr,
    /// The list that keeps or receives it
    pub owner: String,
    /// A list that does not get it
    pub removed_from: String,
}

/// Everything a run did or would do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: Option<DateTime<Utc>>,
    /// Whether writes were skipped
    pub dry_run: bool,
    /// Steps in execution order
    pub steps: Vec<StepRecord>,
    /// Lists created (or to create, in dry-run)
    pub created: Vec<ListChange>,
    /// Lists updated (or to update, in dry-run)
    pub updated: Vec<ListChange>,
    /// Proposed removals worth an operator's attention
    pub deletion_candidates: Vec<DeletionCandidate>,
    /// Existing lists not observed recently
    pub stale_lists: Vec<StaleList>,
    /// Addresses stored in more than one existing list
    pub duplicate_addresses: BTreeMap<IpAddr, Vec<String>>,
    /// Arbitration losses
    pub reassignments: Vec<Reassignment>,
    /// Hostnames that failed to resolve
    pub resolution_failures: Vec<String>,
    /// Caller-provided metadata
    pub metadata: HashMap<String, String>,
    /// Error that aborted the run
    pub fatal_error: Option<String>,
}

impl RunReport {
    /// An empty report for a run starting at `started_at`
    pub fn new(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            started_at,
            finished_at: None,
            dry_run,
            steps: Vec::new(),
            created: Vec::new(),
            updated: Vec::new(),
            deletion_candidates: Vec::new(),
            stale_lists: Vec::new(),
            duplicate_addresses: BTreeMap::new(),
            reassignments: Vec::new(),
            resolution_failures: Vec::new(),
            metadata: HashMap::new(),
            fatal_error: None,
        }
    }

    /// Whether the run completed without a fatal error
    pub fn is_success(&self) -> bool {
        self.fatal_error.is_none()
    }

    /// Append a step
    pub fn record_step(
        &mut self,
        name: impl Into<String>,
        started_at: DateTime<Utc>,
        outcome: StepOutcome,
        detail: impl Into<String>,
    ) {
        self.steps.push(StepRecord {
            name: name.into(),
            started_at,
            finished_at: Utc::now(),
            outcome,
            detail: detail.into(),
        });
    }

    /// Record the reassignments implied by an arbitration
    pub fn record_reassignments(&mut self, arbitration: &Arbitration) {
        for decision in &arbitration.decisions {
            for loser in &decision.losers {
                self.reassignments.push(Reassignment {
                    address: decision.address,
                    owner: decision.winner.clone(),
                    removed_from: loser.clone(),
                });
            }
        }
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Render for operators
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "DNA address list reconciliation");
        let _ = writeln!(out, "Started : {}", self.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
        if let Some(finished) = self.finished_at {
            let _ = writeln!(out, "Finished: {}", finished.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        let _ = writeln!(out, "Mode    : {}", if self.dry_run { "dry-run" } else { "apply" });
        let mut metadata: Vec<_> = self.metadata.iter().collect();
        metadata.sort();
        for (key, value) in metadata {
            let _ = writeln!(out, "{}: {}", key, value);
        }

        section(&mut out, "Steps", self.steps.len());
        for step in &self.steps {
            let status = match &step.outcome {
                StepOutcome::Succeeded => "ok".to_string(),
                StepOutcome::Skipped => "skipped".to_string(),
                StepOutcome::Failed(e) => format!("FAILED: {}", e),
            };
            let elapsed = (step.finished_at - step.started_at).num_milliseconds();
            let _ = writeln!(out, "  {:<28} {:>7} ms  {}  {}", step.name, elapsed, status, step.detail);
        }

        section(&mut out, "Created lists", self.created.len());
        for change in &self.created {
            render_change(&mut out, change);
        }

        section(&mut out, "Updated lists", self.updated.len());
        for change in &self.updated {
            render_change(&mut out, change);
        }

        section(&mut out, "Deletion candidates", self.deletion_candidates.len());
        for candidate in &self.deletion_candidates {
            let seen = candidate
                .last_seen
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "never".to_string());
            let action = if candidate.removed { "removed" } else { "kept" };
            let _ = writeln!(
                out,
                "  {} in {} (last seen: {}, {})",
                candidate.address, candidate.list, seen, action
            );
        }

        section(&mut out, "Stale lists", self.stale_lists.len());
        for stale in &self.stale_lists {
            let _ = writeln!(
                out,
                "  {} {} (last seen: {}) {}",
                stale.name,
                stale.identifier.as_deref().unwrap_or("-"),
                stale.last_seen.format("%Y-%m-%d"),
                join(stale.hostnames.iter())
            );
        }

        section(&mut out, "Duplicate addresses", self.duplicate_addresses.len());
        for (address, lists) in &self.duplicate_addresses {
            let _ = writeln!(out, "  {}: {}", address, lists.join(", "));
        }

        section(&mut out, "Reassignments", self.reassignments.len());
        for reassignment in &self.reassignments {
            let _ = writeln!(
                out,
                "  {} -> {} (not in {})",
                reassignment.address, reassignment.owner, reassignment.removed_from
            );
        }

        section(&mut out, "Resolution failures", self.resolution_failures.len());
        for hostname in &self.resolution_failures {
            let _ = writeln!(out, "  {}", hostname);
        }

        if let Some(error) = &self.fatal_error {
            let _ = writeln!(out, "\nFATAL: {}", error);
        }
        out
    }
}

fn section(out: &mut String, title: &str, count: usize) {
    let _ = writeln!(out, "\n{} ({})", title, count);
}

fn render_change(out: &mut String, change: &ListChange) {
    let _ = writeln!(out, "  {}", change.name);
    if !change.added_addresses.is_empty() {
        let _ = writeln!(out, "    + addresses: {}", join(change.added_addresses.iter()));
    }
    if !change.removed_addresses.is_empty() {
        let _ = writeln!(out, "    - addresses: {}", join(change.removed_addresses.iter()));
    }
    if !change.added_hostnames.is_empty() {
        let _ = writeln!(out, "    + hostnames: {}", join(change.added_hostnames.iter()));
    }
}

fn join<T: ToString>(items: impl Iterator<Item = T>) -> String {
    items.map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}

/// Addresses stored by more than one existing list
pub fn duplicate_addresses<'a>(
    lists: impl IntoIterator<Item = &'a AddressList>,
) -> BTreeMap<IpAddr, Vec<String>> {
    let mut holders: BTreeMap<IpAddr, Vec<String>> = BTreeMap::new();
    for list in lists {
        for address in &list.addresses {
            holders.entry(*address).or_default().push(list.name.clone());
        }
    }
    holders.retain(|_, names| names.len() > 1);
    holders
}

/// Existing lists not observed this run whose last-seen date is older than
/// `stale_days`
///
/// Lists without a parseable date are not reported.
pub fn stale_lists<'a>(
    lists: impl IntoIterator<Item = &'a AddressList>,
    observed: &BTreeSet<&str>,
    today: NaiveDate,
    stale_days: u32,
) -> Vec<StaleList> {
    let threshold = today - Duration::days(i64::from(stale_days));
    lists
        .into_iter()
        .filter(|list| !observed.contains(list.name.as_str()))
        .filter_map(|list| {
            let last_seen = list.last_seen()?;
            (last_seen < threshold).then(|| StaleList {
                name: list.name.clone(),
                identifier: list.identifier.clone(),
                last_seen,
                hostnames: list.hostnames.clone(),
            })
        })
        .collect()
}
