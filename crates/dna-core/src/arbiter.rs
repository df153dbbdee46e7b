//! Ownership arbitration
//!
//! Every address ends a run in at most one address list. When several lists
//! claim an address (discovered this run, or already storing it), an ordered
//! tie-break policy picks the owner:
//!
//! 1. **historical-owner**: a list already storing the address wins
//! 2. **environment-priority**: production > pre-production > UAT > development > unclassified
//! 3. **hostname-cardinality**: more hostnames discovered this run wins
//! 4. **alphabetical**: lowest canonical name wins
//!
//! Each rule compares two candidates and answers `Left`, `Right` or `Tied`;
//! the arbiter folds through the policy and stops at the first decision.

use crate::config::EnvironmentClass;
use crate::error::{Error, Result};
use crate::model::{AddressList, Discovery, OwnershipDecision};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use tracing::debug;

/// One list competing for an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<'a> {
    /// Canonical list name
    pub name: &'a str,
    /// The list already stores the address
    pub historical: bool,
    /// Index of the environment class; lower is higher priority
    pub environment_rank: usize,
    /// Hostnames discovered for the list this run
    pub hostname_count: usize,
}

/// Outcome of a single tie-break rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The left candidate wins
    Left,
    /// The right candidate wins
    Right,
    /// The rule cannot separate them
    Tied,
}

/// A tie-break comparator
pub type TieBreakFn = fn(&Candidate<'_>, &Candidate<'_>) -> Decision;

/// A named tie-break rule
#[derive(Debug, Clone, Copy)]
pub struct TieBreakRule {
    /// Rule name, used in logs
    pub name: &'static str,
    /// The comparator
    pub decide: TieBreakFn,
}

/// The default policy, highest priority first
pub fn default_policy() -> Vec<TieBreakRule> {
    vec![
        TieBreakRule { name: "historical-owner", decide: historical_owner },
        TieBreakRule { name: "environment-priority", decide: environment_priority },
        TieBreakRule { name: "hostname-cardinality", decide: hostname_cardinality },
        TieBreakRule { name: "alphabetical", decide: alphabetical },
    ]
}

fn prefer(left: bool, right: bool) -> Decision {
    match (left, right) {
        (true, false) => Decision::Left,
        (false, true) => Decision::Right,
        _ => Decision::Tied,
    }
}

/// A list already storing the address wins
pub fn historical_owner(left: &Candidate<'_>, right: &Candidate<'_>) -> Decision {
    prefer(left.historical, right.historical)
}

/// The higher-priority environment wins
pub fn environment_priority(left: &Candidate<'_>, right: &Candidate<'_>) -> Decision {
    prefer(
        left.environment_rank < right.environment_rank,
        right.environment_rank < left.environment_rank,
    )
}

/// More hostnames discovered this run wins
pub fn hostname_cardinality(left: &Candidate<'_>, right: &Candidate<'_>) -> Decision {
    prefer(
        left.hostname_count > right.hostname_count,
        right.hostname_count > left.hostname_count,
    )
}

/// Lowest canonical name wins
pub fn alphabetical(left: &Candidate<'_>, right: &Candidate<'_>) -> Decision {
    prefer(left.name < right.name, right.name < left.name)
}

/// Result of arbitrating a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arbitration {
    /// Owner of every claimed address
    pub owners: BTreeMap<IpAddr, String>,
    /// One decision per contested address
    pub decisions: Vec<OwnershipDecision>,
}

impl Arbitration {
    /// The list owning an address
    pub fn owner_of(&self, address: &IpAddr) -> Option<&str> {
        self.owners.get(address).map(String::as_str)
    }

    /// Whether a list owns an address
    pub fn owns(&self, list_name: &str, address: &IpAddr) -> bool {
        self.owner_of(address) == Some(list_name)
    }
}

/// Picks exactly one owner per contested address
#[derive(Debug, Clone)]
pub struct OwnershipArbiter {
    environments: Vec<EnvironmentClass>,
    policy: Vec<TieBreakRule>,
}

impl OwnershipArbiter {
    /// Create an arbiter with the default policy
    pub fn new(environments: Vec<EnvironmentClass>) -> Self {
        Self::with_policy(environments, default_policy())
    }

    /// Create an arbiter with a custom policy
    pub fn with_policy(environments: Vec<EnvironmentClass>, policy: Vec<TieBreakRule>) -> Self {
        Self { environments, policy }
    }

    /// Environment class index derived from a list's name and description
    ///
    /// Unclassified lists rank after every configured class.
    pub fn environment_rank(&self, name: &str, description: &str) -> usize {
        let haystack = normalize(&format!("{} {}", name, description));
        self.environments
            .iter()
            .position(|class| {
                class
                    .tokens
                    .iter()
                    .map(|token| normalize(token))
                    .filter(|token| token != "--")
                    .any(|token| haystack.contains(&token))
            })
            .unwrap_or(self.environments.len())
    }

    /// Environment class name of a list, if classified
    pub fn environment_of(&self, name: &str, description: &str) -> Option<&str> {
        self.environments
            .get(self.environment_rank(name, description))
            .map(|class| class.name.as_str())
    }

    /// Index of the winning candidate
    ///
    /// Fails when the policy leaves two candidates tied, which means the
    /// policy has no total final rule.
    pub fn pick(&self, address: &IpAddr, candidates: &[Candidate<'_>]) -> Result<usize> {
        if candidates.is_empty() {
            return Err(Error::arbitration(format!("No candidate for {}", address)));
        }

        let mut best = 0;
        for challenger in 1..candidates.len() {
            match self.compare(&candidates[best], &candidates[challenger]) {
                Some(Decision::Right) => best = challenger,
                Some(_) => {}
                None => {
                    return Err(Error::arbitration(format!(
                        "No rule separates {} and {} for {}",
                        candidates[best].name, candidates[challenger].name, address
                    )));
                }
            }
        }
        Ok(best)
    }

    fn compare(&self, left: &Candidate<'_>, right: &Candidate<'_>) -> Option<Decision> {
        self.policy.iter().find_map(|rule| match (rule.decide)(left, right) {
            Decision::Tied => None,
            decided => {
                debug!("{} decided {} vs {}: {:?}", rule.name, left.name, right.name, decided);
                Some(decided)
            }
        })
    }

    /// Assign every claimed address to exactly one list
    ///
    /// # Parameters
    ///
    /// - `discovered`: list name → what was discovered for it this run
    /// - `existing`: list name → existing managed list
    pub fn arbitrate(
        &self,
        discovered: &BTreeMap<String, Discovery>,
        existing: &BTreeMap<String, AddressList>,
    ) -> Result<Arbitration> {
        let mut claims: BTreeMap<IpAddr, BTreeSet<&str>> = BTreeMap::new();
        for (name, discovery) in discovered {
            for address in &discovery.addresses {
                claims.entry(*address).or_default().insert(name.as_str());
            }
        }
        for (name, list) in existing {
            for address in &list.addresses {
                claims.entry(*address).or_default().insert(name.as_str());
            }
        }

        let mut arbitration = Arbitration::default();
        for (address, claimants) in claims {
            let candidates: Vec<Candidate<'_>> = claimants
                .iter()
                .map(|&name| {
                    let stored = existing.get(name);
                    Candidate {
                        name,
                        historical: stored.is_some_and(|list| list.addresses.contains(&address)),
                        environment_rank: self.environment_rank(
                            name,
                            stored.map(|list| list.description.as_str()).unwrap_or_default(),
                        ),
                        hostname_count: discovered.get(name).map_or(0, |d| d.hostnames.len()),
                    }
                })
                .collect();

            let winner = candidates[self.pick(&address, &candidates)?].name.to_string();
            if candidates.len() > 1 {
                let losers: Vec<String> = candidates
                    .iter()
                    .filter(|c| c.name != winner)
                    .map(|c| c.name.to_string())
                    .collect();
                debug!("Address {} owned by {} over {:?}", address, winner, losers);
                arbitration.decisions.push(OwnershipDecision {
                    address,
                    winner: winner.clone(),
                    losers,
                });
            }
            arbitration.owners.insert(address, winner);
        }

        Ok(arbitration)
    }
}

/// Lower-case, non-alphanumeric runs collapsed to `-`, wrapped in `-`
fn normalize(text: &str) -> String {
    let parts: Vec<String> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!("-{}-", parts.join("-"))
}
