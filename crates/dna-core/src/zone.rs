//! Zone expansion and concurrent resolution
//!
//! A hostname carrying exactly one configured zone token (e.g.
//! `svc.eu-fr-paris.example.com`) stands for a region-redundant service: the
//! same name exists for every other zone. The expander synthesizes those
//! siblings, resolves every variant and merges the results under the
//! grouping key of the original hostname.
//!
//! ## Resolution model
//!
//! ```text
//!   hostnames ──► worker tasks (≤ resolver_concurrency, each timeout-bounded)
//!                        │  (hostname, outcome)
//!                        ▼
//!                  mpsc channel ──► single consumer owns the result map
//! ```
//!
//! A failed or timed-out lookup contributes no addresses and never aborts
//! the batch.

use crate::config::ZoneConfig;
use crate::model::Discovery;
use crate::traits::NameResolver;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, warn};

/// How a hostname relates to the configured zone tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expansion {
    /// No token found; only the hostname itself is resolved
    Unzoned,
    /// Exactly one token found
    Expanded {
        /// The token present in the hostname
        token: String,
        /// The hostname with every other token substituted, in token order
        siblings: Vec<String>,
    },
    /// Several tokens found; treated as unzoned
    Ambiguous {
        /// Every token present in the hostname
        tokens: Vec<String>,
    },
}

/// A lookup that produced no addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionFailure {
    /// The hostname that failed
    pub hostname: String,
    /// Why it failed
    pub reason: String,
}

/// Results of one resolution batch
#[derive(Debug, Clone, Default)]
pub struct ResolutionBatch {
    /// Addresses per successfully resolved hostname
    pub addresses: HashMap<String, BTreeSet<IpAddr>>,
    /// Hostnames that failed or timed out
    pub failures: Vec<ResolutionFailure>,
}

impl ResolutionBatch {
    /// Addresses of a hostname; empty when it failed or was never resolved
    pub fn addresses_of(&self, hostname: &str) -> impl Iterator<Item = IpAddr> + '_ {
        self.addresses
            .get(&hostname.trim().to_lowercase())
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }
}

/// Expands hostnames across zones and resolves them
#[derive(Debug, Clone)]
pub struct ZoneExpander {
    tokens: Vec<String>,
    timeout: Duration,
    concurrency: usize,
}

impl ZoneExpander {
    /// Create an expander from configuration
    pub fn new(config: &ZoneConfig) -> Self {
        Self {
            tokens: config.tokens.iter().map(|t| t.trim().to_lowercase()).collect(),
            timeout: config.dns_timeout(),
            concurrency: config.resolver_concurrency.max(1),
        }
    }

    /// Classify a hostname against the zone tokens
    pub fn expand(&self, hostname: &str) -> Expansion {
        let hostname = hostname.trim().to_lowercase();
        let found: Vec<&String> = self.tokens.iter().filter(|t| hostname.contains(t.as_str())).collect();

        match found.as_slice() {
            [] => Expansion::Unzoned,
            [token] => Expansion::Expanded {
                token: token.to_string(),
                siblings: self
                    .tokens
                    .iter()
                    .filter(|other| other != token)
                    .map(|other| hostname.replace(token.as_str(), other))
                    .collect(),
            },
            many => {
                let tokens: Vec<String> = many.iter().map(|t| t.to_string()).collect();
                warn!(
                    "Hostname {} matches several zone tokens ({}), resolving it as-is",
                    hostname,
                    tokens.join(", ")
                );
                Expansion::Ambiguous { tokens }
            }
        }
    }

    /// The hostname followed by its zone siblings
    pub fn variants(&self, hostname: &str) -> Vec<String> {
        let original = hostname.trim().to_lowercase();
        match self.expand(&original) {
            Expansion::Expanded { siblings, .. } => {
                let mut variants = Vec::with_capacity(siblings.len() + 1);
                variants.push(original);
                variants.extend(siblings);
                variants
            }
            Expansion::Unzoned | Expansion::Ambiguous { .. } => vec![original],
        }
    }

    /// Resolve hostnames concurrently
    ///
    /// Duplicates are resolved once. At most `resolver_concurrency` lookups
    /// run at a time and each is bounded by the DNS timeout.
    pub async fn resolve_all<I>(&self, resolver: Arc<dyn NameResolver>, hostnames: I) -> ResolutionBatch
    where
        I: IntoIterator<Item = String>,
    {
        let unique: BTreeSet<String> = hostnames
            .into_iter()
            .map(|h| h.trim().to_lowercase())
            .filter(|h| !h.is_empty())
            .collect();

        debug!(
            "Resolving {} hostname(s) via {} (concurrency {}, timeout {:?})",
            unique.len(),
            resolver.resolver_name(),
            self.concurrency,
            self.timeout
        );

        let (tx, mut rx) = mpsc::channel(self.concurrency);
        let permits = Arc::new(Semaphore::new(self.concurrency));

        for hostname in unique {
            let tx = tx.clone();
            let resolver = Arc::clone(&resolver);
            let permits = Arc::clone(&permits);
            let timeout = self.timeout;

            tokio::spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => lookup(resolver.as_ref(), &hostname, timeout).await,
                    Err(_) => Err("resolver pool closed".to_string()),
                };
                // The consumer only stops once every sender is gone
                let _ = tx.send((hostname, outcome)).await;
            });
        }
        drop(tx);

        let mut batch = ResolutionBatch::default();
        while let Some((hostname, outcome)) = rx.recv().await {
            match outcome {
                Ok(addresses) => {
                    batch.addresses.insert(hostname, addresses);
                }
                Err(reason) => batch.failures.push(ResolutionFailure { hostname, reason }),
            }
        }
        batch.failures.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        batch
    }

    /// What one observed hostname contributes to its grouping key
    ///
    /// Every variant is recorded as a hostname whether or not it resolved.
    pub fn discovery_for(&self, hostname: &str, batch: &ResolutionBatch) -> Discovery {
        let mut discovery = Discovery::default();
        for variant in self.variants(hostname) {
            discovery.addresses.extend(batch.addresses_of(&variant));
            discovery.hostnames.insert(variant);
        }
        discovery
    }
}

async fn lookup(
    resolver: &dyn NameResolver,
    hostname: &str,
    timeout: Duration,
) -> Result<BTreeSet<IpAddr>, String> {
    match tokio::time::timeout(timeout, resolver.resolve(hostname)).await {
        Ok(Ok(addresses)) => {
            debug!("Resolved {} -> {:?}", hostname, addresses);
            Ok(addresses.into_iter().collect())
        }
        Ok(Err(e)) => {
            debug!("Resolution failed for {}: {}", hostname, e);
            Err(e.to_string())
        }
        Err(_) => {
            warn!("Resolution of {} timed out after {:?}", hostname, timeout);
            Err(format!("timed out after {:?}", timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct TableResolver {
        table: HashMap<&'static str, Vec<IpAddr>>,
    }

    #[async_trait]
    impl NameResolver for TableResolver {
        async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>, crate::Error> {
            if hostname.starts_with("slow.") {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            self.table
                .get(hostname)
                .cloned()
                .ok_or_else(|| crate::Error::resolution(format!("NXDOMAIN {}", hostname)))
        }

        fn resolver_name(&self) -> &'static str {
            "table"
        }
    }

    fn expander(tokens: &[&str]) -> ZoneExpander {
        ZoneExpander::new(&ZoneConfig {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            dns_timeout_ms: 100,
            resolver_concurrency: 2,
        })
    }

    #[test]
    fn test_expand_single_token() {
        let expander = expander(&["zoneA", "zoneB", "zoneC"]);

        assert_eq!(
            expander.expand("svc.zoneB.example.com"),
            Expansion::Expanded {
                token: "zoneb".to_string(),
                siblings: vec!["svc.zonea.example.com".to_string(), "svc.zonec.example.com".to_string()],
            }
        );
        assert_eq!(expander.expand("svc.example.com"), Expansion::Unzoned);
    }

    #[test]
    fn test_ambiguous_hostname_is_not_expanded() {
        let expander = expander(&["zoneA", "zoneB"]);

        assert!(matches!(expander.expand("zonea.zoneb.example.com"), Expansion::Ambiguous { .. }));
        assert_eq!(expander.variants("zonea.zoneb.example.com"), vec!["zonea.zoneb.example.com"]);
    }

    #[test]
    fn test_expansion_is_symmetric() {
        let expander = expander(&["eu-fr-paris", "eu-fr-north", "hk-hongkong", "sg-singapore"]);
        let original = "api.slb.eu-fr-north.cloud.example";

        let Expansion::Expanded { siblings, .. } = expander.expand(original) else {
            panic!("expected expansion");
        };
        assert_eq!(siblings.len(), 3);

        for sibling in siblings {
            let Expansion::Expanded { siblings: back, .. } = expander.expand(&sibling) else {
                panic!("sibling {} should expand", sibling);
            };
            assert!(back.contains(&original.to_string()));
        }
    }

    #[tokio::test]
    async fn test_resolution_failures_are_soft() {
        let expander = expander(&["zoneA", "zoneB"]);
        let resolver: Arc<dyn NameResolver> = Arc::new(TableResolver {
            table: HashMap::from([("svc.zonea.example.com", vec!["10.1.1.1".parse().unwrap()])]),
        });

        let batch = expander
            .resolve_all(
                resolver,
                vec![
                    "svc.zonea.example.com".to_string(),
                    "svc.zoneb.example.com".to_string(),
                    "slow.example.com".to_string(),
                ],
            )
            .await;

        assert_eq!(batch.addresses.len(), 1);
        let failed: Vec<_> = batch.failures.iter().map(|f| f.hostname.as_str()).collect();
        assert_eq!(failed, vec!["slow.example.com", "svc.zoneb.example.com"]);
        assert!(batch.failures[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_siblings_merge_under_original_key() {
        let expander = expander(&["zoneA", "zoneB"]);
        let resolver: Arc<dyn NameResolver> = Arc::new(TableResolver {
            table: HashMap::from([
                ("svc.zonea.example.com", vec!["10.1.1.1".parse().unwrap()]),
                ("svc.zoneb.example.com", vec!["10.2.2.2".parse().unwrap()]),
            ]),
        });

        let original = "svc.zoneA.example.com";
        let batch = expander.resolve_all(resolver, expander.variants(original)).await;
        assert!(batch.failures.is_empty());

        let discovery = expander.discovery_for(original, &batch);
        let addresses: Vec<String> = discovery.addresses.iter().map(ToString::to_string).collect();
        assert_eq!(addresses, vec!["10.1.1.1", "10.2.2.2"]);
        assert_eq!(discovery.hostnames.len(), 2);
    }
}
