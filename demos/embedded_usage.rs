//! Minimal embedding example for dna-core
//!
//! Runs one reconciliation against in-memory collaborators: a fixed name
//! table, a canned traffic sample and the memory address list store. The
//! application owns every component and the engine keeps no global state.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dna_core::{
    AddressList, AddressListStore, Error, FlowRecord, MemoryAddressListStore, NameResolver,
    ReconcileConfig, ReconcileEngine, Result, TimeWindow, TrafficSource,
};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Resolver answering from a fixed table
struct TableResolver {
    names: HashMap<String, Vec<IpAddr>>,
}

impl TableResolver {
    fn new(entries: &[(&str, &[[u8; 4]])]) -> Self {
        let names = entries
            .iter()
            .map(|(name, addresses)| {
                let addresses = addresses.iter().map(|a| IpAddr::from(*a)).collect();
                (name.to_string(), addresses)
            })
            .collect();
        Self { names }
    }
}

#[async_trait]
impl NameResolver for TableResolver {
    async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>> {
        self.names
            .get(hostname)
            .cloned()
            .ok_or_else(|| Error::resolution(format!("{}: no such name", hostname)))
    }

    fn resolver_name(&self) -> &'static str {
        "table"
    }
}

/// Traffic source replaying a fixed set of flows
struct CannedTraffic {
    flows: Vec<FlowRecord>,
}

#[async_trait]
impl TrafficSource for CannedTraffic {
    async fn outbound_flows(&self, window: &TimeWindow) -> Result<Vec<FlowRecord>> {
        Ok(self
            .flows
            .iter()
            .filter(|f| f.timestamp >= window.start && f.timestamp <= window.end)
            .cloned()
            .collect())
    }

    async fn flows_to_list(&self, list: &AddressList, window: &TimeWindow) -> Result<Vec<FlowRecord>> {
        Ok(self
            .flows
            .iter()
            .filter(|f| list.addresses.contains(&f.destination_address))
            .filter(|f| f.timestamp >= window.start && f.timestamp <= window.end)
            .cloned()
            .collect())
    }

    fn source_name(&self) -> &'static str {
        "canned"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== Embedded dna-core Example ===\n");

    let now = Utc::now();
    let flow = |host: &str, address: [u8; 4], days_ago: i64| {
        FlowRecord::new("web01", IpAddr::from(address), host, now - Duration::days(days_ago))
    };

    // 10.0.0.3 left the resolver a while ago but was still contacted last month
    let store = MemoryAddressListStore::with_lists([AddressList::existing(
        "/iplists/1",
        "DNA_api-IPL",
        "Last seen at : 2025-01-01",
    )
    .with_addresses([IpAddr::from([10, 0, 0, 1]), IpAddr::from([10, 0, 0, 3])])
    .with_hostnames(["api.eu-fr-paris.example.com"])]);

    let resolver = TableResolver::new(&[
        ("api.eu-fr-paris.example.com", &[[10, 0, 0, 1]]),
        ("api.eu-fr-north.example.com", &[[10, 0, 0, 2]]),
        ("billing.example.com", &[[10, 1, 0, 1]]),
    ]);
    let traffic = CannedTraffic {
        flows: vec![
            flow("api.eu-fr-paris.example.com", [10, 0, 0, 1], 1),
            flow("billing.example.com", [10, 1, 0, 1], 2),
            flow("api.eu-fr-paris.example.com", [10, 0, 0, 3], 30),
        ],
    };

    println!("1. Creating engine...");
    let (engine, mut event_rx) = ReconcileEngine::new(
        Arc::new(resolver),
        Box::new(traffic),
        Box::new(store.clone()),
        ReconcileConfig::new(),
    )?;

    let event_listener = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("[Event] {:?}", event);
        }
    });

    println!("2. Running one reconciliation...\n");
    let report = engine.run().await;
    drop(engine);
    let _ = event_listener.await;

    println!("\n{}", report.render_text());

    println!("3. Stored lists after the run:");
    for list in store.load_lists().await? {
        println!("   {} include={} fqdns={}", list.name, list.include_field(), list.hostnames_field());
    }

    Ok(())
}
