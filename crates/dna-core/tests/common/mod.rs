//! Test doubles and common utilities for reconciliation contract tests
//!
//! Every collaborator is scripted in memory and counts its calls, so tests
//! can assert both on the resulting lists and on how the engine talked to
//! the outside world.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dna_core::error::{Error, Result};
use dna_core::store::MemoryAddressListStore;
use dna_core::{
    AddressList, AddressListStore, EngineEvent, FlowRecord, NameResolver, ReconcileConfig,
    ReconcileEngine, TimeWindow, TrafficSource,
};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Fixed clock used by every scenario
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
}

/// `days` days before [`now()`]
pub fn days_ago(days: i64) -> DateTime<Utc> {
    now() - Duration::days(days)
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// A flow observed yesterday
pub fn flow(hostname: &str, address: &str) -> FlowRecord {
    FlowRecord::new("app-server-01", ip(address), hostname, days_ago(1))
}

/// Two zones, short timeouts
pub fn test_config() -> ReconcileConfig {
    let mut config = ReconcileConfig::default();
    config.zones.tokens = vec!["zonea".to_string(), "zoneb".to_string()];
    config.zones.dns_timeout_ms = 200;
    config.zones.resolver_concurrency = 4;
    config
}

/// A resolver answering from a fixed table
///
/// Unknown names fail. Names listed as slow never answer in time.
#[derive(Clone, Default)]
pub struct StaticResolver {
    table: Arc<HashMap<String, Vec<IpAddr>>>,
    slow: Arc<HashSet<String>>,
    calls: Arc<AtomicUsize>,
}

impl StaticResolver {
    pub fn new(entries: &[(&str, &[&str])]) -> Self {
        let table = entries
            .iter()
            .map(|(host, addresses)| (host.to_string(), addresses.iter().map(|a| ip(a)).collect()))
            .collect();
        Self {
            table: Arc::new(table),
            slow: Arc::new(HashSet::new()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_slow(mut self, hostnames: &[&str]) -> Self {
        self.slow = Arc::new(hostnames.iter().map(|h| h.to_string()).collect());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.slow.contains(hostname) {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
        self.table
            .get(hostname)
            .cloned()
            .ok_or_else(|| Error::resolution(format!("{}: NXDOMAIN", hostname)))
    }

    fn resolver_name(&self) -> &'static str {
        "static"
    }
}

/// A traffic source replaying scripted flows
///
/// `flows_to_list` answers from the lookback flows whose destination is a
/// member of the queried list and whose timestamp falls in the window.
#[derive(Clone, Default)]
pub struct ScriptedTrafficSource {
    outbound: Arc<Vec<FlowRecord>>,
    lookback: Arc<Vec<FlowRecord>>,
    fail_lookback: bool,
    queried_lists: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTrafficSource {
    pub fn new(outbound: Vec<FlowRecord>) -> Self {
        Self {
            outbound: Arc::new(outbound),
            ..Self::default()
        }
    }

    pub fn with_lookback(mut self, lookback: Vec<FlowRecord>) -> Self {
        self.lookback = Arc::new(lookback);
        self
    }

    pub fn failing_lookback(mut self) -> Self {
        self.fail_lookback = true;
        self
    }

    /// Names of the lists passed to `flows_to_list`
    pub fn queried_lists(&self) -> Vec<String> {
        self.queried_lists.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrafficSource for ScriptedTrafficSource {
    async fn outbound_flows(&self, _window: &TimeWindow) -> Result<Vec<FlowRecord>> {
        Ok(self.outbound.as_ref().clone())
    }

    async fn flows_to_list(&self, list: &AddressList, window: &TimeWindow) -> Result<Vec<FlowRecord>> {
        self.queried_lists.lock().unwrap().push(list.name.clone());
        if self.fail_lookback {
            return Err(Error::traffic("traffic export timed out"));
        }
        Ok(self
            .lookback
            .iter()
            .filter(|f| list.addresses.contains(&f.destination_address))
            .filter(|f| f.timestamp >= window.start && f.timestamp <= window.end)
            .cloned()
            .collect())
    }

    fn source_name(&self) -> &'static str {
        "scripted"
    }
}

/// A memory store that counts calls and can be told to fail
#[derive(Clone, Default)]
pub struct RecordingStore {
    pub inner: MemoryAddressListStore,
    create_calls: Arc<AtomicUsize>,
    update_calls: Arc<AtomicUsize>,
    temporary_lists: Arc<AtomicUsize>,
    delete_calls: Arc<AtomicUsize>,
    fail_load: Arc<AtomicBool>,
    fail_delete: Arc<AtomicBool>,
    fail_create: Arc<AtomicBool>,
    fail_update: Arc<AtomicBool>,
    fail_create_temporary: Arc<AtomicBool>,
}

impl RecordingStore {
    pub fn with_lists(lists: impl IntoIterator<Item = AddressList>) -> Self {
        Self {
            inner: MemoryAddressListStore::with_lists(lists),
            ..Self::default()
        }
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn temporary_lists(&self) -> usize {
        self.temporary_lists.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn fail_load(&self) {
        self.fail_load.store(true, Ordering::SeqCst);
    }

    pub fn fail_delete(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_update(&self) {
        self.fail_update.store(true, Ordering::SeqCst);
    }

    pub fn fail_create_temporary(&self) {
        self.fail_create_temporary.store(true, Ordering::SeqCst);
    }

    pub async fn list(&self, name: &str) -> Option<AddressList> {
        self.inner.get_by_name(name).await
    }

    /// Every stored list, temporary ones excluded
    pub async fn managed_lists(&self) -> Vec<AddressList> {
        self.inner
            .load_lists()
            .await
            .unwrap()
            .into_iter()
            .filter(|l| l.name.starts_with("DNA_"))
            .collect()
    }
}

#[async_trait]
impl AddressListStore for RecordingStore {
    async fn load_lists(&self) -> Result<Vec<AddressList>> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(Error::store("export failed with exit code 1"));
        }
        self.inner.load_lists().await
    }

    async fn create_lists(&self, lists: &[AddressList]) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::store("import failed with exit code 2"));
        }
        self.inner.create_lists(lists).await
    }

    async fn update_lists(&self, lists: &[AddressList]) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(Error::store("import failed with exit code 2"));
        }
        self.inner.update_lists(lists).await
    }

    async fn create_temporary_list(&self, list: &AddressList) -> Result<String> {
        self.temporary_lists.fetch_add(1, Ordering::SeqCst);
        if self.fail_create_temporary.load(Ordering::SeqCst) {
            return Err(Error::store("temporary list import failed with exit code 1"));
        }
        self.inner.create_temporary_list(list).await
    }

    async fn delete_list(&self, identifier: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Error::store("delete refused"));
        }
        self.inner.delete_list(identifier).await
    }

    fn store_name(&self) -> &'static str {
        "recording"
    }
}

/// Build an engine over clones of the given doubles
pub fn engine(
    resolver: &StaticResolver,
    traffic: &ScriptedTrafficSource,
    store: &RecordingStore,
    config: ReconcileConfig,
) -> (ReconcileEngine, mpsc::Receiver<EngineEvent>) {
    ReconcileEngine::new(
        Arc::new(resolver.clone()),
        Box::new(traffic.clone()),
        Box::new(store.clone()),
        config,
    )
    .expect("engine construction succeeds")
}

/// Drain every event emitted so far
pub fn drain(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
