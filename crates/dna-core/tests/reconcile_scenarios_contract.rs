//! Contract Test: Reconciliation Scenarios
//!
//! End-to-end runs of the engine over scripted collaborators.
//!
//! Constraints verified:
//! - Zone siblings are resolved and merged under one grouping key
//! - A list already storing an address keeps it
//! - Hostname cardinality separates otherwise tied new lists
//! - An unresolved address seen in the lookback window is retained

mod common;

use common::*;
use dna_core::AddressList;
use dna_core::engine::EngineEvent;
use dna_core::model::last_seen_description;
use std::collections::BTreeSet;

#[tokio::test]
async fn zone_siblings_merge_into_one_list() {
    let resolver = StaticResolver::new(&[
        ("svc.zonea.example.com", &["10.1.1.1"]),
        ("svc.zoneb.example.com", &["10.2.2.2"]),
    ]);
    let traffic = ScriptedTrafficSource::new(vec![flow("svc.zoneA.example.com", "10.1.1.1")]);
    let store = RecordingStore::default();

    let (engine, _rx) = engine(&resolver, &traffic, &store, test_config());
    let report = engine.run_at(now()).await;

    assert!(report.is_success(), "run failed: {:?}", report.fatal_error);
    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].name, "DNA_svc-IPL");

    let list = store.list("DNA_svc-IPL").await.expect("list created");
    assert_eq!(list.include_field(), "10.1.1.1;10.2.2.2");
    assert_eq!(list.hostnames_field(), "svc.zonea.example.com;svc.zoneb.example.com");
    assert_eq!(list.description, "Last seen at : 2025-06-01");
    assert_eq!(store.create_calls(), 1);
    assert_eq!(store.update_calls(), 0);
    assert_eq!(store.temporary_lists(), 0);
}

#[tokio::test]
async fn historical_owner_keeps_contested_address() {
    let existing = AddressList::existing("/iplists/1", "DNA_app1-IPL", last_seen_description(now().date_naive()))
        .with_addresses([ip("10.9.9.9")])
        .with_hostnames(["app1.example.com"]);
    let resolver = StaticResolver::new(&[
        ("app1.example.com", &["10.9.9.9"]),
        ("app2.example.com", &["10.9.9.9", "10.8.8.8"]),
    ]);
    let traffic = ScriptedTrafficSource::new(vec![flow("app2.example.com", "10.9.9.9")]);
    let store = RecordingStore::with_lists([existing]);

    let (engine, mut rx) = engine(&resolver, &traffic, &store, test_config());
    let report = engine.run_at(now()).await;

    assert!(report.is_success());
    let app1 = store.list("DNA_app1-IPL").await.unwrap();
    let app2 = store.list("DNA_app2-IPL").await.unwrap();
    assert_eq!(app1.include_field(), "10.9.9.9");
    assert_eq!(app2.include_field(), "10.8.8.8");
    assert!(report.updated.is_empty());

    assert_eq!(report.reassignments.len(), 1);
    assert_eq!(report.reassignments[0].owner, "DNA_app1-IPL");
    assert_eq!(report.reassignments[0].removed_from, "DNA_app2-IPL");

    let events = drain(&mut rx);
    assert!(events.contains(&EngineEvent::OwnershipDecided {
        address: ip("10.9.9.9"),
        winner: "DNA_app1-IPL".to_string(),
        losers: vec!["DNA_app2-IPL".to_string()],
    }));
}

#[tokio::test]
async fn hostname_cardinality_breaks_tie_between_new_lists() {
    let resolver = StaticResolver::new(&[
        ("aaa.one.example.com", &["10.3.0.1", "10.5.5.5"]),
        ("aaa.two.example.com", &["10.3.0.2"]),
        ("zzz.h1.example.com", &["10.4.0.1", "10.5.5.5"]),
        ("zzz.h2.example.com", &["10.4.0.2"]),
        ("zzz.h3.example.com", &["10.4.0.3"]),
        ("zzz.h4.example.com", &["10.4.0.4"]),
        ("zzz.h5.example.com", &["10.4.0.5"]),
    ]);
    let traffic = ScriptedTrafficSource::new(vec![
        flow("aaa.one.example.com", "10.3.0.1"),
        flow("aaa.two.example.com", "10.3.0.2"),
        flow("zzz.h1.example.com", "10.4.0.1"),
        flow("zzz.h2.example.com", "10.4.0.2"),
        flow("zzz.h3.example.com", "10.4.0.3"),
        flow("zzz.h4.example.com", "10.4.0.4"),
        flow("zzz.h5.example.com", "10.4.0.5"),
    ]);
    let store = RecordingStore::default();

    let (engine, _rx) = engine(&resolver, &traffic, &store, test_config());
    let report = engine.run_at(now()).await;

    assert!(report.is_success());
    let aaa = store.list("DNA_aaa-IPL").await.unwrap();
    let zzz = store.list("DNA_zzz-IPL").await.unwrap();
    assert!(zzz.addresses.contains(&ip("10.5.5.5")));
    assert!(!aaa.addresses.contains(&ip("10.5.5.5")));
    assert_eq!(aaa.addresses.len(), 2);
    assert_eq!(zzz.addresses.len(), 6);
}

#[tokio::test]
async fn address_seen_in_lookback_is_retained() {
    let existing = AddressList::existing("/iplists/1", "DNA_x-IPL", "Last seen at : 2025-05-01")
        .with_addresses([ip("10.0.0.1"), ip("10.0.0.2")])
        .with_hostnames(["x.example.com"]);
    let resolver = StaticResolver::new(&[("x.example.com", &["10.0.0.1"])]);
    let traffic = ScriptedTrafficSource::new(Vec::new()).with_lookback(vec![dna_core::FlowRecord::new(
        "app-server-01",
        ip("10.0.0.2"),
        "",
        days_ago(10),
    )]);
    let store = RecordingStore::with_lists([existing.clone()]);

    let (engine, _rx) = engine(&resolver, &traffic, &store, test_config());
    let report = engine.run_at(now()).await;

    assert!(report.is_success());
    assert!(report.updated.is_empty());
    assert!(report.deletion_candidates.is_empty());
    assert_eq!(store.list("DNA_x-IPL").await.unwrap(), existing);

    // Temporary list created, queried and removed
    assert_eq!(store.temporary_lists(), 1);
    assert_eq!(store.delete_calls(), 1);
    assert_eq!(traffic.queried_lists(), vec!["_tmp_ip.to.delete_20250601-080000".to_string()]);
    assert_eq!(store.inner.len().await, 1);

    // Not observed since May 1st
    assert_eq!(report.stale_lists.len(), 1);
    assert_eq!(report.stale_lists[0].name, "DNA_x-IPL");
}

#[tokio::test]
async fn address_unseen_in_lookback_is_removed_and_reported() {
    let existing = AddressList::existing("/iplists/1", "DNA_x-IPL", "")
        .with_addresses([ip("10.0.0.1"), ip("10.0.0.2"), ip("10.0.0.3")])
        .with_hostnames(["x.example.com"]);
    let resolver = StaticResolver::new(&[("x.example.com", &["10.0.0.1"])]);
    let traffic = ScriptedTrafficSource::new(Vec::new()).with_lookback(vec![dna_core::FlowRecord::new(
        "app-server-01",
        ip("10.0.0.3"),
        "",
        days_ago(45),
    )]);
    let store = RecordingStore::with_lists([existing]);

    let (engine, _rx) = engine(&resolver, &traffic, &store, test_config());
    let report = engine.run_at(now()).await;

    assert!(report.is_success());
    let list = store.list("DNA_x-IPL").await.unwrap();
    assert_eq!(list.include_field(), "10.0.0.1;10.0.0.3");
    assert_eq!(list.hostnames_field(), "x.example.com");

    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.updated[0].removed_addresses, BTreeSet::from([ip("10.0.0.2")]));

    // 10.0.0.2 removed; 10.0.0.3 kept but older than the staleness threshold
    assert_eq!(report.deletion_candidates.len(), 2);
    let removed = &report.deletion_candidates[0];
    assert_eq!(removed.address, ip("10.0.0.2"));
    assert!(removed.removed);
    assert_eq!(removed.last_seen, None);
    let stale = &report.deletion_candidates[1];
    assert_eq!(stale.address, ip("10.0.0.3"));
    assert!(!stale.removed);
    assert_eq!(stale.last_seen, Some(days_ago(45)));
}
