//! Contract Test: Failure Handling & Dry-Run
//!
//! Constraints verified:
//! - A failed secondary query retains every proposed removal
//! - A temporary list that cannot be created retains every proposed removal
//! - A failed temporary list deletion only warns
//! - A failed read aborts the run before any write, with a report
//! - A failed import is fatal but every computed change is still reported
//! - A slow resolver only costs the names it could not answer
//! - Dry-run computes the full delta and writes nothing

mod common;

use common::*;
use dna_core::AddressList;
use dna_core::engine::{EngineEvent, steps};
use dna_core::report::StepOutcome;

fn stored_list() -> AddressList {
    AddressList::existing("/iplists/1", "DNA_x-IPL", "")
        .with_addresses([ip("10.0.0.1"), ip("10.0.0.2")])
        .with_hostnames(["x.example.com"])
}

fn step_outcome(report: &dna_core::RunReport, name: &str) -> StepOutcome {
    report
        .steps
        .iter()
        .find(|s| s.name == name)
        .map(|s| s.outcome.clone())
        .unwrap_or_else(|| panic!("step {} not recorded", name))
}

#[tokio::test]
async fn failed_secondary_query_retains_removals() {
    let resolver = StaticResolver::new(&[("x.example.com", &["10.0.0.1"])]);
    let traffic = ScriptedTrafficSource::new(Vec::new()).failing_lookback();
    let store = RecordingStore::with_lists([stored_list()]);

    let (engine, mut rx) = engine(&resolver, &traffic, &store, test_config());
    let report = engine.run_at(now()).await;

    assert!(report.is_success());
    assert!(report.updated.is_empty());
    assert_eq!(store.list("DNA_x-IPL").await.unwrap(), stored_list());
    assert!(matches!(step_outcome(&report, steps::CORROBORATE), StepOutcome::Failed(_)));

    // Still cleaned up
    assert_eq!(store.delete_calls(), 1);
    assert_eq!(store.inner.len().await, 1);

    assert_eq!(report.deletion_candidates.len(), 1);
    assert!(!report.deletion_candidates[0].removed);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, EngineEvent::CorroborationFailed { .. })));
}

#[tokio::test]
async fn failed_cleanup_only_warns() {
    let resolver = StaticResolver::new(&[("x.example.com", &["10.0.0.1"])]);
    let traffic = ScriptedTrafficSource::new(Vec::new());
    let store = RecordingStore::with_lists([stored_list()]);
    store.fail_delete();

    let (engine, mut rx) = engine(&resolver, &traffic, &store, test_config());
    let report = engine.run_at(now()).await;

    assert!(report.is_success());
    assert_eq!(step_outcome(&report, steps::CORROBORATE), StepOutcome::Succeeded);
    assert_eq!(store.list("DNA_x-IPL").await.unwrap().include_field(), "10.0.0.1");

    let events = drain(&mut rx);
    assert!(events.contains(&EngineEvent::CleanupFailed {
        list: "_tmp_ip.to.delete_20250601-080000".to_string(),
        error: "Address list store error: delete refused".to_string(),
    }));
}

#[tokio::test]
async fn failed_load_aborts_before_any_write() {
    let resolver = StaticResolver::new(&[]);
    let traffic = ScriptedTrafficSource::new(vec![flow("svc.example.com", "10.1.1.1")]);
    let store = RecordingStore::default();
    store.fail_load();

    let (engine, mut rx) = engine(&resolver, &traffic, &store, test_config());
    let report = engine.run_at(now()).await;

    assert!(!report.is_success());
    assert_eq!(report.steps.len(), 1);
    assert!(matches!(step_outcome(&report, steps::LOAD_LISTS), StepOutcome::Failed(_)));
    assert_eq!(store.create_calls(), 0);
    assert_eq!(resolver.call_count(), 0);
    assert!(report.render_text().contains("FATAL: Address list store error"));

    let events = drain(&mut rx);
    assert!(matches!(
        events.last(),
        Some(EngineEvent::Finished { error: Some(_), .. })
    ));
}

#[tokio::test]
async fn failed_update_still_reports_every_change() {
    let resolver = StaticResolver::new(&[
        ("x.example.com", &["10.0.0.1", "10.0.0.2", "10.0.0.3"]),
        ("new.example.com", &["10.7.7.7"]),
    ]);
    let traffic = ScriptedTrafficSource::new(vec![
        flow("x.example.com", "10.0.0.3"),
        flow("new.example.com", "10.7.7.7"),
    ]);
    let store = RecordingStore::with_lists([stored_list()]);
    store.fail_update();

    let (engine, _rx) = engine(&resolver, &traffic, &store, test_config());
    let report = engine.run_at(now()).await;

    assert!(!report.is_success());
    assert_eq!(report.created.len(), 1);
    assert!(store.list("DNA_new-IPL").await.is_some());
    assert!(matches!(step_outcome(&report, steps::IMPORT_UPDATES), StepOutcome::Failed(_)));

    // The computed update is reported although it was never written
    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.updated[0].name, "DNA_x-IPL");
    assert_eq!(store.list("DNA_x-IPL").await.unwrap(), stored_list());
}

#[tokio::test]
async fn failed_create_still_reports_pending_updates() {
    let resolver = StaticResolver::new(&[
        ("x.example.com", &["10.0.0.1", "10.0.0.2", "10.0.0.3"]),
        ("new.example.com", &["10.7.7.7"]),
    ]);
    let traffic = ScriptedTrafficSource::new(vec![
        flow("x.example.com", "10.0.0.3"),
        flow("new.example.com", "10.7.7.7"),
    ]);
    let store = RecordingStore::with_lists([stored_list()]);
    store.fail_create();

    let (engine, _rx) = engine(&resolver, &traffic, &store, test_config());
    let report = engine.run_at(now()).await;

    assert!(!report.is_success());
    assert!(matches!(step_outcome(&report, steps::IMPORT_NEW), StepOutcome::Failed(_)));
    assert_eq!(step_outcome(&report, steps::IMPORT_UPDATES), StepOutcome::Skipped);
    assert_eq!(store.update_calls(), 0);

    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].name, "DNA_new-IPL");
    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.updated[0].name, "DNA_x-IPL");
    assert!(store.list("DNA_new-IPL").await.is_none());
}

#[tokio::test]
async fn failed_temporary_list_retains_removals() {
    let resolver = StaticResolver::new(&[("x.example.com", &["10.0.0.1"])]);
    let traffic = ScriptedTrafficSource::new(Vec::new());
    let store = RecordingStore::with_lists([stored_list()]);
    store.fail_create_temporary();

    let (engine, mut rx) = engine(&resolver, &traffic, &store, test_config());
    let report = engine.run_at(now()).await;

    assert!(report.is_success());
    assert!(report.updated.is_empty());
    assert_eq!(store.list("DNA_x-IPL").await.unwrap(), stored_list());
    assert!(matches!(step_outcome(&report, steps::CORROBORATE), StepOutcome::Failed(_)));

    // Nothing was created, so nothing is deleted or queried
    assert_eq!(store.temporary_lists(), 1);
    assert_eq!(store.delete_calls(), 0);
    assert!(traffic.queried_lists().is_empty());

    assert_eq!(report.deletion_candidates.len(), 1);
    assert!(!report.deletion_candidates[0].removed);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, EngineEvent::CorroborationFailed { .. })));
}

#[tokio::test]
async fn slow_resolution_is_isolated() {
    let resolver = StaticResolver::new(&[
        ("fast.example.com", &["10.6.0.1"]),
        ("slow.example.com", &["10.6.0.2"]),
    ])
    .with_slow(&["slow.example.com"]);
    let traffic = ScriptedTrafficSource::new(vec![
        flow("fast.example.com", "10.6.0.1"),
        flow("slow.example.com", "10.6.0.2"),
    ]);
    let store = RecordingStore::default();

    let (engine, _rx) = engine(&resolver, &traffic, &store, test_config());
    let report = engine.run_at(now()).await;

    assert!(report.is_success());
    assert_eq!(report.resolution_failures.len(), 1);
    assert!(report.resolution_failures[0].starts_with("slow.example.com"));

    // The observed address still lands in the list
    let slow = store.list("DNA_slow-IPL").await.unwrap();
    assert_eq!(slow.include_field(), "10.6.0.2");
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let resolver = StaticResolver::new(&[
        ("x.example.com", &["10.0.0.1"]),
        ("new.example.com", &["10.7.7.7"]),
    ]);
    let traffic = ScriptedTrafficSource::new(vec![flow("new.example.com", "10.7.7.7")]);
    let store = RecordingStore::with_lists([stored_list()]);

    let mut config = test_config();
    config.engine.dry_run = true;
    let (engine, _rx) = engine(&resolver, &traffic, &store, config);
    let report = engine.run_at(now()).await;

    assert!(report.is_success());
    assert!(report.dry_run);
    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].name, "DNA_new-IPL");

    assert_eq!(store.create_calls(), 0);
    assert_eq!(store.update_calls(), 0);
    assert_eq!(store.temporary_lists(), 0);
    assert!(traffic.queried_lists().is_empty());
    assert_eq!(step_outcome(&report, steps::IMPORT_NEW), StepOutcome::Skipped);

    // The unresolved address is reported, not removed
    assert_eq!(report.deletion_candidates.len(), 1);
    assert!(!report.deletion_candidates[0].removed);
}
