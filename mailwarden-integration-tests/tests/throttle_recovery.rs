//! Deferral backoff and recovery through the wired engine, on a test clock.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use mailwarden_agents::{Action, AgentFactory};
use mailwarden_conviction::ConvictionStore;
use mailwarden_core::{CancelToken, FixedClock, IspConfig, IspRegistry};
use mailwarden_executor::Executor;
use mailwarden_memory::MemoryStore;
use mailwarden_orchestrator::{CollectingAlertSink, Orchestrator};
use mailwarden_signals::SignalProcessor;
use mailwarden_store::SledStore;
use mailwarden_suppression::{GlobalSuppressionHub, IspSuppressionSet};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within timeout");
}

fn batch(kind: &str, tag: &str, count: usize) -> Vec<Value> {
    (0..count)
        .map(|n| {
            json!({
                "type": kind,
                "recipient": format!("{}{}@gmail.com", tag, n),
                "source_ip": "1.2.3.4",
                "dsn_status": if kind == "t" { "421-4.7.28" } else { "" },
            })
        })
        .collect()
}

#[tokio::test]
async fn deferral_pressure_backs_off_then_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::temporary().unwrap());
    let memory = MemoryStore::new(dir.path().join("memory")).unwrap();
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 6, 2, 12, 0, 0).unwrap());
    let processor = Arc::new(SignalProcessor::with_clock(None, Arc::new(clock.clone())));
    let convictions = Arc::new(ConvictionStore::new(None));
    let suppressions = Arc::new(IspSuppressionSet::new(
        "default",
        dir.path().join("suppressions"),
        store.clone(),
    ));
    let hub = Arc::new(GlobalSuppressionHub::new(
        "default",
        dir.path().join("suppressions"),
        store.clone(),
    ));
    suppressions.set_global_hub(hub.clone());
    let (executor, _log) = Executor::dry_run("/etc/pmta/suppressions");

    let factory = AgentFactory::new(
        IspConfig::default_set(),
        convictions.clone(),
        suppressions.clone(),
        Some(memory.clone()),
    );
    let mut orchestrator = Orchestrator::new(
        "default",
        Arc::new(IspRegistry::static_only()),
        processor.clone(),
        convictions,
        suppressions,
        hub,
        Arc::new(executor),
        memory,
        store.clone(),
        store,
        Arc::new(CollectingAlertSink::new()),
        Arc::new(clock.clone()),
    );
    let cancel = CancelToken::new();
    orchestrator.start(factory, cancel.clone()).await.unwrap();

    // 100 deliveries + 30 transient deferrals: deferral_rate_5m = 30%.
    let mut payload = batch("d", "a", 100);
    payload.extend(batch("t", "b", 30));
    orchestrator.submit(&serde_json::to_vec(&payload).unwrap());
    processor.tick();

    let o = &orchestrator;
    wait_until(move || o.recent_decisions().iter().any(|d| d.action == Action::ReduceRate)).await;
    let reduce = orchestrator
        .recent_decisions()
        .into_iter()
        .find(|d| d.action == Action::ReduceRate)
        .unwrap();
    assert_eq!(reduce.action_params["rate_adj"], json!(0.95));

    // Six minutes later the transients have left the 5-minute window; fresh
    // deliveries show clean acceptance and the agent starts recovering.
    clock.advance(ChronoDuration::minutes(6));
    orchestrator.submit(&serde_json::to_vec(&batch("d", "c", 100)).unwrap());
    processor.tick();

    let o = &orchestrator;
    wait_until(move || o.recent_decisions().iter().any(|d| d.action == Action::IncreaseRate)).await;
    let increase = orchestrator
        .recent_decisions()
        .into_iter()
        .find(|d| d.action == Action::IncreaseRate)
        .unwrap();
    // 0.95 × 1.10 caps at 1.0: a single backoff step recovers in one tick.
    assert_eq!(increase.action_params["rate_adj"], json!(1.0));
    assert_eq!(increase.action_params["fully_recovered"], json!(true));

    cancel.cancel();
}
