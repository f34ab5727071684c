//! Hard bounce → per-ISP suppression → global hub, end to end.

use mailwarden_agents::AgentFactory;
use mailwarden_conviction::{ConvictionStore, Verdict};
use mailwarden_core::{AgentKind, CancelToken, Isp, IspConfig, IspRegistry, MxResolver, SystemClock};
use mailwarden_executor::Executor;
use mailwarden_memory::MemoryStore;
use mailwarden_orchestrator::{CollectingAlertSink, Orchestrator};
use mailwarden_signals::SignalProcessor;
use mailwarden_store::{SledStore, SuppressionRowStore};
use mailwarden_suppression::{GlobalSuppressionHub, IspSuppressionSet, md5_hex};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// MX stub: example.com is hosted on Google.
struct GoogleHosted;

impl MxResolver for GoogleHosted {
    fn resolve_mx(&self, domain: &str) -> Option<Vec<String>> {
        (domain == "example.com").then(|| vec!["aspmx.l.google.com".to_string()])
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within timeout");
}

#[tokio::test]
async fn hard_bounce_suppresses_per_isp_and_globally() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::temporary().unwrap());
    let memory = MemoryStore::new(dir.path().join("memory")).unwrap();
    let processor = Arc::new(SignalProcessor::new(None));
    let convictions = Arc::new(ConvictionStore::new(Some(memory.clone())));
    let files_dir = dir.path().join("suppressions");
    let suppressions = Arc::new(IspSuppressionSet::new("default", &files_dir, store.clone()));
    let hub = Arc::new(GlobalSuppressionHub::new("default", &files_dir, store.clone()));
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
        Arc::new(IspRegistry::with_resolver(Arc::new(GoogleHosted))),
        processor,
        convictions.clone(),
        suppressions.clone(),
        hub.clone(),
        Arc::new(executor),
        memory,
        store.clone(),
        store.clone(),
        Arc::new(CollectingAlertSink::new()),
        Arc::new(SystemClock),
    );
    let cancel = CancelToken::new();
    orchestrator.start(factory, cancel.clone()).await.unwrap();

    let record = json!({
        "type": "b",
        "recipient": "USER@Example.com",
        "bounce_cat": "bad-mailbox",
        "dsn_status": "5.1.1",
        "source_ip": "1.2.3.4",
        "vmta": "v1"
    });
    let payload = serde_json::to_vec(&json!([record])).unwrap();
    let (received, processed) = orchestrator.submit(&payload);
    assert_eq!((received, processed), (1, 1));

    // The MX fallback classified example.com into the Gmail cluster.
    let sup = suppressions.clone();
    wait_until(move || sup.is_suppressed(Isp::Gmail, "user@example.com")).await;

    assert!(hub.is_suppressed("user@example.com"));
    assert!(hub.is_suppressed_md5(&md5_hex("User@Example.com ")));

    // Durable row, MTA file line, conviction.
    assert_eq!(
        store.suppressed_emails("default", "gmail").await.unwrap(),
        vec!["user@example.com"]
    );
    let file = std::fs::read_to_string(files_dir.join("gmail.txt")).unwrap();
    assert_eq!(file, "user@example.com\n");
    let global = std::fs::read_to_string(files_dir.join("global_suppression.txt")).unwrap();
    assert_eq!(global, "user@example.com\n");

    let wonts = convictions.recall_by_verdict(Isp::Gmail, AgentKind::Suppression, Verdict::Wont);
    assert_eq!(wonts.len(), 1);
    assert_eq!(wonts[0].context.reason.as_deref(), Some("bad-mailbox"));

    // A second identical record changes nothing.
    orchestrator.submit(&payload);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.suppressed_emails("default", "gmail").await.unwrap().len(), 1);
    assert_eq!(
        convictions.recall_by_verdict(Isp::Gmail, AgentKind::Suppression, Verdict::Wont).len(),
        1
    );
    let file = std::fs::read_to_string(files_dir.join("gmail.txt")).unwrap();
    assert_eq!(file, "user@example.com\n");

    cancel.cancel();
}
