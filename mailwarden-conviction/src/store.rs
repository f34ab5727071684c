//! Bounded in-memory conviction rings with durable JSONL backing

use crate::model::{Conviction, MicroContext, Verdict};
use crate::similarity::context_similarity;
use chrono::{DateTime, Duration, Utc};
use mailwarden_core::{AgentKind, Isp};
use mailwarden_memory::MemoryStore;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Ring capacity per `(isp, agent)`.
pub const RING_CAP: usize = 2000;

/// Minimum similarity for `recall_similar` hits.
const SIMILARITY_FLOOR: f64 = 0.2;

/// Sliding window for recording-velocity stats.
const VELOCITY_WINDOW: Duration = Duration::minutes(5);

/// Recording velocity over the last one and five minutes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityStats {
    /// Convictions per minute over the last minute.
    pub per_minute_1m: f64,
    /// Convictions per minute over the last five minutes.
    pub per_minute_5m: f64,
}

type Key = (Isp, AgentKind);

struct ConvictionStoreInner {
    rings: RwLock<HashMap<Key, VecDeque<Conviction>>>,
    subscribers: RwLock<Vec<mpsc::Sender<Conviction>>>,
    velocity: Mutex<HashMap<Key, VecDeque<DateTime<Utc>>>>,
    memory: Option<MemoryStore>,
}

/// Conviction memory: single-writer rings per agent, similarity recall,
/// subscriber fan-out, durable JSONL appends.
#[derive(Clone)]
pub struct ConvictionStore {
    inner: Arc<ConvictionStoreInner>,
}

impl ConvictionStore {
    pub fn new(memory: Option<MemoryStore>) -> Self {
        Self {
            inner: Arc::new(ConvictionStoreInner {
                rings: RwLock::new(HashMap::new()),
                subscribers: RwLock::new(Vec::new()),
                velocity: Mutex::new(HashMap::new()),
                memory,
            }),
        }
    }

    /// Register a snapshot listener. Full channels drop convictions rather
    /// than blocking the recording path.
    pub fn subscribe(&self, buffer: usize) -> mpsc::Receiver<Conviction> {
        let (tx, rx) = mpsc::channel(buffer);
        self.inner.subscribers.write().push(tx);
        rx
    }

    /// Append a conviction: ring insert (evicting the oldest at capacity),
    /// subscriber fan-out, velocity update, durable JSONL append.
    pub fn record(&self, conviction: Conviction) {
        let key = (conviction.isp, conviction.agent);

        {
            let mut rings = self.inner.rings.write();
            let ring = rings.entry(key).or_default();
            if ring.len() >= RING_CAP {
                ring.pop_front();
            }
            ring.push_back(conviction.clone());
        }

        {
            let mut velocity = self.inner.velocity.lock();
            let history = velocity.entry(key).or_default();
            history.push_back(conviction.created_at);
            let cutoff = conviction.created_at - VELOCITY_WINDOW;
            while history.front().is_some_and(|t| *t < cutoff) {
                history.pop_front();
            }
        }

        {
            let subscribers = self.inner.subscribers.read();
            for tx in subscribers.iter() {
                if tx.try_send(conviction.clone()).is_err() {
                    debug!(isp = %conviction.isp, agent = %conviction.agent, "conviction subscriber full, dropping");
                }
            }
        }

        if let Some(memory) = &self.inner.memory {
            let key = MemoryStore::agent_key(
                conviction.isp.name(),
                conviction.agent.name(),
                "convictions.jsonl",
            );
            if let Err(err) = memory.append_line(&key, &conviction) {
                warn!(error = %err, "conviction append failed");
            }
        }
    }

    /// All convictions for an agent, oldest first.
    pub fn recall_all(&self, isp: Isp, agent: AgentKind) -> Vec<Conviction> {
        self.inner
            .rings
            .read()
            .get(&(isp, agent))
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn recall_by_verdict(&self, isp: Isp, agent: AgentKind, verdict: Verdict) -> Vec<Conviction> {
        self.inner
            .rings
            .read()
            .get(&(isp, agent))
            .map(|ring| ring.iter().filter(|c| c.verdict == verdict).cloned().collect())
            .unwrap_or_default()
    }

    /// The `n` most recent convictions, newest first.
    pub fn recall_recent(&self, isp: Isp, agent: AgentKind, n: usize) -> Vec<Conviction> {
        self.inner
            .rings
            .read()
            .get(&(isp, agent))
            .map(|ring| ring.iter().rev().take(n).cloned().collect())
            .unwrap_or_default()
    }

    pub fn recall_by_ip(&self, isp: Isp, agent: AgentKind, ip: &str) -> Vec<Conviction> {
        self.inner
            .rings
            .read()
            .get(&(isp, agent))
            .map(|ring| {
                ring.iter()
                    .filter(|c| c.context.ip.as_deref() == Some(ip))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Score every stored conviction against `query`; return those above the
    /// similarity floor, best first, truncated to `limit`.
    pub fn recall_similar(
        &self,
        isp: Isp,
        agent: AgentKind,
        query: &MicroContext,
        limit: usize,
    ) -> Vec<(Conviction, f64)> {
        let candidates: Vec<Conviction> = self.recall_all(isp, agent);
        let mut scored: Vec<(Conviction, f64)> = candidates
            .into_iter()
            .map(|c| {
                let score = context_similarity(query, &c.context);
                (c, score)
            })
            .filter(|(_, score)| *score > SIMILARITY_FLOOR)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }

    pub fn velocity_stats(&self, isp: Isp, agent: AgentKind, now: DateTime<Utc>) -> VelocityStats {
        let velocity = self.inner.velocity.lock();
        let Some(history) = velocity.get(&(isp, agent)) else {
            return VelocityStats { per_minute_1m: 0.0, per_minute_5m: 0.0 };
        };
        let one_min = now - Duration::minutes(1);
        let five_min = now - VELOCITY_WINDOW;
        let count_1m = history.iter().filter(|t| **t >= one_min).count();
        let count_5m = history.iter().filter(|t| **t >= five_min).count();
        VelocityStats {
            per_minute_1m: count_1m as f64,
            per_minute_5m: count_5m as f64 / 5.0,
        }
    }

    /// Rebuild the rings from the durable JSONL logs. Corrupt or missing
    /// lines are tolerated silently; returns the number of loaded
    /// convictions.
    pub fn load_from_memory(&self) -> usize {
        let Some(memory) = &self.inner.memory else {
            return 0;
        };
        let mut loaded = 0;
        for isp in Isp::ALL {
            for agent in AgentKind::ALL {
                let key = MemoryStore::agent_key(isp.name(), agent.name(), "convictions.jsonl");
                let Ok(lines) = memory.read_lines(&key) else { continue };
                let mut rings = self.inner.rings.write();
                let ring = rings.entry((isp, agent)).or_default();
                for line in lines {
                    let Ok(conviction) = serde_json::from_str::<Conviction>(&line) else {
                        continue;
                    };
                    if ring.len() >= RING_CAP {
                        ring.pop_front();
                    }
                    ring.push_back(conviction);
                    loaded += 1;
                }
            }
        }
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conviction(isp: Isp, verdict: Verdict, ip: &str) -> Conviction {
        Conviction::new(
            isp,
            AgentKind::Throttle,
            verdict,
            "observed",
            MicroContext { ip: Some(ip.to_string()), ..Default::default() },
            Utc::now(),
        )
    }

    #[test]
    fn ring_evicts_oldest_at_capacity() {
        let store = ConvictionStore::new(None);
        for n in 0..=RING_CAP {
            store.record(conviction(Isp::Gmail, Verdict::Will, &format!("10.0.0.{}", n % 256)));
        }
        let all = store.recall_all(Isp::Gmail, AgentKind::Throttle);
        assert_eq!(all.len(), RING_CAP);
        // The first recorded conviction (ip .0) was evicted.
        assert_eq!(all[0].context.ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn recall_filters() {
        let store = ConvictionStore::new(None);
        store.record(conviction(Isp::Gmail, Verdict::Will, "1.1.1.1"));
        store.record(conviction(Isp::Gmail, Verdict::Wont, "2.2.2.2"));
        store.record(conviction(Isp::Yahoo, Verdict::Wont, "2.2.2.2"));

        assert_eq!(store.recall_all(Isp::Gmail, AgentKind::Throttle).len(), 2);
        assert_eq!(store.recall_by_verdict(Isp::Gmail, AgentKind::Throttle, Verdict::Wont).len(), 1);
        assert_eq!(store.recall_by_ip(Isp::Gmail, AgentKind::Throttle, "1.1.1.1").len(), 1);
        let recent = store.recall_recent(Isp::Gmail, AgentKind::Throttle, 1);
        assert_eq!(recent[0].context.ip.as_deref(), Some("2.2.2.2"));
    }

    #[test]
    fn similar_recall_ranks_and_floors() {
        let store = ConvictionStore::new(None);
        let near = MicroContext {
            domain: Some("gmail.com".into()),
            hour_utc: Some(14),
            day_of_week: Some("Tuesday".into()),
            attempted_rate: Some(1000.0),
            ..Default::default()
        };
        let far = MicroContext {
            domain: Some("yahoo.com".into()),
            hour_utc: Some(2),
            day_of_week: Some("Sunday".into()),
            attempted_rate: Some(10.0),
            ..Default::default()
        };
        store.record(Conviction::new(Isp::Gmail, AgentKind::Throttle, Verdict::Wont, "near", near.clone(), Utc::now()));
        store.record(Conviction::new(Isp::Gmail, AgentKind::Throttle, Verdict::Will, "far", far, Utc::now()));

        let hits = store.recall_similar(Isp::Gmail, AgentKind::Throttle, &near, 3);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.statement, "near");
        assert!((hits[0].1 - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn velocity_counts_recent_only() {
        let store = ConvictionStore::new(None);
        let now = Utc::now();
        for _ in 0..6 {
            store.record(conviction(Isp::Gmail, Verdict::Wont, "1.1.1.1"));
        }
        let stats = store.velocity_stats(Isp::Gmail, AgentKind::Throttle, now);
        assert_eq!(stats.per_minute_1m, 6.0);
        assert!((stats.per_minute_5m - 1.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn subscriber_receives_and_full_channel_drops() {
        let store = ConvictionStore::new(None);
        let mut rx = store.subscribe(1);
        store.record(conviction(Isp::Gmail, Verdict::Will, "1.1.1.1"));
        store.record(conviction(Isp::Gmail, Verdict::Will, "2.2.2.2"));

        // First is delivered, second was dropped on the full channel.
        let first = rx.recv().await.unwrap();
        assert_eq!(first.context.ip.as_deref(), Some("1.1.1.1"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn durable_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemoryStore::new(dir.path()).unwrap();
        let store = ConvictionStore::new(Some(memory.clone()));
        store.record(conviction(Isp::Gmail, Verdict::Wont, "9.9.9.9"));
        memory.flush().unwrap();

        let reloaded = ConvictionStore::new(Some(memory));
        assert_eq!(reloaded.load_from_memory(), 1);
        let all = reloaded.recall_all(Isp::Gmail, AgentKind::Throttle);
        assert_eq!(all[0].context.ip.as_deref(), Some("9.9.9.9"));
    }

    #[test]
    fn corrupt_lines_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemoryStore::new(dir.path()).unwrap();
        let key = MemoryStore::agent_key("gmail", "throttle", "convictions.jsonl");
        memory.append_line(&key, &serde_json::json!({"not": "a conviction"})).unwrap();
        memory.flush().unwrap();

        let store = ConvictionStore::new(Some(memory));
        assert_eq!(store.load_from_memory(), 0);
    }
}
