//! Per-ISP rolling window
//!
//! Counter streams are minute-bucketed: ingest is O(1), window queries are a
//! range sum over at most 25 h of buckets, pruning drops whole buckets.

use crate::snapshot::{IpMetric, SignalSnapshot, ip_score, rate};
use chrono::{DateTime, Duration, Utc};
use mailwarden_core::{AccountingRecord, Isp, RecordKind};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Events older than this are pruned from the counter streams.
const RETENTION: Duration = Duration::hours(25);
/// DSN samples older than this are pruned.
const DSN_RETENTION: Duration = Duration::minutes(10);
/// DSN sample ring capacity.
const DSN_RING_CAP: usize = 50;
/// Snapshot caps for recent DSN codes and diagnostics.
const DSN_REPORT_CAP: usize = 10;
/// Window for "recent" DSN codes in a snapshot.
const DSN_RECENT: Duration = Duration::minutes(5);

/// Minute-bucketed event counter.
#[derive(Debug, Default, Clone)]
struct CounterStream {
    buckets: BTreeMap<i64, u64>,
}

impl CounterStream {
    fn record(&mut self, at: DateTime<Utc>) {
        *self.buckets.entry(at.timestamp() / 60).or_insert(0) += 1;
    }

    /// Events in `(now − window, now]`, at minute-bucket granularity.
    fn count_in(&self, now: DateTime<Utc>, window: Duration) -> u64 {
        let from = (now - window).timestamp() / 60;
        self.buckets.range(from..).map(|(_, n)| n).sum()
    }

    fn prune(&mut self, cutoff: DateTime<Utc>) {
        let keep_from = cutoff.timestamp() / 60;
        self.buckets = self.buckets.split_off(&keep_from);
    }

    fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
struct LevelCounters {
    sent: CounterStream,
    bounced: CounterStream,
    deferred: CounterStream,
    complaints: CounterStream,
}

impl LevelCounters {
    fn ingest(&mut self, record: &AccountingRecord) {
        match record.kind {
            RecordKind::Delivery => self.sent.record(record.timestamp),
            RecordKind::Bounce => {
                self.sent.record(record.timestamp);
                self.bounced.record(record.timestamp);
            }
            RecordKind::Transient | RecordKind::TransientQueued => {
                self.deferred.record(record.timestamp)
            }
            RecordKind::Feedback => self.complaints.record(record.timestamp),
        }
    }

    fn prune(&mut self, cutoff: DateTime<Utc>) {
        self.sent.prune(cutoff);
        self.bounced.prune(cutoff);
        self.deferred.prune(cutoff);
        self.complaints.prune(cutoff);
    }

    fn is_empty(&self) -> bool {
        self.sent.is_empty()
            && self.bounced.is_empty()
            && self.deferred.is_empty()
            && self.complaints.is_empty()
    }
}

#[derive(Debug, Clone)]
struct DsnSample {
    code: String,
    diag: String,
    at: DateTime<Utc>,
}

/// One ISP's window: global counters, per-IP and per-domain sub-counters and
/// a DSN sample ring. Mutated only by the signal processor under its lock.
#[derive(Debug, Default)]
pub struct IspWindow {
    global: LevelCounters,
    per_ip: HashMap<String, LevelCounters>,
    per_domain: HashMap<String, LevelCounters>,
    dsn_samples: VecDeque<DsnSample>,
}

impl IspWindow {
    /// O(1) append of one record to the three counter levels.
    pub fn ingest(&mut self, record: &AccountingRecord) {
        self.global.ingest(record);
        if !record.source_ip.is_empty() {
            self.per_ip.entry(record.source_ip.clone()).or_default().ingest(record);
        }
        if !record.domain.is_empty() {
            self.per_domain.entry(record.domain.clone()).or_default().ingest(record);
        }

        let has_dsn = !record.dsn_code.is_empty();
        let is_failure = matches!(
            record.kind,
            RecordKind::Bounce | RecordKind::Transient | RecordKind::TransientQueued
        );
        if has_dsn && is_failure {
            if self.dsn_samples.len() >= DSN_RING_CAP {
                self.dsn_samples.pop_front();
            }
            self.dsn_samples.push_back(DsnSample {
                code: record.dsn_code.clone(),
                diag: record.dsn_diag.clone(),
                at: record.timestamp,
            });
        }
    }

    /// Full snapshot: rates, counts, per-IP metrics, recent DSN samples.
    pub fn snapshot(&self, isp: Isp, now: DateTime<Utc>) -> SignalSnapshot {
        let mut snapshot = self.rates_snapshot(isp, now);

        let hour = Duration::hours(1);
        let day = Duration::hours(24);
        let five_min = Duration::minutes(5);

        let mut ip_metrics: Vec<IpMetric> = self
            .per_ip
            .iter()
            .filter_map(|(ip, counters)| {
                let sent_1h = counters.sent.count_in(now, hour);
                if sent_1h == 0 {
                    return None;
                }
                let bounced_1h = counters.bounced.count_in(now, hour);
                let bounce_rate_1h = rate(bounced_1h, sent_1h);
                let complaint_rate_24h =
                    rate(counters.complaints.count_in(now, day), counters.sent.count_in(now, day));
                let deferral_rate_5m = rate(
                    counters.deferred.count_in(now, five_min),
                    counters.sent.count_in(now, five_min),
                );
                Some(IpMetric {
                    ip: ip.clone(),
                    bounce_rate_1h,
                    complaint_rate_24h,
                    deferral_rate_5m,
                    sent_1h,
                    accepted_1h: sent_1h - bounced_1h,
                    score: ip_score(bounce_rate_1h, complaint_rate_24h, deferral_rate_5m),
                })
            })
            .collect();
        ip_metrics.sort_by(|a, b| a.ip.cmp(&b.ip));
        snapshot.ip_metrics = ip_metrics;

        let recent_cutoff = now - DSN_RECENT;
        let mut codes: Vec<String> = Vec::new();
        let mut diags: Vec<String> = Vec::new();
        for sample in self.dsn_samples.iter().rev() {
            if sample.at < recent_cutoff {
                continue;
            }
            if codes.len() < DSN_REPORT_CAP && !codes.contains(&sample.code) {
                codes.push(sample.code.clone());
            }
            if diags.len() < DSN_REPORT_CAP
                && !sample.diag.is_empty()
                && !diags.contains(&sample.diag)
            {
                diags.push(sample.diag.clone());
            }
        }
        snapshot.recent_dsn_codes = codes;
        snapshot.recent_dsn_diags = diags;

        snapshot
    }

    /// Partial snapshot: rates and counts only, for on-demand reads.
    pub fn rates_snapshot(&self, isp: Isp, now: DateTime<Utc>) -> SignalSnapshot {
        let minute = Duration::minutes(1);
        let five_min = Duration::minutes(5);
        let hour = Duration::hours(1);
        let day = Duration::hours(24);

        let sent_1m = self.global.sent.count_in(now, minute);
        let sent_5m = self.global.sent.count_in(now, five_min);
        let sent_1h = self.global.sent.count_in(now, hour);
        let sent_24h = self.global.sent.count_in(now, day);
        let bounced_1h = self.global.bounced.count_in(now, hour);
        let deferred_5m = self.global.deferred.count_in(now, five_min);
        let complaints_1h = self.global.complaints.count_in(now, hour);

        let mut snapshot = SignalSnapshot::empty(isp, now);
        snapshot.bounce_rate_1m = rate(self.global.bounced.count_in(now, minute), sent_1m);
        snapshot.bounce_rate_5m = rate(self.global.bounced.count_in(now, five_min), sent_5m);
        snapshot.bounce_rate_1h = rate(bounced_1h, sent_1h);
        snapshot.complaint_rate_1h = rate(complaints_1h, sent_1h);
        snapshot.complaint_rate_24h = rate(self.global.complaints.count_in(now, day), sent_24h);
        snapshot.deferral_rate_5m = rate(deferred_5m, sent_5m);
        snapshot.deferral_rate_1h = rate(self.global.deferred.count_in(now, hour), sent_1h);
        snapshot.sent_1m = sent_1m;
        snapshot.sent_5m = sent_5m;
        snapshot.sent_1h = sent_1h;
        snapshot.sent_24h = sent_24h;
        snapshot.bounced_1h = bounced_1h;
        snapshot.deferred_5m = deferred_5m;
        snapshot.complaints_1h = complaints_1h;
        snapshot.accepted_1h = sent_1h - bounced_1h;
        snapshot
    }

    /// Drop counter buckets older than 25 h and DSN samples older than 10 m.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - RETENTION;
        self.global.prune(cutoff);
        self.per_ip.retain(|_, counters| {
            counters.prune(cutoff);
            !counters.is_empty()
        });
        self.per_domain.retain(|_, counters| {
            counters.prune(cutoff);
            !counters.is_empty()
        });
        let dsn_cutoff = now - DSN_RETENTION;
        self.dsn_samples.retain(|sample| sample.at >= dsn_cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(kind: RecordKind, ip: &str, at: DateTime<Utc>) -> AccountingRecord {
        AccountingRecord {
            kind,
            recipient: "user@gmail.com".into(),
            sender: String::new(),
            source_ip: ip.into(),
            vmta: "v1".into(),
            pool: String::new(),
            domain: "gmail.com".into(),
            bounce_category: String::new(),
            dsn_code: if kind == RecordKind::Bounce { "5.1.1".into() } else { String::new() },
            dsn_diag: String::new(),
            feedback_type: String::new(),
            job_id: String::new(),
            size: 0,
            timestamp: at,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn bounce_counts_toward_sent_and_bounced() {
        let mut window = IspWindow::default();
        let at = now();
        for _ in 0..100 {
            window.ingest(&record(RecordKind::Delivery, "1.2.3.4", at));
        }
        for _ in 0..30 {
            window.ingest(&record(RecordKind::Bounce, "1.2.3.4", at));
        }

        let snapshot = window.snapshot(Isp::Yahoo, at);
        assert_eq!(snapshot.sent_1h, 130);
        assert_eq!(snapshot.bounced_1h, 30);
        assert_eq!(snapshot.accepted_1h, 100);
        assert!((snapshot.bounce_rate_5m - 30.0 / 130.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn deferrals_do_not_count_toward_sent() {
        let mut window = IspWindow::default();
        let at = now();
        for _ in 0..50 {
            window.ingest(&record(RecordKind::Delivery, "1.2.3.4", at));
        }
        for _ in 0..10 {
            window.ingest(&record(RecordKind::Transient, "1.2.3.4", at));
        }
        let snapshot = window.snapshot(Isp::Gmail, at);
        assert_eq!(snapshot.sent_5m, 50);
        assert_eq!(snapshot.deferred_5m, 10);
        assert_eq!(snapshot.deferral_rate_5m, 20.0);
    }

    #[test]
    fn ips_without_sent_are_absent() {
        let mut window = IspWindow::default();
        let at = now();
        window.ingest(&record(RecordKind::Delivery, "1.1.1.1", at));
        window.ingest(&record(RecordKind::Transient, "2.2.2.2", at));

        let snapshot = window.snapshot(Isp::Gmail, at);
        assert!(snapshot.ip_metric("1.1.1.1").is_some());
        assert!(snapshot.ip_metric("2.2.2.2").is_none());
    }

    #[test]
    fn bounce_storm_scores_ip() {
        let mut window = IspWindow::default();
        let at = now();
        for _ in 0..1000 {
            window.ingest(&record(RecordKind::Delivery, "1.2.3.4", at));
        }
        for _ in 0..40 {
            window.ingest(&record(RecordKind::Bounce, "1.2.3.4", at));
        }

        let snapshot = window.snapshot(Isp::Gmail, at);
        let metric = snapshot.ip_metric("1.2.3.4").unwrap();
        assert_eq!(metric.sent_1h, 1040);
        assert!((metric.bounce_rate_1h - 40.0 / 1040.0 * 100.0).abs() < 1e-9);
        assert!(metric.bounce_rate_1h > 3.0);
        assert!((metric.score - (100.0 - 10.0 * metric.bounce_rate_1h)).abs() < 1e-9);
    }

    #[test]
    fn rate_monotone_in_numerator() {
        let mut window = IspWindow::default();
        let at = now();
        for _ in 0..100 {
            window.ingest(&record(RecordKind::Delivery, "1.2.3.4", at));
        }
        let before = window.snapshot(Isp::Gmail, at).bounce_rate_1h;
        // Each added bounce also raises sent, but the rate still rises.
        let mut last = before;
        for _ in 0..5 {
            window.ingest(&record(RecordKind::Bounce, "1.2.3.4", at));
            let current = window.snapshot(Isp::Gmail, at).bounce_rate_1h;
            assert!(current > last);
            last = current;
        }
    }

    #[test]
    fn prune_drops_old_events_and_samples() {
        let mut window = IspWindow::default();
        let old = now() - Duration::hours(26);
        let recent = now();
        window.ingest(&record(RecordKind::Bounce, "1.2.3.4", old));
        window.ingest(&record(RecordKind::Delivery, "1.2.3.4", recent));

        window.prune(recent);
        let snapshot = window.snapshot(Isp::Gmail, recent);
        assert_eq!(snapshot.sent_24h, 1);
        assert_eq!(snapshot.bounced_1h, 0);
        // The 26-hour-old DSN sample is gone too.
        assert!(snapshot.recent_dsn_codes.is_empty());
    }

    #[test]
    fn dsn_codes_recent_and_deduplicated() {
        let mut window = IspWindow::default();
        let at = now();
        for _ in 0..5 {
            window.ingest(&record(RecordKind::Bounce, "1.2.3.4", at));
        }
        let mut stale = record(RecordKind::Bounce, "1.2.3.4", at - Duration::minutes(7));
        stale.dsn_code = "4.2.2".into();
        window.ingest(&stale);

        let snapshot = window.snapshot(Isp::Gmail, at);
        // Five identical codes dedup to one; the 7-minute-old code is not recent.
        assert_eq!(snapshot.recent_dsn_codes, vec!["5.1.1".to_string()]);
    }

    #[test]
    fn dsn_ring_is_bounded() {
        let mut window = IspWindow::default();
        let at = now();
        for n in 0..60 {
            let mut r = record(RecordKind::Bounce, "1.2.3.4", at);
            r.dsn_code = format!("5.1.{}", n);
            window.ingest(&r);
        }
        assert_eq!(window.dsn_samples.len(), DSN_RING_CAP);
        assert_eq!(window.dsn_samples.front().unwrap().code, "5.1.10");
    }
}
