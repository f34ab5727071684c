//! Recall synthesis
//!
//! Turns a similarity-scored recall result set into a compact summary the
//! throttle agent can fold into its next conviction statement.

use crate::model::{Conviction, Verdict};
use std::collections::HashMap;

/// UTC hour buckets used for frequency reporting.
fn hour_bucket(hour: u32) -> &'static str {
    match hour {
        6..=11 => "morning",
        12..=17 => "afternoon",
        18..=23 => "evening",
        _ => "night",
    }
}

/// Summary of a recall result set.
#[derive(Debug, Clone, PartialEq)]
pub struct RecallSummary {
    pub observations: usize,
    pub dominant_verdict: Verdict,
    /// `min(verdict_ratio × avg_similarity × 1.2, 1.0)`
    pub confidence: f64,
    /// Min/max attempted rate across observations carrying one.
    pub rate_range: Option<(f64, f64)>,
    /// Average recovery minutes across observations carrying one.
    pub avg_recovery_min: Option<f64>,
    /// Up to five most frequent DSN codes.
    pub top_dsn_codes: Vec<(String, usize)>,
    /// Day-of-week observation counts.
    pub day_frequencies: Vec<(String, usize)>,
    /// Hour-bucket counts; only buckets with at least two observations.
    pub hour_bucket_frequencies: Vec<(String, usize)>,
}

impl RecallSummary {
    /// One-line rendering embedded into conviction statements as prior
    /// wisdom.
    pub fn render(&self) -> String {
        let verdict = match self.dominant_verdict {
            Verdict::Will => "WILL",
            Verdict::Wont => "WONT",
        };
        let mut parts = vec![format!(
            "{} prior observations lean {} (confidence {:.2})",
            self.observations, verdict, self.confidence
        )];
        if let Some((low, high)) = self.rate_range {
            parts.push(format!("rates {:.0}-{:.0}/h", low, high));
        }
        if let Some(minutes) = self.avg_recovery_min {
            parts.push(format!("avg recovery {:.0} min", minutes));
        }
        if !self.top_dsn_codes.is_empty() {
            let codes: Vec<&str> = self.top_dsn_codes.iter().map(|(c, _)| c.as_str()).collect();
            parts.push(format!("dsn {}", codes.join(",")));
        }
        parts.join("; ")
    }
}

/// Synthesize a summary from `(conviction, similarity)` pairs. `None` when
/// the result set is empty.
pub fn synthesize(results: &[(Conviction, f64)]) -> Option<RecallSummary> {
    if results.is_empty() {
        return None;
    }

    let total = results.len();
    let wont = results.iter().filter(|(c, _)| c.verdict == Verdict::Wont).count();
    let will = total - wont;
    let (dominant_verdict, dominant_count) =
        if wont >= will { (Verdict::Wont, wont) } else { (Verdict::Will, will) };

    let verdict_ratio = dominant_count as f64 / total as f64;
    let avg_similarity = results.iter().map(|(_, s)| s).sum::<f64>() / total as f64;
    let confidence = (verdict_ratio * avg_similarity * 1.2).min(1.0);

    let rates: Vec<f64> = results.iter().filter_map(|(c, _)| c.context.attempted_rate).collect();
    let rate_range = if rates.is_empty() {
        None
    } else {
        let low = rates.iter().cloned().fold(f64::INFINITY, f64::min);
        let high = rates.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Some((low, high))
    };

    let recoveries: Vec<f64> =
        results.iter().filter_map(|(c, _)| c.context.recovery_time_min).collect();
    let avg_recovery_min = if recoveries.is_empty() {
        None
    } else {
        Some(recoveries.iter().sum::<f64>() / recoveries.len() as f64)
    };

    let mut dsn_counts: HashMap<&str, usize> = HashMap::new();
    for (conviction, _) in results {
        for code in &conviction.context.dsn_codes {
            *dsn_counts.entry(code.as_str()).or_default() += 1;
        }
    }
    let mut top_dsn_codes: Vec<(String, usize)> =
        dsn_counts.into_iter().map(|(code, n)| (code.to_string(), n)).collect();
    top_dsn_codes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_dsn_codes.truncate(5);

    let mut day_counts: HashMap<&str, usize> = HashMap::new();
    let mut bucket_counts: HashMap<&'static str, usize> = HashMap::new();
    for (conviction, _) in results {
        if let Some(day) = &conviction.context.day_of_week {
            *day_counts.entry(day.as_str()).or_default() += 1;
        }
        if let Some(hour) = conviction.context.hour_utc {
            *bucket_counts.entry(hour_bucket(hour)).or_default() += 1;
        }
    }
    let mut day_frequencies: Vec<(String, usize)> =
        day_counts.into_iter().map(|(d, n)| (d.to_string(), n)).collect();
    day_frequencies.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut hour_bucket_frequencies: Vec<(String, usize)> = bucket_counts
        .into_iter()
        .filter(|(_, n)| *n >= 2)
        .map(|(b, n)| (b.to_string(), n))
        .collect();
    hour_bucket_frequencies.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    Some(RecallSummary {
        observations: total,
        dominant_verdict,
        confidence,
        rate_range,
        avg_recovery_min,
        top_dsn_codes,
        day_frequencies,
        hour_bucket_frequencies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MicroContext;
    use chrono::Utc;
    use mailwarden_core::{AgentKind, Isp};

    fn conviction(verdict: Verdict, hour: u32, rate: f64) -> Conviction {
        Conviction::new(
            Isp::Gmail,
            AgentKind::Throttle,
            verdict,
            "observed",
            MicroContext {
                hour_utc: Some(hour),
                day_of_week: Some("Tuesday".into()),
                attempted_rate: Some(rate),
                dsn_codes: vec!["421-4.7.28".into()],
                ..Default::default()
            },
            Utc::now(),
        )
    }

    #[test]
    fn empty_results_yield_none() {
        assert!(synthesize(&[]).is_none());
    }

    #[test]
    fn unanimous_wont_is_high_confidence() {
        let results = vec![
            (conviction(Verdict::Wont, 14, 1000.0), 0.9),
            (conviction(Verdict::Wont, 14, 950.0), 0.85),
            (conviction(Verdict::Wont, 15, 1100.0), 0.88),
        ];
        let summary = synthesize(&results).unwrap();
        assert_eq!(summary.dominant_verdict, Verdict::Wont);
        assert!(summary.confidence > 0.95);
        assert_eq!(summary.rate_range, Some((950.0, 1100.0)));
        assert_eq!(summary.top_dsn_codes[0].0, "421-4.7.28");
        // Three observations in the afternoon bucket.
        assert_eq!(summary.hour_bucket_frequencies, vec![("afternoon".to_string(), 3)]);
    }

    #[test]
    fn single_observation_buckets_are_suppressed() {
        let results = vec![(conviction(Verdict::Will, 3, 500.0), 0.5)];
        let summary = synthesize(&results).unwrap();
        assert!(summary.hour_bucket_frequencies.is_empty());
        assert_eq!(summary.day_frequencies, vec![("Tuesday".to_string(), 1)]);
    }

    #[test]
    fn confidence_caps_at_one() {
        let results = vec![(conviction(Verdict::Will, 10, 100.0), 1.0); 4];
        let summary = synthesize(&results).unwrap();
        assert_eq!(summary.confidence, 1.0);
    }

    #[test]
    fn render_mentions_verdict_and_rates() {
        let results = vec![
            (conviction(Verdict::Wont, 14, 900.0), 0.9),
            (conviction(Verdict::Wont, 13, 1000.0), 0.9),
        ];
        let rendered = synthesize(&results).unwrap().render();
        assert!(rendered.contains("WONT"));
        assert!(rendered.contains("900-1000"));
    }
}
