//! Context similarity scoring
//!
//! Pure functions over immutable contexts. Each field contributes only when
//! present in both the query and the candidate; contributions accumulate into
//! a running maximum so the final score is normalized to [0, 1] and a context
//! is always fully similar to itself.

use crate::model::MicroContext;

/// Named weight set for the similarity scoring. Kept as one constant block so
/// the scoring can be tuned and unit-tested without touching the algorithm.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityWeights {
    pub domain: f64,
    pub day_of_week: f64,
    pub hour_close: f64,
    pub hour_near: f64,
    pub hour_far: f64,
    pub holiday_same_name: f64,
    pub holiday_different_name: f64,
    pub holiday_boolean: f64,
    pub ip: f64,
    pub rate_tight: f64,
    pub rate_loose: f64,
    pub volume_tight: f64,
    pub volume_loose: f64,
    pub dsn_family: f64,
}

pub const WEIGHTS: SimilarityWeights = SimilarityWeights {
    domain: 2.0,
    day_of_week: 1.5,
    hour_close: 2.0,
    hour_near: 1.0,
    hour_far: 0.5,
    holiday_same_name: 3.0,
    holiday_different_name: 1.5,
    holiday_boolean: 1.0,
    ip: 1.5,
    rate_tight: 2.0,
    rate_loose: 1.0,
    volume_tight: 1.0,
    volume_loose: 0.5,
    dsn_family: 1.5,
};

/// DSN family: class digit plus the first subject segment of the enhanced
/// status code. `"421-4.7.28"` and `"451 4.7.1"` share family `"4.7"`.
pub fn dsn_family(code: &str) -> Option<String> {
    code.split(|c: char| c.is_whitespace() || c == '-')
        .filter(|token| !token.is_empty())
        .find_map(|token| {
            let segments: Vec<&str> = token.split('.').collect();
            if segments.len() >= 2
                && segments[..2].iter().all(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
            {
                Some(format!("{}.{}", segments[0], segments[1]))
            } else {
                None
            }
        })
}

fn families(codes: &[String]) -> Vec<String> {
    let mut out: Vec<String> = codes.iter().filter_map(|c| dsn_family(c)).collect();
    out.sort();
    out.dedup();
    out
}

/// Similarity of two contexts in [0, 1]. Zero when no field is comparable.
pub fn context_similarity(query: &MicroContext, candidate: &MicroContext) -> f64 {
    let w = WEIGHTS;
    let mut score = 0.0;
    let mut max_score = 0.0;

    if let (Some(a), Some(b)) = (&query.domain, &candidate.domain) {
        max_score += w.domain;
        if a.eq_ignore_ascii_case(b) {
            score += w.domain;
        }
    }

    if let (Some(a), Some(b)) = (&query.day_of_week, &candidate.day_of_week) {
        max_score += w.day_of_week;
        if a == b {
            score += w.day_of_week;
        }
    }

    if let (Some(a), Some(b)) = (query.hour_utc, candidate.hour_utc) {
        max_score += w.hour_close;
        let diff = a.abs_diff(b);
        let wrapped = diff.min(24 - diff);
        score += match wrapped {
            0..=1 => w.hour_close,
            2..=3 => w.hour_near,
            4..=5 => w.hour_far,
            _ => 0.0,
        };
    }

    if let (Some(a), Some(b)) = (query.is_holiday, candidate.is_holiday) {
        if a && b {
            match (&query.holiday_name, &candidate.holiday_name) {
                (Some(name_a), Some(name_b)) => {
                    max_score += w.holiday_same_name;
                    score += if name_a == name_b {
                        w.holiday_same_name
                    } else {
                        w.holiday_different_name
                    };
                }
                _ => {
                    max_score += w.holiday_boolean;
                    score += w.holiday_boolean;
                }
            }
        } else {
            max_score += w.holiday_boolean;
            if a == b {
                score += w.holiday_boolean;
            }
        }
    }

    if let (Some(a), Some(b)) = (&query.ip, &candidate.ip) {
        max_score += w.ip;
        if a == b {
            score += w.ip;
        }
    }

    if let (Some(a), Some(b)) = (query.attempted_rate, candidate.attempted_rate) {
        if a > 0.0 && b > 0.0 {
            max_score += w.rate_tight;
            let ratio = a.min(b) / a.max(b);
            if ratio > 0.8 {
                score += w.rate_tight;
            } else if ratio > 0.5 {
                score += w.rate_loose;
            }
        }
    }

    if let (Some(a), Some(b)) = (query.attempted_volume, candidate.attempted_volume) {
        if a > 0 && b > 0 {
            max_score += w.volume_tight;
            let ratio = a.min(b) as f64 / a.max(b) as f64;
            if ratio > 0.7 {
                score += w.volume_tight;
            } else if ratio > 0.4 {
                score += w.volume_loose;
            }
        }
    }

    let query_families = families(&query.dsn_codes);
    let candidate_families = families(&candidate.dsn_codes);
    if !query_families.is_empty() && !candidate_families.is_empty() {
        max_score += w.dsn_family;
        if query_families.iter().any(|f| candidate_families.contains(f)) {
            score += w.dsn_family;
        }
    }

    if max_score == 0.0 { 0.0 } else { score / max_score }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gmail_tuesday_context() -> MicroContext {
        MicroContext {
            domain: Some("gmail.com".into()),
            day_of_week: Some("Tuesday".into()),
            hour_utc: Some(14),
            is_holiday: Some(false),
            ip: Some("1.2.3.4".into()),
            attempted_rate: Some(1000.0),
            attempted_volume: Some(50_000),
            dsn_codes: vec!["421-4.7.28".into()],
            ..Default::default()
        }
    }

    #[test]
    fn dsn_family_extraction() {
        assert_eq!(dsn_family("421-4.7.28").as_deref(), Some("4.7"));
        assert_eq!(dsn_family("451 4.7.1").as_deref(), Some("4.7"));
        assert_eq!(dsn_family("550 5.1.1").as_deref(), Some("5.1"));
        assert_eq!(dsn_family("not a code"), None);
    }

    #[test]
    fn self_similarity_is_one() {
        let ctx = gmail_tuesday_context();
        assert!((context_similarity(&ctx, &ctx) - 1.0).abs() < f64::EPSILON);

        // Holds with holidays set, too.
        let holiday = MicroContext {
            is_holiday: Some(true),
            holiday_name: Some("Black Friday".into()),
            ..gmail_tuesday_context()
        };
        assert!((context_similarity(&holiday, &holiday) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_contexts_score_zero() {
        let empty = MicroContext::default();
        assert_eq!(context_similarity(&empty, &empty), 0.0);
    }

    #[test]
    fn close_contexts_score_high() {
        let query = gmail_tuesday_context();
        let candidate = MicroContext {
            attempted_rate: Some(950.0),
            ip: None,
            ..gmail_tuesday_context()
        };
        let similarity = context_similarity(&query, &candidate);
        assert!(similarity >= 0.8, "similarity {} below expectation", similarity);
    }

    #[test]
    fn hour_proximity_wraps_midnight() {
        let late = MicroContext { hour_utc: Some(23), ..Default::default() };
        let early = MicroContext { hour_utc: Some(1), ..Default::default() };
        // 23 → 01 is two hours apart across midnight.
        assert_eq!(context_similarity(&late, &early), WEIGHTS.hour_near / WEIGHTS.hour_close);
    }

    #[test]
    fn rate_ratio_tiers() {
        let a = MicroContext { attempted_rate: Some(1000.0), ..Default::default() };
        let close = MicroContext { attempted_rate: Some(850.0), ..Default::default() };
        let loose = MicroContext { attempted_rate: Some(600.0), ..Default::default() };
        let far = MicroContext { attempted_rate: Some(100.0), ..Default::default() };

        assert_eq!(context_similarity(&a, &close), 1.0);
        assert_eq!(context_similarity(&a, &loose), WEIGHTS.rate_loose / WEIGHTS.rate_tight);
        assert_eq!(context_similarity(&a, &far), 0.0);
    }

    #[test]
    fn holiday_name_mismatch_scores_half() {
        let friday = MicroContext {
            is_holiday: Some(true),
            holiday_name: Some("Black Friday".into()),
            ..Default::default()
        };
        let monday = MicroContext {
            is_holiday: Some(true),
            holiday_name: Some("Cyber Monday".into()),
            ..Default::default()
        };
        assert_eq!(
            context_similarity(&friday, &monday),
            WEIGHTS.holiday_different_name / WEIGHTS.holiday_same_name
        );
    }
}
