//! Similarity recall and synthesis over seeded throttle history.

use chrono::{TimeZone, Utc};
use mailwarden_conviction::{
    Conviction, ConvictionStore, MicroContext, Verdict, context_similarity, synthesize,
};
use mailwarden_core::{AgentKind, Isp};

fn tuesday_afternoon_context(rate: f64) -> MicroContext {
    MicroContext {
        domain: Some("gmail.com".to_string()),
        day_of_week: Some("Tuesday".to_string()),
        hour_utc: Some(14),
        attempted_rate: Some(rate),
        dsn_codes: vec!["421-4.7.28".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn prior_wont_history_dominates_recall() {
    let store = ConvictionStore::new(None);
    let seeded_at = Utc.with_ymd_and_hms(2026, 6, 2, 14, 0, 0).unwrap();
    for n in 0..3 {
        store.record(Conviction::new(
            Isp::Gmail,
            AgentKind::Throttle,
            Verdict::Wont,
            format!("deferral wall at attempt {}", n),
            tuesday_afternoon_context(1000.0),
            seeded_at,
        ));
    }

    let query = tuesday_afternoon_context(950.0);
    let hits = store.recall_similar(Isp::Gmail, AgentKind::Throttle, &query, 3);
    assert_eq!(hits.len(), 3);
    for (_, similarity) in &hits {
        assert!(*similarity >= 0.8, "similarity {} below 0.8", similarity);
    }

    let summary = synthesize(&hits).unwrap();
    assert_eq!(summary.dominant_verdict, Verdict::Wont);
    assert!(summary.confidence > 0.95, "confidence {}", summary.confidence);
    assert_eq!(summary.rate_range, Some((1000.0, 1000.0)));
    assert_eq!(summary.top_dsn_codes[0].0, "421-4.7.28");
    assert_eq!(summary.hour_bucket_frequencies, vec![("afternoon".to_string(), 3)]);

    // Identity similarity holds for the seeded context itself.
    let ctx = tuesday_afternoon_context(1000.0);
    assert!((context_similarity(&ctx, &ctx) - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn dissimilar_history_is_filtered_out() {
    let store = ConvictionStore::new(None);
    store.record(Conviction::new(
        Isp::Gmail,
        AgentKind::Throttle,
        Verdict::Will,
        "quiet sunday night",
        MicroContext {
            domain: Some("yahoo.com".to_string()),
            day_of_week: Some("Sunday".to_string()),
            hour_utc: Some(3),
            attempted_rate: Some(10.0),
            ..Default::default()
        },
        Utc::now(),
    ));

    let hits =
        store.recall_similar(Isp::Gmail, AgentKind::Throttle, &tuesday_afternoon_context(950.0), 3);
    assert!(hits.is_empty());
    assert!(synthesize(&hits).is_none());
}
