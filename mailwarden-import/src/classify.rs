//! File classification
//!
//! Keyword scan over the object name first, then the header row. Match
//! ordering is suppression → warmup → mailable, and a handful of header
//! terms force suppression regardless of the file name. Default is mailable.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Suppression,
    Warmup,
    Mailable,
}

impl Classification {
    /// Pascal-case form used in `processed/` object names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Suppression => "Suppression",
            Classification::Warmup => "Warmup",
            Classification::Mailable => "Mailable",
        }
    }
}

const SUPPRESSION_KEYWORDS: &[&str] = &[
    "suppress",
    "unsub",
    "bounce",
    "complain",
    "blacklist",
    "blocklist",
    "optout",
    "opt-out",
    "remove",
    "donotmail",
];

const WARMUP_KEYWORDS: &[&str] = &["warmup", "warm-up", "warm_up", "warming", "seedlist"];

/// Header columns that force suppression classification.
const FORCING_HEADERS: &[&str] = &["suppress_reason", "bounce_type"];

fn keyword_match(text: &str) -> Option<Classification> {
    if SUPPRESSION_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return Some(Classification::Suppression);
    }
    if WARMUP_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return Some(Classification::Warmup);
    }
    None
}

/// Classify a CSV drop from its object key and header cells.
pub fn classify(key: &str, header: &[String]) -> Classification {
    let lowered: Vec<String> = header.iter().map(|h| h.trim().to_ascii_lowercase()).collect();
    if lowered.iter().any(|h| FORCING_HEADERS.contains(&h.as_str())) {
        return Classification::Suppression;
    }

    let name = key.rsplit('/').next().unwrap_or(key).to_ascii_lowercase();
    if let Some(class) = keyword_match(&name) {
        return class;
    }
    if let Some(class) = keyword_match(&lowered.join(",")) {
        return class;
    }
    Classification::Mailable
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn filename_keywords_win_first() {
        assert_eq!(classify("drops/q2_unsubscribes.csv", &header(&["email"])), Classification::Suppression);
        assert_eq!(classify("drops/warmup_seeds.csv", &header(&["email"])), Classification::Warmup);
        assert_eq!(classify("drops/spring_list.csv", &header(&["email"])), Classification::Mailable);
    }

    #[test]
    fn forcing_headers_override_filename() {
        assert_eq!(
            classify("drops/spring_list.csv", &header(&["email", "suppress_reason"])),
            Classification::Suppression
        );
        assert_eq!(
            classify("drops/warmup_seeds.csv", &header(&["email", "Bounce_Type"])),
            Classification::Suppression
        );
    }

    #[test]
    fn suppression_beats_warmup_in_ordering() {
        // Name carries both kinds of keywords; suppression is checked first.
        assert_eq!(
            classify("drops/warmup_bounces.csv", &header(&["email"])),
            Classification::Suppression
        );
    }

    #[test]
    fn header_keywords_apply_when_name_is_neutral() {
        assert_eq!(
            classify("drops/list1.csv", &header(&["email", "complaint_date"])),
            Classification::Suppression
        );
    }
}
