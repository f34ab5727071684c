//! Per-field normalization rules

use crate::columns::{ColumnMap, looks_like_email};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Verified,
    Risky,
    Invalid,
    Unknown,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Verified => "verified",
            VerificationStatus::Risky => "risky",
            VerificationStatus::Invalid => "invalid",
            VerificationStatus::Unknown => "unknown",
        }
    }
}

/// Consumer domain clusters recognized by the normalizer. The empty variant
/// is a domain outside every known cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainGroup {
    Google,
    Microsoft,
    Yahoo,
    Apple,
    Att,
    Comcast,
    Verizon,
    Charter,
    None,
    Other,
}

impl DomainGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainGroup::Google => "google",
            DomainGroup::Microsoft => "microsoft",
            DomainGroup::Yahoo => "yahoo",
            DomainGroup::Apple => "apple",
            DomainGroup::Att => "att",
            DomainGroup::Comcast => "comcast",
            DomainGroup::Verizon => "verizon",
            DomainGroup::Charter => "charter",
            DomainGroup::None => "",
            DomainGroup::Other => "other",
        }
    }
}

/// One normalized import row, discarded after the upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub zip: String,
    pub phone: String,
    pub verification_status: VerificationStatus,
    pub domain_group: DomainGroup,
    pub quality_score: f64,
    pub is_role: bool,
    pub is_disposable: bool,
    pub is_bot: bool,
    pub engagement_behavior: String,
    pub bounce_category: String,
    pub dsn_code: String,
    pub reason: String,
    pub extras: Map<String, Value>,
}

/// Lowercase, trim, and strip outer quotes/angle brackets.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '<' || c == '>')
        .trim()
        .to_ascii_lowercase();
    looks_like_email(&email).then_some(email)
}

/// Title Case for personal names, per whitespace- or hyphen-separated part.
pub fn title_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut start_of_word = true;
    for c in raw.trim().chars() {
        if c.is_whitespace() || c == '-' || c == '\'' {
            start_of_word = true;
            out.push(c);
        } else if start_of_word {
            out.extend(c.to_uppercase());
            start_of_word = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// Country name to ISO-2; two-letter inputs pass through uppercased.
pub fn normalize_country(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return trimmed.to_ascii_uppercase();
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "united states" | "united states of america" | "usa" | "u.s." | "u.s.a." | "america" => "US",
        "canada" => "CA",
        "united kingdom" | "great britain" | "england" => "GB",
        "australia" => "AU",
        "germany" => "DE",
        "france" => "FR",
        "spain" => "ES",
        "italy" => "IT",
        "mexico" => "MX",
        "brazil" => "BR",
        "india" => "IN",
        "netherlands" => "NL",
        "" => "",
        _ => "",
    }
    .to_string()
}

/// Strip the float artifact some exports leave on zip codes.
pub fn normalize_zip(raw: &str) -> String {
    raw.trim().trim_end_matches(".0").to_string()
}

/// Keep a leading `+` and digits only.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    for (index, c) in trimmed.chars().enumerate() {
        if c == '+' && index == 0 {
            out.push(c);
        } else if c.is_ascii_digit() {
            out.push(c);
        }
    }
    out
}

/// Vendor verification codes to the canonical four states.
pub fn normalize_verification(raw: &str) -> VerificationStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "deliverable" | "valid" | "verified" | "ok" | "good" => VerificationStatus::Verified,
        "2" | "risky" | "catch_all" | "catchall" | "catch-all" | "accept_all" | "unknown_risk"
        | "role_based" => VerificationStatus::Risky,
        "3" | "invalid" | "undeliverable" | "bad" | "rejected" | "disposable" => {
            VerificationStatus::Invalid
        }
        _ => VerificationStatus::Unknown,
    }
}

/// Vendor domain-group strings, or inference from the email's domain.
pub fn normalize_domain_group(raw: &str, email: &str) -> DomainGroup {
    match raw.trim().to_ascii_lowercase().as_str() {
        "google" | "gmail" => return DomainGroup::Google,
        "microsoft" | "outlook" | "hotmail" => return DomainGroup::Microsoft,
        "yahoo" | "aol" => return DomainGroup::Yahoo,
        "apple" | "icloud" => return DomainGroup::Apple,
        "att" | "at&t" => return DomainGroup::Att,
        "comcast" | "xfinity" => return DomainGroup::Comcast,
        "verizon" => return DomainGroup::Verizon,
        "charter" | "spectrum" => return DomainGroup::Charter,
        "other" => return DomainGroup::Other,
        _ => {}
    }

    let Some((_, domain)) = email.split_once('@') else {
        return DomainGroup::None;
    };
    match domain {
        "gmail.com" | "googlemail.com" => DomainGroup::Google,
        "outlook.com" | "hotmail.com" | "live.com" | "msn.com" => DomainGroup::Microsoft,
        "icloud.com" | "me.com" | "mac.com" => DomainGroup::Apple,
        "att.net" | "sbcglobal.net" | "bellsouth.net" => DomainGroup::Att,
        "comcast.net" | "xfinity.com" => DomainGroup::Comcast,
        "verizon.net" => DomainGroup::Verizon,
        "charter.net" | "spectrum.net" | "rr.com" | "roadrunner.com" => DomainGroup::Charter,
        "aol.com" | "ymail.com" | "rocketmail.com" => DomainGroup::Yahoo,
        other if other.starts_with("yahoo.") => DomainGroup::Yahoo,
        _ => DomainGroup::None,
    }
}

fn truthy(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y" | "t")
}

/// Quality score: 0.50 baseline, adjusted by verification, engagement, flags
/// and prior negative markers, clamped to [0, 1].
pub fn quality_score(record: &NormalizedRecord) -> f64 {
    let mut score: f64 = 0.50;
    score += match record.verification_status {
        VerificationStatus::Verified => 0.25,
        VerificationStatus::Risky => -0.15,
        VerificationStatus::Invalid => -0.50,
        VerificationStatus::Unknown => 0.0,
    };
    score += match record.engagement_behavior.as_str() {
        "high" | "active" | "engaged" | "opener" | "clicker" => 0.15,
        "low" | "inactive" | "dormant" => -0.10,
        _ => 0.0,
    };
    if record.is_disposable {
        score -= 0.30;
    }
    if record.is_role {
        score -= 0.15;
    }
    if record.is_bot {
        score -= 0.40;
    }
    if !record.bounce_category.is_empty() {
        score -= 0.20;
    }
    if record
        .extras
        .get("unsubscribed")
        .and_then(Value::as_str)
        .is_some_and(truthy)
    {
        score -= 0.25;
    }
    score.clamp(0.0, 1.0)
}

fn cell<'a>(row: &'a [String], index: Option<usize>) -> &'a str {
    index.and_then(|i| row.get(i)).map(String::as_str).unwrap_or("")
}

/// Normalize one CSV row through a column map. `None` when the email cell is
/// empty or structurally invalid.
pub fn normalize_row(row: &[String], map: &ColumnMap) -> Option<NormalizedRecord> {
    let email = normalize_email(row.get(map.email)?)?;

    let engagement = cell(row, map.engagement_behavior).trim().to_ascii_lowercase();
    let mut extras = Map::new();
    for (name, index) in &map.extras {
        let value = cell(row, Some(*index)).trim();
        if !value.is_empty() {
            extras.insert(name.clone(), Value::String(value.to_string()));
        }
    }

    let mut record = NormalizedRecord {
        domain_group: normalize_domain_group(cell(row, map.domain_group), &email),
        verification_status: normalize_verification(cell(row, map.verification_status)),
        first_name: title_case(cell(row, map.first_name)),
        last_name: title_case(cell(row, map.last_name)),
        city: title_case(cell(row, map.city)),
        state: cell(row, map.state).trim().to_string(),
        country: normalize_country(cell(row, map.country)),
        zip: normalize_zip(cell(row, map.zip)),
        phone: normalize_phone(cell(row, map.phone)),
        is_role: truthy(cell(row, map.is_role)),
        is_disposable: truthy(cell(row, map.is_disposable)),
        is_bot: truthy(cell(row, map.is_bot)),
        engagement_behavior: engagement,
        bounce_category: cell(row, map.bounce_category).trim().to_ascii_lowercase(),
        dsn_code: cell(row, map.dsn_code).trim().to_string(),
        reason: cell(row, map.reason).trim().to_string(),
        quality_score: 0.0,
        email,
        extras,
    };
    record.quality_score = quality_score(&record);
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::map_columns;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email(" \"User@Example.COM\" "), Some("user@example.com".into()));
        assert_eq!(normalize_email("<bob@site.org>"), Some("bob@site.org".into()));
        assert_eq!(normalize_email("not-an-email"), None);
        assert_eq!(normalize_email(""), None);
    }

    #[test]
    fn names_title_case() {
        assert_eq!(title_case("ALICE"), "Alice");
        assert_eq!(title_case("mary-jane o'brien"), "Mary-Jane O'Brien");
    }

    #[test]
    fn field_rules() {
        assert_eq!(normalize_country("United States"), "US");
        assert_eq!(normalize_country("ca"), "CA");
        assert_eq!(normalize_country("Atlantis"), "");
        assert_eq!(normalize_zip("94107.0"), "94107");
        assert_eq!(normalize_phone("+1 (415) 555-0199"), "+14155550199");
        assert_eq!(normalize_phone("415.555.0199 x22"), "415555019922");
    }

    #[test]
    fn verification_codes() {
        assert_eq!(normalize_verification("1"), VerificationStatus::Verified);
        assert_eq!(normalize_verification("deliverable"), VerificationStatus::Verified);
        assert_eq!(normalize_verification("catch_all"), VerificationStatus::Risky);
        assert_eq!(normalize_verification("3"), VerificationStatus::Invalid);
        assert_eq!(normalize_verification("whatever"), VerificationStatus::Unknown);
    }

    #[test]
    fn domain_group_inference() {
        assert_eq!(normalize_domain_group("", "a@gmail.com"), DomainGroup::Google);
        assert_eq!(normalize_domain_group("", "a@yahoo.co.uk"), DomainGroup::Yahoo);
        assert_eq!(normalize_domain_group("", "a@hotmail.com"), DomainGroup::Microsoft);
        assert_eq!(normalize_domain_group("", "a@example.com"), DomainGroup::None);
        assert_eq!(normalize_domain_group("spectrum", "a@example.com"), DomainGroup::Charter);
    }

    #[test]
    fn baseline_quality_score_is_half() {
        let header = strings(&["email", "first_name", "last_name"]);
        let map = map_columns(&header).unwrap();
        let record = normalize_row(&strings(&["alice@example.com", "Alice", "Smith"]), &map).unwrap();
        assert_eq!(record.quality_score, 0.50);
        assert_eq!(record.domain_group, DomainGroup::None);
    }

    #[test]
    fn quality_score_adjustments_clamp() {
        let header = strings(&["email", "verification_status", "is_bot", "is_disposable"]);
        let map = map_columns(&header).unwrap();
        let record =
            normalize_row(&strings(&["a@example.com", "invalid", "true", "true"]), &map).unwrap();
        // 0.5 − 0.5 − 0.4 − 0.3 clamps to zero.
        assert_eq!(record.quality_score, 0.0);

        let header = strings(&["email", "verification_status", "engagement"]);
        let map = map_columns(&header).unwrap();
        let record =
            normalize_row(&strings(&["a@example.com", "verified", "opener"]), &map).unwrap();
        assert!((record.quality_score - 0.90).abs() < 1e-9);
    }

    #[test]
    fn extras_carry_unmapped_columns() {
        let header = strings(&["email", "favorite_color"]);
        let map = map_columns(&header).unwrap();
        let record = normalize_row(&strings(&["a@example.com", "teal"]), &map).unwrap();
        assert_eq!(record.extras.get("favorite_color"), Some(&Value::String("teal".into())));
    }
}
