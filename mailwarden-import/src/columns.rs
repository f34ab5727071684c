//! Canonical column mapping
//!
//! Header-based mapping recognizes the common vendor spellings for each
//! canonical column. Headerless files are detected structurally: any cell of
//! the first row that looks like an email promotes that column, with the two
//! following columns read as first and last name.

use std::collections::HashMap;

/// Canonical column indices for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub email: usize,
    pub first_name: Option<usize>,
    pub last_name: Option<usize>,
    pub city: Option<usize>,
    pub state: Option<usize>,
    pub country: Option<usize>,
    pub zip: Option<usize>,
    pub phone: Option<usize>,
    pub verification_status: Option<usize>,
    pub domain_group: Option<usize>,
    pub quality_score: Option<usize>,
    pub is_role: Option<usize>,
    pub is_disposable: Option<usize>,
    pub is_bot: Option<usize>,
    pub engagement_behavior: Option<usize>,
    pub bounce_category: Option<usize>,
    pub dsn_code: Option<usize>,
    pub reason: Option<usize>,
    /// Unrecognized headers, kept as extras.
    pub extras: Vec<(String, usize)>,
}

/// Structural email check used for headerless detection.
pub fn looks_like_email(cell: &str) -> bool {
    let cell = cell.trim().trim_matches(|c| c == '"' || c == '\'' || c == '<' || c == '>');
    if !(5..=254).contains(&cell.len()) {
        return false;
    }
    let mut parts = cell.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty() && domain.len() >= 3 && domain.contains('.') && !domain.ends_with('.')
}

fn canonical_name(header: &str) -> Option<&'static str> {
    let normalized: String = header
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let name = match normalized.as_str() {
        "email" | "emailaddress" | "emailaddr" | "mail" | "recipient" => "email",
        "firstname" | "first" | "fname" | "givenname" => "first_name",
        "lastname" | "last" | "lname" | "surname" | "familyname" => "last_name",
        "city" | "town" => "city",
        "state" | "province" | "region" => "state",
        "country" | "countrycode" => "country",
        "zip" | "zipcode" | "postal" | "postalcode" | "postcode" => "zip",
        "phone" | "phonenumber" | "mobile" | "telephone" => "phone",
        "verificationstatus" | "verification" | "verifystatus" | "validationstatus"
        | "emailstatus" => "verification_status",
        "domaingroup" | "provider" | "esp" | "ispgroup" => "domain_group",
        "qualityscore" | "quality" | "score" => "quality_score",
        "isrole" | "role" => "is_role",
        "isdisposable" | "disposable" => "is_disposable",
        "isbot" | "bot" => "is_bot",
        "engagementbehavior" | "engagement" | "activity" => "engagement_behavior",
        "bouncecategory" | "bouncecat" | "bouncetype" => "bounce_category",
        "dsncode" | "dsnstatus" | "dsn" => "dsn_code",
        "suppressreason" | "reason" | "suppressionreason" => "reason",
        _ => return None,
    };
    Some(name)
}

/// Map a header row. `None` when no email column is recognizable.
pub fn map_columns(header: &[String]) -> Option<ColumnMap> {
    let mut named: HashMap<&'static str, usize> = HashMap::new();
    let mut extras = Vec::new();
    for (index, cell) in header.iter().enumerate() {
        match canonical_name(cell) {
            Some(name) => {
                named.entry(name).or_insert(index);
            }
            None => {
                let trimmed = cell.trim();
                if !trimmed.is_empty() {
                    extras.push((trimmed.to_string(), index));
                }
            }
        }
    }

    let email = *named.get("email")?;
    Some(ColumnMap {
        email,
        first_name: named.get("first_name").copied(),
        last_name: named.get("last_name").copied(),
        city: named.get("city").copied(),
        state: named.get("state").copied(),
        country: named.get("country").copied(),
        zip: named.get("zip").copied(),
        phone: named.get("phone").copied(),
        verification_status: named.get("verification_status").copied(),
        domain_group: named.get("domain_group").copied(),
        quality_score: named.get("quality_score").copied(),
        is_role: named.get("is_role").copied(),
        is_disposable: named.get("is_disposable").copied(),
        is_bot: named.get("is_bot").copied(),
        engagement_behavior: named.get("engagement_behavior").copied(),
        bounce_category: named.get("bounce_category").copied(),
        dsn_code: named.get("dsn_code").copied(),
        reason: named.get("reason").copied(),
        extras,
    })
}

/// Headerless fallback: scan the first data row for a structural email. The
/// two columns after it are read as first and last name.
pub fn map_columns_headerless(first_row: &[String]) -> Option<ColumnMap> {
    let email = first_row.iter().position(|cell| looks_like_email(cell))?;
    let mut map = ColumnMap { email, ..ColumnMap::default() };
    if email + 1 < first_row.len() {
        map.first_name = Some(email + 1);
    }
    if email + 2 < first_row.len() {
        map.last_name = Some(email + 2);
    }
    Some(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn structural_email_check() {
        assert!(looks_like_email("user@example.com"));
        assert!(looks_like_email("\"user@example.com\""));
        assert!(looks_like_email("<user@example.com>"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("two@at@signs.com"));
        assert!(!looks_like_email("user@nodot"));
        assert!(!looks_like_email("a@b."));
        assert!(!looks_like_email("Alice"));
    }

    #[test]
    fn header_mapping_accepts_vendor_spellings() {
        let map = map_columns(&row(&["Email Address", "FNAME", "Surname", "Postal Code"])).unwrap();
        assert_eq!(map.email, 0);
        assert_eq!(map.first_name, Some(1));
        assert_eq!(map.last_name, Some(2));
        assert_eq!(map.zip, Some(3));
    }

    #[test]
    fn unknown_headers_become_extras() {
        let map = map_columns(&row(&["email", "favorite_color"])).unwrap();
        assert_eq!(map.extras, vec![("favorite_color".to_string(), 1)]);
    }

    #[test]
    fn no_email_column_yields_none() {
        assert!(map_columns(&row(&["first", "last", "city"])).is_none());
    }

    #[test]
    fn headerless_detection_finds_email_and_names() {
        let map = map_columns_headerless(&row(&["alice@example.com", "Alice", "Smith"])).unwrap();
        assert_eq!(map.email, 0);
        assert_eq!(map.first_name, Some(1));
        assert_eq!(map.last_name, Some(2));
    }

    #[test]
    fn headerless_detection_round_trips_through_header_mapping() {
        // A row whose email cell is promoted to a header maps identically.
        let data = row(&["user@example.com", "Alice", "Smith"]);
        let headerless = map_columns_headerless(&data).unwrap();
        let promoted = map_columns(&row(&["email", "first_name", "last_name"])).unwrap();
        assert_eq!(headerless.email, promoted.email);
        assert_eq!(headerless.first_name, promoted.first_name);
        assert_eq!(headerless.last_name, promoted.last_name);
    }

    #[test]
    fn headerless_mid_row_email() {
        let map = map_columns_headerless(&row(&["123", "bob@example.com", "Bob"])).unwrap();
        assert_eq!(map.email, 1);
        assert_eq!(map.first_name, Some(2));
        assert_eq!(map.last_name, None);
    }
}
