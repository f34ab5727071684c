//! ISP registry
//!
//! Recipient domains are grouped into a closed set of ISP clusters. The
//! registry resolves a recipient domain to its cluster through a static
//! domain table, falling back to MX-suffix classification (with a TTL cache)
//! for domains hosted on one of the majors under a custom name.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Closed set of ISP clusters governed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isp {
    Gmail,
    Yahoo,
    Microsoft,
    Apple,
    Att,
    Comcast,
    Verizon,
    Charter,
}

impl Isp {
    /// All clusters, in fixed iteration order.
    pub const ALL: [Isp; 8] = [
        Isp::Gmail,
        Isp::Yahoo,
        Isp::Microsoft,
        Isp::Apple,
        Isp::Att,
        Isp::Comcast,
        Isp::Verizon,
        Isp::Charter,
    ];

    /// Stable lowercase name used in file names, queue names and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Isp::Gmail => "gmail",
            Isp::Yahoo => "yahoo",
            Isp::Microsoft => "microsoft",
            Isp::Apple => "apple",
            Isp::Att => "att",
            Isp::Comcast => "comcast",
            Isp::Verizon => "verizon",
            Isp::Charter => "charter",
        }
    }

    /// MTA pool name for this cluster.
    pub fn pool_name(&self) -> String {
        format!("{}-pool", self.name())
    }

    /// Representative recipient domain, used when a context needs one domain
    /// to stand for the whole cluster.
    pub fn canonical_domain(&self) -> &'static str {
        match self {
            Isp::Gmail => "gmail.com",
            Isp::Yahoo => "yahoo.com",
            Isp::Microsoft => "outlook.com",
            Isp::Apple => "icloud.com",
            Isp::Att => "att.net",
            Isp::Comcast => "comcast.net",
            Isp::Verizon => "verizon.net",
            Isp::Charter => "charter.net",
        }
    }

    /// Parse a cluster from its stable name.
    pub fn from_name(name: &str) -> Option<Isp> {
        Isp::ALL.iter().find(|isp| isp.name() == name).copied()
    }
}

impl fmt::Display for Isp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static recipient-domain table for the major consumer domains.
pub fn isp_for_domain(domain: &str) -> Option<Isp> {
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    let isp = match domain.as_str() {
        "gmail.com" | "googlemail.com" => Isp::Gmail,
        "yahoo.com" | "yahoo.co.uk" | "yahoo.ca" | "yahoo.fr" | "yahoo.de" | "yahoo.es"
        | "yahoo.it" | "yahoo.com.br" | "yahoo.com.mx" | "aol.com" | "ymail.com"
        | "rocketmail.com" | "verizonmedia.com" => Isp::Yahoo,
        "outlook.com" | "hotmail.com" | "hotmail.co.uk" | "hotmail.fr" | "live.com"
        | "live.co.uk" | "msn.com" | "outlook.co.uk" => Isp::Microsoft,
        "icloud.com" | "me.com" | "mac.com" => Isp::Apple,
        "att.net" | "sbcglobal.net" | "bellsouth.net" | "ameritech.net" | "swbell.net"
        | "pacbell.net" | "flash.net" | "prodigy.net" | "currently.com" => Isp::Att,
        "comcast.net" | "xfinity.com" => Isp::Comcast,
        "verizon.net" => Isp::Verizon,
        "charter.net" | "spectrum.net" | "roadrunner.com" | "rr.com" | "twc.com"
        | "brighthouse.com" | "charterinternet.com" => Isp::Charter,
        _ => return None,
    };
    Some(isp)
}

/// MX host suffix table used by the fallback classifier.
const MX_SUFFIXES: &[(&str, Isp)] = &[
    (".google.com", Isp::Gmail),
    (".googlemail.com", Isp::Gmail),
    (".yahoodns.net", Isp::Yahoo),
    (".aol.com", Isp::Yahoo),
    (".olc.protection.outlook.com", Isp::Microsoft),
    (".protection.outlook.com", Isp::Microsoft),
    (".hotmail.com", Isp::Microsoft),
    (".icloud.com", Isp::Apple),
    (".apple.com", Isp::Apple),
    (".att.net", Isp::Att),
    (".prodigy.net", Isp::Att),
    (".comcast.net", Isp::Comcast),
    (".verizon.net", Isp::Verizon),
    (".charter.net", Isp::Charter),
    (".chartercom.com", Isp::Charter),
];

/// Resolves MX host names for a domain. Lookup transport is a collaborator;
/// the registry only consumes the resolved host list.
pub trait MxResolver: Send + Sync {
    /// Resolve the MX host names for `domain`, best-preference first.
    /// `None` means resolution failed or the domain has no MX records.
    fn resolve_mx(&self, domain: &str) -> Option<Vec<String>>;
}

#[derive(Clone, Copy)]
struct CacheEntry {
    isp: Option<Isp>,
    cached_at: DateTime<Utc>,
}

/// Domain → ISP lookup with MX-suffix fallback.
///
/// Lookups hit the static table first. Unknown domains are classified by the
/// suffix of their MX hosts; results (including negative ones) are cached for
/// [`IspRegistry::CACHE_TTL`].
pub struct IspRegistry {
    resolver: Option<Arc<dyn MxResolver>>,
    mx_cache: DashMap<String, CacheEntry>,
}

impl IspRegistry {
    /// How long MX classification results are cached.
    pub const CACHE_TTL: Duration = Duration::hours(1);

    /// Registry with no MX fallback; static-table lookups only.
    pub fn static_only() -> Self {
        Self { resolver: None, mx_cache: DashMap::new() }
    }

    /// Registry with an MX fallback resolver.
    pub fn with_resolver(resolver: Arc<dyn MxResolver>) -> Self {
        Self { resolver: Some(resolver), mx_cache: DashMap::new() }
    }

    /// Classify a recipient domain into an ISP cluster.
    pub fn classify(&self, domain: &str, now: DateTime<Utc>) -> Option<Isp> {
        if let Some(isp) = isp_for_domain(domain) {
            return Some(isp);
        }
        self.classify_by_mx(domain, now)
    }

    fn classify_by_mx(&self, domain: &str, now: DateTime<Utc>) -> Option<Isp> {
        let resolver = self.resolver.as_ref()?;
        let key = domain.to_ascii_lowercase();

        if let Some(entry) = self.mx_cache.get(&key) {
            if now - entry.cached_at < Self::CACHE_TTL {
                return entry.isp;
            }
        }

        let isp = resolver.resolve_mx(&key).and_then(|hosts| {
            hosts.iter().find_map(|host| {
                let host = host.trim_end_matches('.').to_ascii_lowercase();
                MX_SUFFIXES
                    .iter()
                    .find(|(suffix, _)| host.ends_with(suffix))
                    .map(|(_, isp)| *isp)
            })
        });

        debug!(domain = %key, isp = ?isp, "mx classification");
        self.mx_cache.insert(key, CacheEntry { isp, cached_at: now });
        isp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticResolver(Vec<(&'static str, Vec<&'static str>)>);

    impl MxResolver for StaticResolver {
        fn resolve_mx(&self, domain: &str) -> Option<Vec<String>> {
            self.0
                .iter()
                .find(|(d, _)| *d == domain)
                .map(|(_, hosts)| hosts.iter().map(|h| h.to_string()).collect())
        }
    }

    #[test]
    fn static_table_covers_majors() {
        assert_eq!(isp_for_domain("gmail.com"), Some(Isp::Gmail));
        assert_eq!(isp_for_domain("AOL.com"), Some(Isp::Yahoo));
        assert_eq!(isp_for_domain("hotmail.co.uk"), Some(Isp::Microsoft));
        assert_eq!(isp_for_domain("sbcglobal.net"), Some(Isp::Att));
        assert_eq!(isp_for_domain("rr.com"), Some(Isp::Charter));
        assert_eq!(isp_for_domain("example.com"), None);
    }

    #[test]
    fn pool_names_are_stable() {
        assert_eq!(Isp::Gmail.pool_name(), "gmail-pool");
        assert_eq!(Isp::from_name("verizon"), Some(Isp::Verizon));
        assert_eq!(Isp::from_name("unknown"), None);
    }

    #[test]
    fn mx_fallback_classifies_hosted_domains() {
        let resolver = StaticResolver(vec![
            ("corp.example", vec!["aspmx.l.google.com"]),
            ("other.example", vec!["mx.unrelated.example"]),
        ]);
        let registry = IspRegistry::with_resolver(Arc::new(resolver));
        let now = Utc::now();

        assert_eq!(registry.classify("corp.example", now), Some(Isp::Gmail));
        assert_eq!(registry.classify("other.example", now), None);
        // Negative result is cached.
        assert!(registry.mx_cache.contains_key("other.example"));
    }

    #[test]
    fn mx_cache_expires_after_ttl() {
        let resolver = StaticResolver(vec![("corp.example", vec!["mx1.olc.protection.outlook.com"])]);
        let registry = IspRegistry::with_resolver(Arc::new(resolver));
        let now = Utc::now();

        assert_eq!(registry.classify("corp.example", now), Some(Isp::Microsoft));
        let entry = *registry.mx_cache.get("corp.example").unwrap();
        assert_eq!(entry.isp, Some(Isp::Microsoft));

        // A lookup past the TTL re-resolves rather than trusting the entry.
        let later = now + Duration::hours(2);
        assert_eq!(registry.classify("corp.example", later), Some(Isp::Microsoft));
        let refreshed = *registry.mx_cache.get("corp.example").unwrap();
        assert_eq!(refreshed.cached_at, later);
    }
}
