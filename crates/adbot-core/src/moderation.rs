//! Spam classifier for messages posted directly in the supergroup.
//!
//! Pure function of `(text, allow-list snapshot)`. Rules run in a fixed order and
//! the first hit wins:
//! 1. phone numbers (trunk/country prefix + grouped digits, or a bare 10-11 digit run)
//! 2. `http(s)://` links
//! 3. bare domains (`label.tld`) outside of a scheme link
//! 4. `t.me/<handle>` contact links
//!
//! Deleting the message, recording the violation and warning the author are the
//! caller's job.

use std::{fmt, ops::Range, str::FromStr, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Host of the platform's own link shortener.
pub const SHORTENER_DOMAIN: &str = "t.me";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationKind {
    Phone,
    Link,
    Contact,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::Phone => "phone",
            ViolationKind::Link => "link",
            ViolationKind::Contact => "contact",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phone" => Ok(ViolationKind::Phone),
            "link" => Ok(ViolationKind::Link),
            "contact" => Ok(ViolationKind::Contact),
            other => Err(format!("unknown violation kind: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    /// The offending substring (lowercased for link/contact hits).
    pub matched: String,
}

struct Patterns {
    phone_prefixed: Regex,
    phone_bare: Regex,
    url: Regex,
    domain: Regex,
    shortener: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        phone_prefixed: Regex::new(
            r"(\+7|8)[\s\-(]*[0-9]{3}[\s\-)]*[0-9]{3}[\s\-]*[0-9]{2}[\s\-]*[0-9]{2}",
        )
        .expect("phone pattern compiles"),
        // ASCII boundaries: digits glued to Cyrillic text still count as a token.
        phone_bare: Regex::new(r"(?-u:\b)[0-9]{10,11}(?-u:\b)")
            .expect("bare phone pattern compiles"),
        url: Regex::new(r"(?i)https?://\S+").expect("url pattern compiles"),
        domain: Regex::new(
            r"(?i)(?-u:\b)[a-z0-9][-a-z0-9]*\.(?:(?:ru|com|net|org|io|me|cc|ly|gl|su|info|biz|xyz|online|site|shop|store)(?-u:\b)|рф)\S*",
        )
        .expect("domain pattern compiles"),
        shortener: Regex::new(r"(?i)t\.me/[a-z0-9_]+").expect("shortener pattern compiles"),
    })
}

/// Classify `text` against the banned-content rules.
///
/// `allowed_domains` must already be lowercased (see [`crate::allowlist::AllowList`]).
pub fn check(text: &str, allowed_domains: &[String]) -> Option<Violation> {
    let p = patterns();

    for re in [&p.phone_prefixed, &p.phone_bare] {
        if let Some(m) = re.find(text) {
            let digits = m.as_str().chars().filter(char::is_ascii_digit).count();
            if digits >= 10 {
                return Some(Violation {
                    kind: ViolationKind::Phone,
                    matched: m.as_str().to_string(),
                });
            }
        }
    }

    let lower = text.to_lowercase();

    let mut scheme_spans: Vec<Range<usize>> = Vec::new();
    for m in p.url.find_iter(&lower) {
        if !is_allowed(m.as_str(), allowed_domains) {
            return Some(Violation {
                kind: ViolationKind::Link,
                matched: m.as_str().to_string(),
            });
        }
        scheme_spans.push(m.range());
    }

    for m in p.domain.find_iter(&lower) {
        let inside_scheme = scheme_spans.iter().any(|r| r.contains(&m.start()));
        // Shortener handles are judged by the contact rule below.
        let is_shortener = m.as_str().starts_with("t.me/");
        if inside_scheme || is_shortener {
            continue;
        }
        if !is_allowed(m.as_str(), allowed_domains) {
            return Some(Violation {
                kind: ViolationKind::Link,
                matched: m.as_str().to_string(),
            });
        }
    }

    if let Some(m) = p.shortener.find(&lower) {
        if !is_allowed(SHORTENER_DOMAIN, allowed_domains) {
            return Some(Violation {
                kind: ViolationKind::Contact,
                matched: m.as_str().to_string(),
            });
        }
    }

    None
}

fn is_allowed(candidate: &str, allowed_domains: &[String]) -> bool {
    let candidate = candidate.to_lowercase();
    allowed_domains
        .iter()
        .filter(|d| !d.is_empty())
        .any(|d| candidate.contains(d.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(domains: &[&str]) -> Vec<String> {
        domains.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn grouped_phone_with_trunk_prefix() {
        let v = check("call 8-912-345-67-89", &[]).unwrap();
        assert_eq!(v.kind, ViolationKind::Phone);
        assert_eq!(v.matched, "8-912-345-67-89");
    }

    #[test]
    fn international_prefix_with_brackets() {
        let v = check("звоните +7 (912) 345 67 89", &[]).unwrap();
        assert_eq!(v.kind, ViolationKind::Phone);
    }

    #[test]
    fn bare_digit_run_is_a_phone() {
        assert_eq!(
            check("номер 9123456789 пишите", &[]).unwrap().kind,
            ViolationKind::Phone
        );
        // Too short to be a phone, too long to be a bare run.
        assert!(check("order 123456789", &[]).is_none());
        assert!(check("id 123456789012", &[]).is_none());
    }

    #[test]
    fn bare_domain_is_a_link_unless_allowed() {
        let v = check("see vk.com/me", &[]).unwrap();
        assert_eq!(v.kind, ViolationKind::Link);
        assert_eq!(v.matched, "vk.com/me");

        assert!(check("see vk.com/me", &allow(&["vk.com"])).is_none());
    }

    #[test]
    fn scheme_links_respect_allow_list_case_insensitively() {
        let v = check("Details: HTTPS://Shop.Example.com/item", &[]).unwrap();
        assert_eq!(v.kind, ViolationKind::Link);
        assert_eq!(v.matched, "https://shop.example.com/item");

        assert!(check(
            "Details: HTTPS://Shop.Example.com/item",
            &allow(&["example.com"])
        )
        .is_none());
    }

    #[test]
    fn domain_inside_allowed_scheme_link_is_not_rechecked() {
        let text = "https://example.com/redirect?to=evil.ru";
        assert!(check(text, &allow(&["example.com"])).is_none());
    }

    #[test]
    fn shortener_handle_is_a_contact() {
        let v = check("write me: t.me/seller_01", &[]).unwrap();
        assert_eq!(v.kind, ViolationKind::Contact);
        assert_eq!(v.matched, "t.me/seller_01");

        assert!(check("write me: t.me/seller_01", &allow(&["t.me"])).is_none());
    }

    #[test]
    fn domains_starting_like_a_shortener_are_links() {
        let v = check("buy at t.me-shop.ru", &[]).unwrap();
        assert_eq!(v.kind, ViolationKind::Link);
        assert_eq!(v.matched, "t.me-shop.ru");

        let v = check("see t.me.evil.ru", &[]).unwrap();
        assert_eq!(v.kind, ViolationKind::Link);
        assert_eq!(v.matched, "t.me.evil.ru");
    }

    #[test]
    fn tokens_glued_to_cyrillic_are_still_caught() {
        let v = check("тел9123456789", &[]).unwrap();
        assert_eq!(v.kind, ViolationKind::Phone);
        assert_eq!(v.matched, "9123456789");

        let v = check("сайтvk.com", &[]).unwrap();
        assert_eq!(v.kind, ViolationKind::Link);
        assert_eq!(v.matched, "vk.com");
    }

    #[test]
    fn cyrillic_zone_is_a_link() {
        assert_eq!(
            check("заходите на shop.рф", &[]).unwrap().kind,
            ViolationKind::Link
        );
    }

    #[test]
    fn phone_rule_wins_over_link_rule() {
        let v = check("vk.com/me or 89123456789", &[]).unwrap();
        assert_eq!(v.kind, ViolationKind::Phone);
    }

    #[test]
    fn clean_text_passes() {
        assert!(check("Lawn mowing, call me", &[]).is_none());
        assert!(check("Price 1500 per hour, 3 years experience.", &[]).is_none());
    }

    #[test]
    fn violation_kind_round_trips_through_str() {
        for kind in [
            ViolationKind::Phone,
            ViolationKind::Link,
            ViolationKind::Contact,
        ] {
            assert_eq!(kind.as_str().parse::<ViolationKind>().unwrap(), kind);
        }
        assert!("spam".parse::<ViolationKind>().is_err());
    }
}
