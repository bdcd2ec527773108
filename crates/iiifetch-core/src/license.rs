//! License value normalization
//!
//! Manifests carry rights information in wildly different shapes: bare
//! URIs, HTML anchors, prose ("CC BY-NC-SA 4.0"), localized labels.
//! This module reduces them to a single URL where possible, mapping
//! Creative Commons spellings onto canonical creativecommons.org URLs.

use regex::Regex;
use std::sync::LazyLock;

static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href=['"]?([^'" >]+)"#).unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:https?://[^\s<>]+|www\.[^\s<>]+)").unwrap()
});
static VERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d\.\d").unwrap());
static DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d").unwrap());

/// Reduce a raw license/rights value to a canonical URL.
///
/// Returns `None` when the value is empty; otherwise always returns
/// something, falling back to the stripped input text when no URL or
/// known license spelling is recognized.
pub fn normalize(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    // An embedded anchor is the most reliable signal
    let hrefs: Vec<&str> = HREF
        .captures_iter(raw)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if hrefs.len() == 1 {
        return Some(hrefs[0].to_string());
    }
    let text = if hrefs.is_empty() {
        TAG.replace_all(raw, " ").to_string()
    } else {
        hrefs.join(" ")
    };

    let urls: Vec<&str> = URL.find_iter(&text).map(|m| m.as_str()).collect();
    if urls.len() == 1 {
        let url = urls[0].trim_end_matches(&['.', ',', ';', ')'][..]);
        if url.starts_with("http") {
            return Some(url.to_string());
        }
        return Some(format!("http://{}", url));
    }

    // No single URL; try the Creative Commons vocabulary
    let normalized: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let version = version_number(&normalized);

    let spellings: &[(&[&str], Option<&str>)] = &[
        (&["publicdomain", "domainepublic", "cc0", "pdm"], None),
        (&["byncsa", "noncommercialsharealike"], Some("by-nc-sa")),
        (&["byncnd", "noncommercialnoderiv"], Some("by-nc-nd")),
        (&["bysa", "sharealike"], Some("by-sa")),
        (&["bync", "noncommercial"], Some("by-nc")),
        (&["bynd", "noderiv"], Some("by-nd")),
        (&["by", "attribution"], Some("by")),
    ];
    for (terms, code) in spellings {
        if terms.iter().any(|t| normalized.contains(t)) {
            return Some(match code {
                None => "https://creativecommons.org/publicdomain/mark/1.0/".to_string(),
                Some(code) => {
                    format!("https://creativecommons.org/licenses/{}/{}/", code, version)
                }
            });
        }
    }

    let stripped = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if stripped.is_empty() {
        None
    } else {
        Some(stripped)
    }
}

/// Best-effort license version: "4.0" from "CC BY 4.0", "2.0" from
/// "cc-by-2", "1.0" when nothing numeric is present.
fn version_number(normalized: &str) -> String {
    if let Some(m) = VERSION.find(normalized) {
        return m.as_str().to_string();
    }
    if let Some(m) = DIGIT.find(normalized) {
        return format!("{}.0", m.as_str());
    }
    "1.0".to_string()
}
