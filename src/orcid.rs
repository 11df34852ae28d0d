//! ORCID canonicalization.
//!
//! Submitters type their ORCID free-form, so the raw values arrive bare,
//! URL-prefixed, with stray whitespace/semicolons, or missing the leading
//! zero of the first group. `clean` normalizes every surface form it has
//! been seen in; the caller decides validity afterwards.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// A fully canonical ORCID: four dash-separated groups, `X` check digit
/// allowed.
static ORCID_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{4}-\d{4}-\d{3}[0-9X]$").unwrap());

const URL_PREFIXES: [&str; 3] = ["orcid.org/", "https://orcid.org/", "http://orcid.org/"];

pub fn clean(raw: &str) -> String {
    let x: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ' ' && *c != ';')
        .collect();
    if !x.contains('-') {
        warn!(orcid = %x, "ORCID value has no separator");
    }
    // Three-digit first group: the leading zero was dropped.
    if x.starts_with("000-") {
        return format!("0{x}");
    }
    for prefix in URL_PREFIXES {
        if let Some(rest) = x.strip_prefix(prefix) {
            return rest.to_string();
        }
    }
    x
}

/// Validity as applied by the cleaned-table builder: only identifiers that
/// begin with `0000` are kept.
pub fn is_plausible(cleaned: &str) -> bool {
    cleaned.starts_with("0000")
}

pub fn is_well_formed(cleaned: &str) -> bool {
    ORCID_SHAPE.is_match(cleaned)
}
