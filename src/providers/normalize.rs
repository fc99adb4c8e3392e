//! Description cleanup and merchant extraction shared by the adapters.
//!
//! Bank feed descriptions are noisy: channel codes in front, settlement
//! dates and country suffixes behind, card-scheme formatting in the middle.
//! Cleanup is best-effort and total; nothing in here returns an error.

use std::sync::OnceLock;

use regex::Regex;

/// Leading channel/transaction codes that carry no merchant information.
const CHANNEL_CODES: [&str; 6] = ["POS", "NETS", "ICT", "ITR", "MST", "ATM"];

fn trailing_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\s+\d{2}[/-]\d{2}(?:[/-]\d{2,4})?$").expect("trailing date pattern")
    })
}

fn country_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s+(?:SGP?|SINGAPORE)$").expect("country suffix pattern"))
}

/// Strip provider boilerplate: leading channel codes, trailing settlement
/// dates, trailing country suffixes, and redundant whitespace.
pub fn clean_description(raw: &str) -> String {
    let mut cleaned = raw.trim().to_string();

    for code in CHANNEL_CODES {
        if let Some(rest) = cleaned.strip_prefix(code) {
            if let Some(rest) = rest.strip_prefix(' ') {
                cleaned = rest.trim_start().to_string();
                break;
            }
        }
    }

    cleaned = trailing_date_re().replace(&cleaned, "").to_string();
    cleaned = country_suffix_re().replace(&cleaned, "").to_string();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn scheme_star_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Card-scheme format: "MERCHANT *reference".
    RE.get_or_init(|| Regex::new(r"^([A-Z0-9&.'\- ]{2,}?)\s*\*").expect("scheme star pattern"))
}

fn paid_to_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Transfer narrative: "TRANSFER TO <name>", "PAYMENT TO <name>".
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:transfer|payment|paynow)\s+to\s+(.{2,}?)(?:\s+ref\b.*)?$")
            .expect("paid-to pattern")
    })
}

fn leading_words_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Generic fallback: up to four leading capitalized words.
    RE.get_or_init(|| {
        Regex::new(r"^([A-Z][A-Za-z0-9&'.\-]*(?:\s+[A-Z][A-Za-z0-9&'.\-]*){0,3})")
            .expect("leading words pattern")
    })
}

/// Best-effort merchant extraction from a cleaned description.
///
/// Patterns are tried most specific first; the generic leading-capitalized
/// rule is the last resort. Unparsable text yields `None`, never an error.
pub fn extract_merchant(description: &str) -> Option<String> {
    let description = description.trim();
    if description.is_empty() {
        return None;
    }

    for re in [scheme_star_re(), paid_to_re(), leading_words_re()] {
        if let Some(caps) = re.captures(description) {
            if let Some(m) = caps.get(1) {
                let merchant = m.as_str().trim().to_string();
                if merchant.len() >= 2 {
                    return Some(merchant);
                }
            }
        }
    }

    None
}
