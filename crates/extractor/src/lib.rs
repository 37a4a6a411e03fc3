//! Regex harvest of phone-number candidates from cleaned page text.
//!
//! Two pattern families: international forms (`+49 …`, `0049 …`) and
//! national forms with a leading zero as written across DACH sites. Every
//! match is filtered for plausibility against the row's target countries and
//! wrapped in a character window of surrounding context for the classifier.
//! The extractor is pure: same text in, same candidates out.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use phonescout_core::PhoneCandidate;

static INTERNATIONAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+|00)[1-9]\d{0,2}[ \t]?(?:\(0\))?(?:[ \t/.\-]?\(?\d+\)?){2,}").unwrap()
});

static NATIONAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(?0\d{1,4}\)?(?:[ \t/.\-]?\d+){2,}").unwrap()
});

/// Scan one page's text and emit deduplicated candidates in text order.
pub fn extract_candidates(
    text: &str,
    source_url: &str,
    original_input_company_name: &str,
    target_country_codes: &[String],
    snippet_window_chars: usize,
) -> Vec<PhoneCandidate> {
    let mut spans: Vec<(usize, usize)> = Vec::new();

    for m in INTERNATIONAL_RE.find_iter(text) {
        spans.push((m.start(), m.end()));
    }
    for m in NATIONAL_RE.find_iter(text) {
        // National matches nested in an already-found international span are
        // the same number seen twice.
        if !spans.iter().any(|&(s, e)| m.start() < e && m.end() > s) {
            spans.push((m.start(), m.end()));
        }
    }
    spans.sort_unstable();

    let mut seen: HashSet<String> = HashSet::new();
    let mut candidates = Vec::new();

    for (start, end) in spans {
        let number = clean_match(&text[start..end]);
        if number.chars().filter(char::is_ascii_digit).count() < 7 {
            continue;
        }
        if !target_country_codes.is_empty()
            && !phonescout_phone::is_plausible_in_regions(&number, target_country_codes)
        {
            debug!(number = %number, "candidate dropped, not plausible for target countries");
            continue;
        }
        if !seen.insert(number.clone()) {
            continue;
        }
        candidates.push(PhoneCandidate {
            number,
            source_url: source_url.to_string(),
            snippet: snippet_around(text, start, end, snippet_window_chars),
            original_input_company_name: original_input_company_name.to_string(),
        });
    }

    candidates
}

/// Strip separators the pattern may have dragged in at either edge.
fn clean_match(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(['-', '.', '/', ' ', '('])
        .trim_start_matches([')', '-', '.', '/', ' '])
        .to_string()
}

/// Up to `window` characters of context on each side of the match.
fn snippet_around(text: &str, start: usize, end: usize, window: usize) -> String {
    let prefix: String = {
        let chars: Vec<char> = text[..start].chars().rev().take(window).collect();
        chars.into_iter().rev().collect()
    };
    let suffix: String = text[end..].chars().take(window).collect();
    format!("{prefix}{}{suffix}", &text[start..end])
}
