//! Link scoring for the contact-focused crawl.
//!
//! Three tiers: critical keywords as standalone path segments, high-priority
//! keywords as path segments, and general target keywords anywhere in the
//! link text or href. Excluded path patterns drop a link outright.

use url::Url;

use phonescout_core::config::ScraperConfig;
use phonescout_core::PageType;

pub const CRITICAL_SCORE: i32 = 100;
pub const HIGH_PRIORITY_SCORE: i32 = 60;
pub const GENERAL_SCORE: i32 = 40;

/// Score one candidate link. `None` means the link is excluded.
pub fn score_link(config: &ScraperConfig, link_text: &str, href: &Url) -> Option<i32> {
    let path_lower = href.path().to_ascii_lowercase();
    if config
        .exclude_path_patterns
        .iter()
        .any(|pattern| path_lower.contains(pattern.as_str()))
    {
        return None;
    }

    let segments: Vec<&str> = path_lower.split('/').filter(|s| !s.is_empty()).collect();
    let keyword_tier_applies = segments.len() <= config.max_keyword_path_segments;

    if keyword_tier_applies
        && segments
            .iter()
            .any(|seg| config.critical_keywords.iter().any(|k| k.as_str() == *seg))
    {
        return Some(CRITICAL_SCORE);
    }

    if keyword_tier_applies
        && segments
            .iter()
            .any(|seg| config.high_priority_keywords.iter().any(|k| k.as_str() == *seg))
    {
        return Some(HIGH_PRIORITY_SCORE);
    }

    let text_lower = link_text.to_ascii_lowercase();
    let href_lower = href.as_str().to_ascii_lowercase();
    if config
        .target_keywords
        .iter()
        .any(|k| text_lower.contains(k.as_str()) || href_lower.contains(k.as_str()))
    {
        return Some(GENERAL_SCORE);
    }

    Some(0)
}

/// Tag a crawled page by the keyword tier its path falls into.
pub fn page_type_for(config: &ScraperConfig, url: &Url, depth: u32) -> PageType {
    if depth == 0 {
        return PageType::Landing;
    }
    let path_lower = url.path().to_ascii_lowercase();
    let segments: Vec<&str> = path_lower.split('/').filter(|s| !s.is_empty()).collect();
    if segments
        .iter()
        .any(|seg| config.critical_keywords.iter().any(|k| k.as_str() == *seg))
    {
        return PageType::Contact;
    }
    if segments
        .iter()
        .any(|seg| config.high_priority_keywords.iter().any(|k| k.as_str() == *seg))
    {
        return PageType::LegalInfo;
    }
    PageType::General
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ScraperConfig {
        ScraperConfig::default()
    }

    #[test]
    fn critical_segment_scores_highest() {
        let config = config();
        let url = Url::parse("http://acme.de/impressum").unwrap();
        assert_eq!(score_link(&config, "Impressum", &url), Some(CRITICAL_SCORE));
        let url = Url::parse("http://acme.de/kontakt/").unwrap();
        assert_eq!(score_link(&config, "", &url), Some(CRITICAL_SCORE));
    }

    #[test]
    fn critical_keyword_must_be_a_standalone_segment() {
        let config = config();
        // "kontaktlinsen" contains the keyword but is not the segment itself,
        // so only the general tier applies via the href substring.
        let url = Url::parse("http://acme.de/kontaktlinsen").unwrap();
        assert_eq!(score_link(&config, "", &url), Some(GENERAL_SCORE));
    }

    #[test]
    fn deep_paths_lose_their_priority_tier() {
        let config = config();
        let url = Url::parse("http://acme.de/a/b/c/impressum").unwrap();
        // Four segments exceed max_keyword_path_segments; keyword still hits
        // the general tier through the href.
        assert_eq!(score_link(&config, "", &url), Some(GENERAL_SCORE));
    }

    #[test]
    fn high_priority_segment_scores_middle_tier() {
        let config = config();
        let url = Url::parse("http://acme.de/datenschutz").unwrap();
        assert_eq!(score_link(&config, "", &url), Some(HIGH_PRIORITY_SCORE));
    }

    #[test]
    fn keyword_in_link_text_scores_general_tier() {
        let config = config();
        let url = Url::parse("http://acme.de/page7").unwrap();
        assert_eq!(score_link(&config, "Support erreichen", &url), Some(GENERAL_SCORE));
    }

    #[test]
    fn excluded_paths_are_dropped_regardless_of_score() {
        let config = config();
        let url = Url::parse("http://acme.de/blog/kontakt").unwrap();
        assert_eq!(score_link(&config, "Kontakt", &url), None);
    }

    #[test]
    fn unrelated_links_score_zero() {
        let config = config();
        let url = Url::parse("http://acme.de/produkte").unwrap();
        assert_eq!(score_link(&config, "Produkte", &url), Some(0));
    }

    #[test]
    fn page_types_follow_keyword_tiers() {
        let config = config();
        assert_eq!(
            page_type_for(&config, &Url::parse("http://acme.de/").unwrap(), 0),
            PageType::Landing
        );
        assert_eq!(
            page_type_for(&config, &Url::parse("http://acme.de/kontakt").unwrap(), 1),
            PageType::Contact
        );
        assert_eq!(
            page_type_for(&config, &Url::parse("http://acme.de/privacy").unwrap(), 1),
            PageType::LegalInfo
        );
        assert_eq!(
            page_type_for(&config, &Url::parse("http://acme.de/produkte").unwrap(), 1),
            PageType::General
        );
    }
}
