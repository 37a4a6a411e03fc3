//! URL repair and canonical site identity.
//!
//! Input URLs arrive malformed in every way a spreadsheet allows: missing
//! schemes, spaces inside the host, missing TLDs. `prepare_scrape_url` turns
//! them into something the scraper can navigate to; `canonical_base_url`
//! derives the scheme+host key that every page of one logical site shares.

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

use phonescout_core::PipelineError;

const COMMON_INDEX_FILES: &[&str] = &[
    "index.html",
    "index.htm",
    "index.php",
    "default.html",
    "default.htm",
    "index.asp",
    "default.asp",
];

/// Repair a raw input URL into a navigable pathful URL.
///
/// Trims, prepends `http://` when scheme-less, strips spaces out of the host,
/// and DNS-probes the configured TLD list when the host has no dot. Probe
/// failures are not errors; the un-suffixed host is kept and the scraper
/// reports the DNS failure later.
pub async fn prepare_scrape_url(
    raw: Option<&str>,
    probing_tlds: &[String],
) -> Result<Url, PipelineError> {
    let raw = raw.map(str::trim).unwrap_or("");
    if raw.is_empty() {
        return Err(PipelineError::InvalidUrl("empty input URL".into()));
    }

    let with_scheme = if has_scheme(raw) {
        raw.to_string()
    } else {
        debug!(url = raw, "input URL is scheme-less, assuming http");
        format!("http://{raw}")
    };

    let cleaned = strip_spaces_from_authority(&with_scheme);
    let mut url = Url::parse(&cleaned)
        .map_err(|e| PipelineError::InvalidUrl(format!("{raw}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(PipelineError::InvalidUrl(format!(
            "unsupported scheme '{}' in {raw}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| PipelineError::InvalidUrl(format!("no host in {raw}")))?
        .to_string();

    if host_lacks_tld(&host) {
        info!(host = %host, "host lacks a TLD, probing candidate suffixes");
        if let Some(probed) = probe_tlds(&host, probing_tlds).await {
            if url.set_host(Some(&probed)).is_err() {
                warn!(host = %probed, "probed host rejected by URL parser, keeping original");
            }
        } else {
            warn!(host = %host, "TLD probing found no resolving candidate, keeping host as-is");
        }
    }

    Ok(url)
}

fn has_scheme(raw: &str) -> bool {
    raw.split_once("://")
        .map(|(scheme, _)| !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.'))
        .unwrap_or(false)
}

/// Spreadsheet URLs sometimes contain spaces inside the domain part.
fn strip_spaces_from_authority(url_str: &str) -> String {
    let Some((scheme, rest)) = url_str.split_once("://") else {
        return url_str.to_string();
    };
    let split_at = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(split_at);
    let authority: String = authority.chars().filter(|c| !c.is_whitespace()).collect();
    format!("{scheme}://{authority}{tail}")
}

/// A host with no dot that is neither localhost nor an IP literal is assumed
/// to be a bare company name whose TLD was dropped in the input. Such a host
/// gets probed before scraping and never serves as a site identity.
fn host_lacks_tld(host: &str) -> bool {
    !host.contains('.') && !host.eq_ignore_ascii_case("localhost") && !host.starts_with('[')
}

/// Try each TLD in order; the first candidate with a DNS answer wins.
async fn probe_tlds(host: &str, tlds: &[String]) -> Option<String> {
    for tld in tlds {
        let candidate = format!("{host}.{tld}");
        let lookup_result = tokio::net::lookup_host((candidate.clone(), 80)).await;
        match lookup_result {
            Ok(mut addrs) => {
                if addrs.next().is_some() {
                    info!(host = %candidate, "TLD probe resolved");
                    return Some(candidate);
                }
            }
            Err(_) => {
                debug!(host = %candidate, "TLD probe lookup failed");
            }
        };
    }
    None
}

/// Derive the canonical site key: `scheme://host` with a leading `www.`
/// removed, no path, no query.
///
/// A key is only derived for hosts that can identify a real site: the host
/// must contain a dot, be `localhost`, or be an IP literal. A bare dotless
/// name (a failed TLD probe, for instance) yields `None`.
pub fn canonical_base_url(url_str: &str) -> Option<String> {
    if url_str.trim().is_empty() {
        return None;
    }
    let candidate = if has_scheme(url_str) {
        url_str.to_string()
    } else {
        format!("http://{url_str}")
    };
    let url = Url::parse(&candidate).ok()?;
    let host = url.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host_lacks_tld(host) {
        return None;
    }
    Some(format!("{}://{}", url.scheme(), host))
}

/// Normalize a URL for dedup and queue identity.
///
/// Fragment removed, `www.` stripped, common index filenames dropped from the
/// path, trailing slash removed except at root, query parameters filtered
/// against `ignored_query_params` and sorted.
pub fn normalize_url(url: &Url, ignored_query_params: &[String]) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    let stripped_host = normalized
        .host_str()
        .and_then(|h| h.strip_prefix("www."))
        .map(str::to_string);
    if let Some(host) = stripped_host {
        let _ = normalized.set_host(Some(&host));
    }

    let mut path = normalized.path().to_string();
    for index_file in COMMON_INDEX_FILES {
        if let Some(prefix) = path.strip_suffix(index_file) {
            if prefix.ends_with('/') {
                path = prefix.to_string();
                break;
            }
        }
    }
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    if path.is_empty() {
        path.push('/');
    }
    normalized.set_path(&path);

    let query = normalized.query().map(|q| {
        let mut params: Vec<&str> = q
            .split('&')
            .filter(|p| {
                let name = p.split('=').next().unwrap_or(p).to_ascii_lowercase();
                !ignored_query_params.iter().any(|ig| ig.eq_ignore_ascii_case(&name))
            })
            .collect();
        params.sort_unstable();
        params.join("&")
    });
    match query.as_deref() {
        Some("") | None => normalized.set_query(None),
        Some(q) => normalized.set_query(Some(q)),
    }

    normalized
}

/// Bounded, filesystem-safe name for a landed URL: a short sanitized host
/// fragment for readability plus a fixed-length digest for uniqueness.
pub fn safe_filename_for_url(url_str: &str) -> String {
    let host_fragment: String = Url::parse(url_str)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .map(|h| h.strip_prefix("www.").unwrap_or(&h).to_string())
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(15)
        .collect();

    let digest = Sha256::digest(url_str.as_bytes());
    let mut hash_prefix = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        hash_prefix.push_str(&format!("{byte:02x}"));
    }
    format!("{host_fragment}_{hash_prefix}")
}

/// Filesystem-safe company-name fragment, truncated to `max_len` characters.
pub fn safe_filename_for_company(name: &str, max_len: usize) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_ignored() -> Vec<String> {
        Vec::new()
    }

    fn fallback_ignored() -> Vec<String> {
        vec!["fallback".to_string()]
    }

    #[tokio::test]
    async fn scheme_less_url_gets_http() {
        let url = prepare_scrape_url(Some("example.com/kontakt"), &[]).await.unwrap();
        assert_eq!(url.as_str(), "http://example.com/kontakt");
    }

    #[tokio::test]
    async fn spaces_in_host_are_removed() {
        let url = prepare_scrape_url(Some("http://exa mple.com/path"), &[]).await.unwrap();
        assert_eq!(url.host_str(), Some("example.com"));
    }

    #[tokio::test]
    async fn empty_input_is_invalid() {
        assert!(prepare_scrape_url(Some("   "), &[]).await.is_err());
        assert!(prepare_scrape_url(None, &[]).await.is_err());
    }

    #[tokio::test]
    async fn non_http_scheme_is_invalid() {
        assert!(prepare_scrape_url(Some("ftp://example.com"), &[]).await.is_err());
    }

    #[tokio::test]
    async fn localhost_is_not_probed() {
        // With an empty probe list the host must survive untouched.
        let url = prepare_scrape_url(Some("http://localhost:8080/x"), &[]).await.unwrap();
        assert_eq!(url.host_str(), Some("localhost"));
    }

    #[test]
    fn probe_detection() {
        assert!(host_lacks_tld("acme"));
        assert!(!host_lacks_tld("acme.de"));
        assert!(!host_lacks_tld("localhost"));
        assert!(!host_lacks_tld("192.168.0.1"));
    }

    #[test]
    fn canonical_base_strips_www_and_path() {
        assert_eq!(
            canonical_base_url("http://www.example.com/path?query=1"),
            Some("http://example.com".to_string())
        );
        assert_eq!(
            canonical_base_url("example.com/path"),
            Some("http://example.com".to_string())
        );
        assert_eq!(canonical_base_url("not a url"), None);
        assert_eq!(canonical_base_url(""), None);
    }

    #[test]
    fn dotless_hosts_never_become_site_keys() {
        // A host left bare by a failed TLD probe identifies nothing.
        assert_eq!(canonical_base_url("http://acme"), None);
        assert_eq!(canonical_base_url("http://acme/kontakt"), None);
        assert_eq!(canonical_base_url("acme"), None);
        // localhost and IP literals are real site identities.
        assert_eq!(
            canonical_base_url("http://localhost:8080/x"),
            Some("http://localhost".to_string())
        );
        assert_eq!(
            canonical_base_url("http://192.168.0.1/"),
            Some("http://192.168.0.1".to_string())
        );
    }

    #[test]
    fn www_variants_share_a_canonical_key() {
        let a = canonical_base_url("http://site.tld/contact").unwrap();
        let b = canonical_base_url("http://www.site.tld/").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "http://site.tld");
    }

    #[test]
    fn normalize_is_idempotent() {
        let cases = [
            "http://www.Example.com/a/index.html?b=2&fallback=1#frag",
            "https://example.com/",
            "http://example.com/a/b/?x=1&a=2",
        ];
        for case in cases {
            let url = Url::parse(case).unwrap();
            let once = normalize_url(&url, &fallback_ignored());
            let twice = normalize_url(&once, &fallback_ignored());
            assert_eq!(once, twice, "normalize must be idempotent for {case}");
        }
    }

    #[test]
    fn normalize_strips_fragment_index_and_trailing_slash() {
        let url = Url::parse("http://www.example.com/a/index.html#top").unwrap();
        let normalized = normalize_url(&url, &no_ignored());
        assert_eq!(normalized.as_str(), "http://example.com/a");
    }

    #[test]
    fn normalize_root_keeps_single_slash() {
        let url = Url::parse("http://example.com/").unwrap();
        assert_eq!(normalize_url(&url, &no_ignored()).as_str(), "http://example.com/");
    }

    #[test]
    fn normalize_filters_and_sorts_query() {
        let url = Url::parse("http://example.com/x?fallback=1&a=2").unwrap();
        let normalized = normalize_url(&url, &fallback_ignored());
        assert_eq!(normalized.as_str(), "http://example.com/x?a=2");

        let url = Url::parse("http://example.com/x?b=1&a=2").unwrap();
        let normalized = normalize_url(&url, &fallback_ignored());
        assert_eq!(normalized.query(), Some("a=2&b=1"));
    }

    #[test]
    fn url_filenames_are_bounded_and_unique_per_url() {
        let a = safe_filename_for_url("http://example.com/kontakt");
        let b = safe_filename_for_url("http://example.com/impressum");
        assert_ne!(a, b);
        assert!(a.starts_with("examplecom_"));
        assert!(a.len() <= 15 + 1 + 16);
        // Same input, same name.
        assert_eq!(a, safe_filename_for_url("http://example.com/kontakt"));
    }

    #[test]
    fn company_filenames_are_sanitized() {
        assert_eq!(safe_filename_for_company("Müller & Söhne GmbH", 25), "M_ller___S_hne_GmbH");
        assert_eq!(safe_filename_for_company("Averylongcompanyname AG", 10), "Averylongc");
    }
}
