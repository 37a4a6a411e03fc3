//! Single-origin, priority-ordered crawl of one company site.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use dashmap::DashSet;
use priority_queue::PriorityQueue;
use tracing::{debug, info, warn};
use url::Url;

use phonescout_canonical::{normalize_url, safe_filename_for_company, safe_filename_for_url};
use phonescout_core::config::ScraperConfig;
use phonescout_core::{ScrapeStatus, ScrapedPage};

use crate::fetcher::{FetchError, FetchSettings, PageFetcher};
use crate::robots::RobotsGate;
use crate::score::{page_type_for, score_link};
use crate::text::{extract_links, extract_visible_text};

pub const CLEANED_PAGES_SUBDIR: &str = "scraped_content/cleaned_pages_text";

/// Result of crawling one site from its entry URL.
#[derive(Debug)]
pub struct ScrapeOutcome {
    pub pages: Vec<ScrapedPage>,
    pub status: ScrapeStatus,
    /// Normalized URL the entry page landed on, when navigation got that far.
    pub landed_entry_url: Option<String>,
}

impl ScrapeOutcome {
    fn failed(status: ScrapeStatus, landed: Option<String>) -> Self {
        Self {
            pages: Vec::new(),
            status,
            landed_entry_url: landed,
        }
    }
}

/// Queue priority: score first, then BFS arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinkPriority {
    score: i32,
    seq: u64,
}

impl Ord for LinkPriority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for LinkPriority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Crawl `entry_url` and save every fresh page's visible text.
///
/// Cross-row dedup runs on the normalized landed URL against
/// `globally_processed`: a page already claimed by an earlier call is neither
/// re-saved nor re-expanded. Sub-page failures never downgrade a successful
/// entry-point scrape.
pub async fn scrape_site(
    fetcher: &dyn PageFetcher,
    robots: &RobotsGate,
    config: &ScraperConfig,
    entry_url: &Url,
    run_output_dir: &Path,
    company_name: &str,
    globally_processed: &DashSet<String>,
) -> ScrapeOutcome {
    let entry_normalized = normalize_url(entry_url, &config.ignored_query_params);
    info!(url = %entry_normalized, company = company_name, "starting site scrape");

    if !matches!(entry_normalized.scheme(), "http" | "https") {
        return ScrapeOutcome::failed(ScrapeStatus::InvalidUrl, None);
    }

    if !robots.can_fetch(&entry_normalized).await {
        info!(url = %entry_normalized, "disallowed by robots.txt");
        return ScrapeOutcome::failed(ScrapeStatus::RobotsDisallowed, None);
    }

    let pages_dir = run_output_dir.join(CLEANED_PAGES_SUBDIR);
    if let Err(e) = std::fs::create_dir_all(&pages_dir) {
        warn!(dir = %pages_dir.display(), "cannot create page store: {e}");
        return ScrapeOutcome::failed(ScrapeStatus::BrowserError, None);
    }

    let settings = FetchSettings {
        user_agent: config.user_agent.clone(),
        page_timeout: Duration::from_millis(config.page_timeout_ms),
        navigation_timeout: Duration::from_millis(config.navigation_timeout_ms),
        settle_delay: Duration::from_millis(config.networkidle_timeout_ms),
    };
    let company_safe = safe_filename_for_company(company_name, config.filename_company_name_max_len);

    // Site-local frontier: priority queue over normalized URL keys with the
    // job payload held separately.
    let mut queue: PriorityQueue<String, LinkPriority> = PriorityQueue::new();
    let mut jobs: HashMap<String, (Url, u32)> = HashMap::new();
    let mut enqueued: HashSet<String> = HashSet::new();
    let mut seq: u64 = 0;

    let entry_key = entry_normalized.to_string();
    queue.push(entry_key.clone(), LinkPriority { score: i32::MAX, seq });
    jobs.insert(entry_key.clone(), (entry_normalized.clone(), 0));
    enqueued.insert(entry_key);

    let mut pages: Vec<ScrapedPage> = Vec::new();
    let mut landed_entry: Option<String> = None;
    let mut entry_dedup_hit = false;
    let mut fetched_count: u64 = 0;

    while let Some((key, priority)) = queue.pop() {
        let Some((url, depth)) = jobs.remove(&key) else {
            continue;
        };

        let cap = config.max_pages_per_host;
        if cap > 0
            && fetched_count >= cap
            && depth > 0
            && priority.score < config.score_bypass_threshold
        {
            debug!(url = %url, "page cap reached, link skipped");
            continue;
        }

        let fetched = if depth == 0 {
            fetch_entry_with_retry(fetcher, &url, &settings, config).await
        } else {
            fetcher.fetch(&url, &settings).await
        };
        fetched_count += 1;

        let page = match fetched {
            Ok(page) => page,
            Err(e) => {
                if depth == 0 {
                    warn!(url = %url, "entry fetch failed: {e}");
                    return ScrapeOutcome::failed(e.to_status(), landed_entry);
                }
                warn!(url = %url, "sub-page fetch failed, skipping: {e}");
                continue;
            }
        };

        let landed_normalized = normalize_url(&page.landed_url, &config.ignored_query_params);
        let landed_key = landed_normalized.to_string();

        if depth == 0 {
            landed_entry = Some(landed_key.clone());
            if let Some(status) = page.http_status {
                if status >= 400 {
                    return ScrapeOutcome::failed(ScrapeStatus::HttpError(status), landed_entry);
                }
            }
        } else if let Some(status) = page.http_status {
            if status >= 400 {
                debug!(url = %url, status, "sub-page HTTP error, skipping");
                continue;
            }
        }

        // Insert-if-absent on the run-wide set: the landed page may already
        // belong to an earlier call that reached it through another row.
        if !globally_processed.insert(landed_key.clone()) {
            debug!(url = %landed_key, "landed URL already processed this run");
            if depth == 0 {
                entry_dedup_hit = true;
            }
            continue;
        }

        let text = extract_visible_text(&page.html);
        if !text.is_empty() {
            let filename = format!(
                "{company_safe}__{}.txt",
                safe_filename_for_url(&landed_key)
            );
            let path = pages_dir.join(filename);
            match std::fs::write(&path, &text) {
                Ok(()) => {
                    debug!(url = %landed_key, path = %path.display(), "page text saved");
                    pages.push(ScrapedPage {
                        text_path: path,
                        landed_url: landed_key.clone(),
                        page_type: page_type_for(config, &landed_normalized, depth),
                    });
                }
                Err(e) => {
                    warn!(url = %landed_key, path = %path.display(), "failed to save page text: {e}");
                }
            }
        } else {
            debug!(url = %landed_key, "no visible text on page");
        }

        if depth < config.max_depth {
            enqueue_internal_links(
                config,
                &page.html,
                &landed_normalized,
                depth,
                globally_processed,
                &mut queue,
                &mut jobs,
                &mut enqueued,
                &mut seq,
            );
        }
    }

    if !pages.is_empty() {
        info!(company = company_name, pages = pages.len(), "site scrape complete");
        ScrapeOutcome {
            pages,
            status: ScrapeStatus::Success,
            landed_entry_url: landed_entry,
        }
    } else if entry_dedup_hit {
        ScrapeOutcome::failed(ScrapeStatus::AlreadyProcessed, landed_entry)
    } else {
        warn!(company = company_name, "scrape finished without salvaging any text");
        ScrapeOutcome::failed(ScrapeStatus::NoContentScraped, landed_entry)
    }
}

async fn fetch_entry_with_retry(
    fetcher: &dyn PageFetcher,
    url: &Url,
    settings: &FetchSettings,
    config: &ScraperConfig,
) -> Result<crate::fetcher::FetchedPage, FetchError> {
    let mut attempt = 0;
    loop {
        match fetcher.fetch(url, settings).await {
            Ok(page) => return Ok(page),
            Err(e) => {
                let transient = e.to_status().is_transient();
                if !transient || attempt >= config.max_retries {
                    return Err(e);
                }
                attempt += 1;
                warn!(url = %url, attempt, "entry fetch failed, retrying: {e}");
                tokio::time::sleep(Duration::from_secs(config.retry_delay_seconds)).await;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn enqueue_internal_links(
    config: &ScraperConfig,
    html: &str,
    base: &Url,
    depth: u32,
    globally_processed: &DashSet<String>,
    queue: &mut PriorityQueue<String, LinkPriority>,
    jobs: &mut HashMap<String, (Url, u32)>,
    enqueued: &mut HashSet<String>,
    seq: &mut u64,
) {
    let base_host = base.host_str().unwrap_or("");
    let mut added = 0usize;

    for link in extract_links(html, base) {
        let normalized = normalize_url(&link.url, &config.ignored_query_params);
        if normalized.host_str().unwrap_or("") != base_host {
            continue;
        }
        let key = normalized.to_string();
        if enqueued.contains(&key) || globally_processed.contains(&key) {
            continue;
        }
        let Some(score) = score_link(config, &link.text, &normalized) else {
            debug!(url = %key, "link excluded by path pattern");
            continue;
        };
        if score < config.min_score_to_queue {
            continue;
        }
        *seq += 1;
        queue.push(key.clone(), LinkPriority { score, seq: *seq });
        jobs.insert(key.clone(), (normalized, depth + 1));
        enqueued.insert(key);
        added += 1;
    }

    if added > 0 {
        debug!(base = %base, added, "internal links enqueued");
    }
}
