//! Pipeline orchestration: drives canonicalization, scraping, extraction and
//! classification over every input row, then reduces the recorded state into
//! the run's reports.
//!
//! All mutable run state lives in one `RunContext` threaded to the workers:
//! the cross-row URL dedup set, the per-canonical caches and the metrics.
//! Workers own whole rows; a per-canonical async gate guarantees that each
//! canonical site is scraped and classified at most once per run.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Local;
use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use phonescout_canonical::{canonical_base_url, normalize_url, prepare_scrape_url};
use phonescout_classifier::LlmClassifier;
use phonescout_core::config::AppConfig;
use phonescout_core::metrics::RunMetrics;
use phonescout_core::{
    FailureStage, InputRecord, LlmSiteStatus, ScrapeStatus, ScrapedPage, SiteContactDetails,
};
use phonescout_extractor::extract_candidates;
use phonescout_phone::{normalize_phone, NormalizedPhone};
use phonescout_report::metrics_writer::write_run_metrics;
use phonescout_report::rows::{
    aggregate_company_label, build_final_contact_rows, build_top_contacts_row, eligible_numbers,
    joined_source_urls, joined_types, AttritionRow, DetailedRow, SummaryRow, TopContactsRow,
};
use phonescout_report::writers::{write_rows, FailureLog};
use phonescout_report::{consolidate_site, RowOutcomeInputs};
use phonescout_scraper::{scrape_site, PageFetcher, RobotsGate, ScrapeOutcome};

const LLM_CONTEXT_SUBDIR: &str = "llm_context";

/// Typed result of processing one input row in pass 1.
struct RowRecord {
    row: InputRecord,
    initial_status: ScrapeStatus,
    canonical_url: Option<String>,
    normalized_phone: NormalizedPhone,
}

/// Run-lifetime shared state.
struct RunContext {
    config: AppConfig,
    run_id: String,
    run_dir: PathBuf,
    /// Landed normalized URLs already saved this run (insert-if-absent).
    globally_processed_urls: DashSet<String>,
    /// Canonical key -> classified numbers from its single LLM pass.
    canonical_results: DashMap<String, Vec<phonescout_core::ClassifiedPhone>>,
    /// Canonical key -> overall scrape status of its one scrape.
    canonical_status: DashMap<String, ScrapeStatus>,
    /// Canonical key -> normalized landed entry URL.
    canonical_landed: DashMap<String, String>,
    /// Canonical key -> (pathful URL, status) per input row under the key.
    pathful_statuses: DashMap<String, Vec<(String, ScrapeStatus)>>,
    /// Canonical key -> raw classified-list length per classification call.
    canonical_raw_counts: DashMap<String, Vec<usize>>,
    regex_found: DashMap<String, bool>,
    llm_status: DashMap<String, LlmSiteStatus>,
    llm_error_details: DashMap<String, String>,
    /// Canonical key -> every original input URL that resolved to it.
    canonical_inputs: DashMap<String, Vec<String>>,
    canonical_gates: DashMap<String, Arc<Mutex<()>>>,
    metrics: std::sync::Mutex<RunMetrics>,
    failure_log: FailureLog,
}

impl RunContext {
    fn gate(&self, canonical: &str) -> Arc<Mutex<()>> {
        self.canonical_gates
            .entry(canonical.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn metrics(&self) -> std::sync::MutexGuard<'_, RunMetrics> {
        match self.metrics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Execute one batch run. `rows` come from the input collaborator; the
/// fetcher is injected so tests can script it.
pub async fn run_pipeline(
    config: AppConfig,
    run_id: String,
    run_dir: PathBuf,
    rows: Vec<InputRecord>,
    fetcher: Arc<dyn PageFetcher>,
) -> Result<()> {
    let started_at = Local::now();
    let run_start = Instant::now();

    let robots = Arc::new(RobotsGate::new(
        config.robots.respect,
        &config.robots.user_agent,
    )?);
    let classifier = Arc::new(LlmClassifier::new(config.llm.clone(), config.phone.clone())?);
    let failure_log = FailureLog::create(&run_dir.join(format!("failed_rows_{run_id}.csv")))?;

    let concurrency = config.scraper.concurrency.max(1);
    let ctx = Arc::new(RunContext {
        config,
        run_id: run_id.clone(),
        run_dir,
        globally_processed_urls: DashSet::new(),
        canonical_results: DashMap::new(),
        canonical_status: DashMap::new(),
        canonical_landed: DashMap::new(),
        pathful_statuses: DashMap::new(),
        canonical_raw_counts: DashMap::new(),
        regex_found: DashMap::new(),
        llm_status: DashMap::new(),
        llm_error_details: DashMap::new(),
        canonical_inputs: DashMap::new(),
        canonical_gates: DashMap::new(),
        metrics: std::sync::Mutex::new(RunMetrics::new(&run_id)),
        failure_log,
    });
    ctx.metrics().input_rows = rows.len() as u64;

    info!(rows = rows.len(), concurrency, run_id = %run_id, "pass 1 starting");
    let pass1_start = Instant::now();

    let jobs: Arc<Mutex<VecDeque<InputRecord>>> = Arc::new(Mutex::new(rows.into_iter().collect()));
    let (result_tx, mut result_rx) = mpsc::channel::<RowRecord>(64);

    let mut worker_handles = Vec::new();
    for worker_id in 0..concurrency {
        let jobs = Arc::clone(&jobs);
        let ctx = Arc::clone(&ctx);
        let fetcher = Arc::clone(&fetcher);
        let robots = Arc::clone(&robots);
        let classifier = Arc::clone(&classifier);
        let result_tx = result_tx.clone();

        worker_handles.push(tokio::spawn(async move {
            loop {
                let Some(row) = jobs.lock().await.pop_front() else {
                    break;
                };
                let record =
                    process_row(&ctx, fetcher.as_ref(), &robots, &classifier, row).await;
                if result_tx.send(record).await.is_err() {
                    break;
                }
            }
            tracing::debug!(worker_id, "row worker finished");
        }));
    }
    drop(result_tx);

    // Reduce worker output into input order; completion order must not leak
    // into the reports.
    let mut records: BTreeMap<u64, RowRecord> = BTreeMap::new();
    while let Some(record) = result_rx.recv().await {
        ctx.metrics().rows_processed_pass1 += 1;
        records.insert(record.row.row_id, record);
    }
    for handle in worker_handles {
        let _ = handle.await;
    }
    ctx.metrics().durations.pass1_loop_secs = pass1_start.elapsed().as_secs_f64();

    info!(records = records.len(), "pass 1 complete, building reports");
    let report_start = Instant::now();
    let attrition = build_reports(&ctx, &records)?;
    {
        let mut metrics = ctx.metrics();
        metrics.durations.report_pass_secs = report_start.elapsed().as_secs_f64();
        metrics.durations.total_secs = run_start.elapsed().as_secs_f64();
    }

    write_run_metrics(&ctx.metrics().clone(), &attrition, &ctx.run_dir, started_at)?;
    info!(run_id = %run_id, "run complete");
    Ok(())
}

/// Pass 1 for one row: canonicalize, scrape (once per canonical), extract
/// and classify. Never propagates an error out; every fault is recorded.
async fn process_row(
    ctx: &RunContext,
    fetcher: &dyn PageFetcher,
    robots: &RobotsGate,
    classifier: &LlmClassifier,
    row: InputRecord,
) -> RowRecord {
    let normalized_phone = match row.given_phone.as_deref() {
        Some(phone) => normalize_phone(
            phone,
            &row.target_country_codes,
            Some(&ctx.config.phone.default_region_code),
        ),
        None => NormalizedPhone::Empty,
    };

    info!(
        row_id = row.row_id,
        company = %row.company_name,
        url = row.given_url.as_deref().unwrap_or("<none>"),
        "processing row"
    );

    let prepared = match prepare_scrape_url(
        row.given_url.as_deref(),
        &ctx.config.scraper.probing_tlds,
    )
    .await
    {
        Ok(url) => url,
        Err(e) => {
            warn!(row_id = row.row_id, "invalid input URL: {e}");
            ctx.metrics().scraping.invalid_url += 1;
            ctx.metrics().rows_failed_pass1 += 1;
            ctx.metrics().count_row_failure(&FailureStage::UrlValidation.to_string());
            ctx.failure_log.append(
                row.row_id,
                &row.company_name,
                row.given_url.as_deref(),
                &FailureStage::UrlValidation,
                "invalid or missing URL after preprocessing",
                &e.to_string(),
            );
            return RowRecord {
                row,
                initial_status: ScrapeStatus::InvalidUrl,
                canonical_url: None,
                normalized_phone,
            };
        }
    };

    let pathful_key = normalize_url(&prepared, &ctx.config.scraper.ignored_query_params).to_string();

    if let Some(canonical) = canonical_base_url(prepared.as_str()) {
        if let Some(given) = row.given_url.as_deref() {
            ctx.canonical_inputs
                .entry(canonical.clone())
                .or_default()
                .push(given.to_string());
        }

        // At most one scrape+classification per canonical site.
        let gate = ctx.gate(&canonical);
        let _guard = gate.lock().await;

        if ctx.canonical_status.contains_key(&canonical) {
            info!(
                row_id = row.row_id,
                canonical = %canonical,
                "canonical already handled this run, row marked as duplicate"
            );
            ctx.pathful_statuses
                .entry(canonical.clone())
                .or_default()
                .push((pathful_key, ScrapeStatus::AlreadyProcessed));
            ctx.metrics().scraping.already_processed += 1;
            return RowRecord {
                row,
                initial_status: ScrapeStatus::AlreadyProcessed,
                canonical_url: Some(canonical),
                normalized_phone,
            };
        }

        ctx.metrics().scraping.urls_processed += 1;
        let scrape_start = Instant::now();
        let outcome = scrape_site(
            fetcher,
            robots,
            &ctx.config.scraper,
            &prepared,
            &ctx.run_dir,
            &row.company_name,
            &ctx.globally_processed_urls,
        )
        .await;
        ctx.metrics().durations.scrape_total_secs += scrape_start.elapsed().as_secs_f64();

        record_scrape_outcome(ctx, classifier, &row, &canonical, pathful_key, &outcome).await;
        return RowRecord {
            row,
            initial_status: outcome.status,
            canonical_url: Some(canonical),
            normalized_phone,
        };
    }

    // No key derivable before scraping: TLD probing left a bare host. The
    // scrape still runs and the landed URL may reveal the site's identity.
    info!(row_id = row.row_id, url = %prepared, "no canonical key before scrape, proceeding");
    ctx.metrics().scraping.urls_processed += 1;
    let scrape_start = Instant::now();
    let outcome = scrape_site(
        fetcher,
        robots,
        &ctx.config.scraper,
        &prepared,
        &ctx.run_dir,
        &row.company_name,
        &ctx.globally_processed_urls,
    )
    .await;
    ctx.metrics().durations.scrape_total_secs += scrape_start.elapsed().as_secs_f64();

    let canonical = outcome
        .landed_entry_url
        .as_deref()
        .and_then(canonical_base_url);
    match &canonical {
        Some(key) => {
            if let Some(given) = row.given_url.as_deref() {
                ctx.canonical_inputs
                    .entry(key.clone())
                    .or_default()
                    .push(given.to_string());
            }
            let gate = ctx.gate(key);
            let _guard = gate.lock().await;
            if ctx.canonical_status.contains_key(key) {
                ctx.pathful_statuses
                    .entry(key.clone())
                    .or_default()
                    .push((pathful_key, ScrapeStatus::AlreadyProcessed));
                ctx.metrics().scraping.already_processed += 1;
                return RowRecord {
                    row,
                    initial_status: ScrapeStatus::AlreadyProcessed,
                    canonical_url: canonical.clone(),
                    normalized_phone,
                };
            }
            record_scrape_outcome(ctx, classifier, &row, key, pathful_key, &outcome).await;
        }
        None => {
            if outcome.status != ScrapeStatus::Success
                && outcome.status != ScrapeStatus::AlreadyProcessed
            {
                ctx.metrics().scraping.failures += 1;
                ctx.metrics().rows_failed_pass1 += 1;
                let stage = FailureStage::Scraping(outcome.status);
                ctx.metrics().count_row_failure(&stage.to_string());
                ctx.failure_log.append(
                    row.row_id,
                    &row.company_name,
                    row.given_url.as_deref(),
                    &stage,
                    "entry-point scrape failed",
                    "no canonical site key derived",
                );
            }
        }
    }

    RowRecord {
        row,
        initial_status: outcome.status,
        canonical_url: canonical,
        normalized_phone,
    }
}

/// Record a fresh scrape under its canonical key and run extraction plus
/// classification when the entry point succeeded.
async fn record_scrape_outcome(
    ctx: &RunContext,
    classifier: &LlmClassifier,
    row: &InputRecord,
    canonical: &str,
    pathful_key: String,
    outcome: &ScrapeOutcome,
) {
    ctx.pathful_statuses
        .entry(canonical.to_string())
        .or_default()
        .push((pathful_key, outcome.status));
    ctx.canonical_status
        .insert(canonical.to_string(), outcome.status);
    if let Some(landed) = &outcome.landed_entry_url {
        ctx.canonical_landed
            .insert(canonical.to_string(), landed.clone());
    }

    match outcome.status {
        ScrapeStatus::Success => {
            {
                let mut metrics = ctx.metrics();
                metrics.scraping.success += 1;
                metrics.scraping.new_canonical_sites += 1;
            }
            classify_canonical(ctx, classifier, row, canonical, &outcome.pages).await;
        }
        ScrapeStatus::AlreadyProcessed => {
            ctx.metrics().scraping.already_processed += 1;
        }
        status => {
            ctx.metrics().scraping.failures += 1;
            ctx.metrics().rows_failed_pass1 += 1;
            let stage = FailureStage::Scraping(status);
            ctx.metrics().count_row_failure(&stage.to_string());
            ctx.failure_log.append(
                row.row_id,
                &row.company_name,
                row.given_url.as_deref(),
                &stage,
                "entry-point scrape failed",
                &format!("canonical: {canonical}"),
            );
        }
    }
}

/// Regex extraction and the single LLM pass for a freshly scraped canonical.
async fn classify_canonical(
    ctx: &RunContext,
    classifier: &LlmClassifier,
    row: &InputRecord,
    canonical: &str,
    pages: &[ScrapedPage],
) {
    {
        let mut metrics = ctx.metrics();
        metrics.regex.sites_processed += 1;
        metrics.scraping.pages_scraped_total += pages.len() as u64;
        for page in pages {
            *metrics
                .scraping
                .pages_by_type
                .entry(page.page_type.as_str().to_string())
                .or_insert(0) += 1;
        }
    }

    let regex_start = Instant::now();
    let mut candidates = Vec::new();
    for page in pages {
        match std::fs::read_to_string(&page.text_path) {
            Ok(text) => candidates.extend(extract_candidates(
                &text,
                &page.landed_url,
                &row.company_name,
                &row.target_country_codes,
                ctx.config.data.snippet_window_chars,
            )),
            Err(e) => {
                warn!(path = %page.text_path.display(), "cannot read scraped page: {e}");
                ctx.metrics().count_row_failure(&FailureStage::RegexFileRead.to_string());
                ctx.metrics()
                    .errors_encountered
                    .push(format!("page read failed: {}", page.text_path.display()));
                ctx.failure_log.append(
                    row.row_id,
                    &row.company_name,
                    row.given_url.as_deref(),
                    &FailureStage::RegexFileRead,
                    "error reading scraped content file",
                    &format!("{}: {e}", page.text_path.display()),
                );
            }
        }
    }
    ctx.metrics().durations.regex_total_secs += regex_start.elapsed().as_secs_f64();

    let found = !candidates.is_empty();
    ctx.regex_found.insert(canonical.to_string(), found);
    info!(
        canonical = canonical,
        candidates = candidates.len(),
        "regex extraction complete"
    );

    if !found {
        ctx.canonical_results.insert(canonical.to_string(), Vec::new());
        ctx.canonical_raw_counts
            .entry(canonical.to_string())
            .or_default()
            .push(0);
        ctx.metrics().llm.sites_without_candidates += 1;
        return;
    }
    {
        let mut metrics = ctx.metrics();
        metrics.regex.sites_with_candidates += 1;
        metrics.regex.candidates_total += candidates.len() as u64;
        metrics.llm.sites_processed += 1;
    }

    let template_path = PathBuf::from(&ctx.config.llm.prompt_template_path);
    if !template_path.exists() {
        warn!(path = %template_path.display(), "LLM prompt template missing");
        ctx.llm_status
            .insert(canonical.to_string(), LlmSiteStatus::PromptMissing);
        ctx.llm_error_details.insert(
            canonical.to_string(),
            format!("prompt template not found at {}", template_path.display()),
        );
        ctx.canonical_results.insert(canonical.to_string(), Vec::new());
        ctx.canonical_raw_counts
            .entry(canonical.to_string())
            .or_default()
            .push(0);
        ctx.metrics().llm.failures_prompt_missing += 1;
        ctx.metrics().rows_failed_pass1 += 1;
        ctx.metrics().count_row_failure(&FailureStage::LlmPromptMissing.to_string());
        ctx.failure_log.append(
            row.row_id,
            &row.company_name,
            row.given_url.as_deref(),
            &FailureStage::LlmPromptMissing,
            "LLM prompt template file not found",
            &template_path.display().to_string(),
        );
        return;
    }

    let prefix = format!("CANONICAL_{}", file_prefix_for(canonical));
    let context_dir = ctx.run_dir.join(LLM_CONTEXT_SUBDIR);
    let llm_start = Instant::now();
    let output = classifier
        .classify(&candidates, &template_path, &context_dir, &prefix)
        .await;
    ctx.metrics().durations.llm_total_secs += llm_start.elapsed().as_secs_f64();

    {
        let mut metrics = ctx.metrics();
        metrics.llm.token_usage.add(&output.token_usage);
        if output.token_usage.total_tokens > 0 {
            metrics.llm.calls_with_token_data += 1;
        }
        metrics.llm.calls_success += 1;
        metrics.llm.numbers_raw_total += output.results.len() as u64;
    }

    // The classifier never errors out: call-level faults come back as tagged
    // items. Those are stored and consolidated like any other result; their
    // Non-Business classification keeps them out of the Top-Contacts report.
    if let Some(tag) = output.results.iter().find_map(|r| r.error_tag.as_deref()) {
        warn!(canonical = canonical, tag = tag, "classified items carry error tags");
    }
    ctx.llm_status
        .insert(canonical.to_string(), LlmSiteStatus::Completed);
    ctx.canonical_raw_counts
        .entry(canonical.to_string())
        .or_default()
        .push(output.results.len());
    ctx.canonical_results
        .insert(canonical.to_string(), output.results);
}

/// Filesystem-safe fragment of a canonical URL for LLM context filenames.
fn file_prefix_for(canonical: &str) -> String {
    canonical
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(100)
        .collect()
}

/// Consolidate every canonical with a completed classification.
fn consolidated_details(
    ctx: &RunContext,
    records: &BTreeMap<u64, RowRecord>,
) -> HashMap<String, SiteContactDetails> {
    let mut details = HashMap::new();
    for entry in ctx.canonical_results.iter() {
        let canonical = entry.key();
        let llm_status = ctx.llm_status.get(canonical).map(|s| *s);
        if entry.value().is_empty()
            && matches!(
                llm_status,
                Some(LlmSiteStatus::PromptMissing) | Some(LlmSiteStatus::ProcessingError)
            )
        {
            continue;
        }

        let company_name = records
            .values()
            .find(|r| r.canonical_url.as_deref() == Some(canonical))
            .map(|r| r.row.company_name.clone());
        let input_urls: Vec<String> = ctx
            .canonical_inputs
            .get(canonical)
            .map(|urls| {
                let unique: BTreeSet<String> = urls.iter().cloned().collect();
                unique.into_iter().collect()
            })
            .unwrap_or_default();

        details.insert(
            canonical.clone(),
            consolidate_site(
                entry.value(),
                company_name.as_deref(),
                canonical,
                &input_urls,
            ),
        );
    }
    details
}

fn build_reports(
    ctx: &RunContext,
    records: &BTreeMap<u64, RowRecord>,
) -> Result<Vec<AttritionRow>> {
    let details = consolidated_details(ctx, records);

    let mut summary_rows = Vec::with_capacity(records.len());
    let mut detailed_rows = Vec::new();
    let mut canonical_order: Vec<String> = Vec::new();
    let mut seen_canonicals: BTreeSet<String> = BTreeSet::new();

    for record in records.values() {
        let canonical = record.canonical_url.as_deref().unwrap_or("");
        if !canonical.is_empty() && seen_canonicals.insert(canonical.to_string()) {
            canonical_order.push(canonical.to_string());
        }

        let site = record
            .canonical_url
            .as_deref()
            .and_then(|c| details.get(c));
        let outcome = determine_row_outcome(&outcome_inputs_for(ctx, record, site));

        let eligible = site.map(eligible_numbers).unwrap_or_default();
        let mut summary = SummaryRow {
            input_row_id: record.row.row_id,
            company_name: record.row.company_name.clone(),
            given_url: record.row.given_url.clone().unwrap_or_default(),
            given_phone: record.row.given_phone.clone().unwrap_or_default(),
            normalized_given_phone: record
                .normalized_phone
                .as_e164()
                .unwrap_or_default()
                .to_string(),
            original_number_status: original_number_status(record, site),
            description: record.row.description.clone().unwrap_or_default(),
            scraping_status: record.initial_status.to_string(),
            canonical_entry_url: canonical.to_string(),
            outcome_reason: outcome.reason.label(),
            fault_category: outcome.fault_category().to_string(),
            run_id: ctx.run_id.clone(),
            ..SummaryRow::default()
        };
        for (i, number) in eligible.iter().take(3).enumerate() {
            let types = joined_types(number);
            let sources = joined_source_urls(number);
            match i {
                0 => {
                    summary.top_number_1 = number.number.clone();
                    summary.top_type_1 = types;
                    summary.top_source_url_1 = sources;
                }
                1 => {
                    summary.top_number_2 = number.number.clone();
                    summary.top_type_2 = types;
                    summary.top_source_url_2 = sources;
                }
                _ => {
                    summary.top_number_3 = number.number.clone();
                    summary.top_type_3 = types;
                    summary.top_source_url_3 = sources;
                }
            }
        }
        summary_rows.push(summary);

        if let Some(site) = site {
            let canonical_status = ctx
                .canonical_status
                .get(canonical)
                .map(|s| s.to_string())
                .unwrap_or_else(|| ScrapeStatus::NotRun.to_string());
            for number in &site.consolidated_numbers {
                detailed_rows.push(DetailedRow {
                    input_row_id: record.row.row_id,
                    company_name: record.row.company_name.clone(),
                    given_url: record.row.given_url.clone().unwrap_or_default(),
                    canonical_entry_url: canonical.to_string(),
                    number: number.number.clone(),
                    llm_type: joined_types(number),
                    llm_classification: number.classification.clone(),
                    llm_source_url: joined_source_urls(number),
                    scraping_status: canonical_status.clone(),
                    target_country_codes: record.row.target_country_codes.join(","),
                    run_id: ctx.run_id.clone(),
                });
            }
        }
    }

    // Top-Contacts: one aggregated row per canonical, in first-seen order.
    let mut top_rows: Vec<TopContactsRow> = Vec::new();
    for canonical in &canonical_order {
        let Some(site) = details.get(canonical) else {
            continue;
        };
        let mut companies: BTreeSet<String> = BTreeSet::new();
        let mut given_urls: BTreeSet<String> = BTreeSet::new();
        for record in records.values() {
            if record.canonical_url.as_deref() == Some(canonical) {
                companies.insert(record.row.company_name.clone());
                if let Some(url) = &record.row.given_url {
                    given_urls.insert(url.clone());
                }
            }
        }
        let status = ctx
            .canonical_status
            .get(canonical)
            .map(|s| s.to_string())
            .unwrap_or_else(|| ScrapeStatus::NotRun.to_string());
        if let Some(row) = build_top_contacts_row(
            aggregate_company_label(canonical, &companies),
            given_urls.into_iter().collect::<Vec<_>>().join(", "),
            canonical,
            &status,
            site,
        ) {
            top_rows.push(row);
        }
    }
    let final_rows = build_final_contact_rows(&top_rows);
    let attrition_rows = build_attrition_rows(ctx, records, &details);

    let run_dir = &ctx.run_dir;
    let run_id = &ctx.run_id;
    write_rows(&run_dir.join(format!("summary_report_{run_id}.csv")), &summary_rows)?;
    write_rows(&run_dir.join(format!("detailed_report_{run_id}.csv")), &detailed_rows)?;
    write_rows(&run_dir.join(format!("top_contacts_report_{run_id}.csv")), &top_rows)?;
    write_rows(
        &run_dir.join(format!("final_processed_contacts_{run_id}.csv")),
        &final_rows,
    )?;
    write_rows(
        &run_dir.join(format!("row_attrition_report_{run_id}.csv")),
        &attrition_rows,
    )
    .context("attrition report")?;

    let mut metrics = ctx.metrics();
    metrics.reports.summary_rows = summary_rows.len() as u64;
    metrics.reports.detailed_rows = detailed_rows.len() as u64;
    metrics.reports.top_contact_rows = top_rows.len() as u64;
    metrics.reports.final_contact_rows = final_rows.len() as u64;
    metrics.reports.attrition_rows = attrition_rows.len() as u64;
    drop(metrics);
    Ok(attrition_rows)
}

fn build_attrition_rows(
    ctx: &RunContext,
    records: &BTreeMap<u64, RowRecord>,
    details: &HashMap<String, SiteContactDetails>,
) -> Vec<AttritionRow> {
    records
        .values()
        .filter_map(|record| {
            let site = record
                .canonical_url
                .as_deref()
                .and_then(|c| details.get(c));
            let outcome = determine_row_outcome(&outcome_inputs_for(ctx, record, site));
            if outcome.reason == phonescout_core::OutcomeReason::ContactExtracted {
                return None;
            }
            let canonical = record.canonical_url.as_deref().unwrap_or("");
            let relevant = record
                .canonical_url
                .as_deref()
                .and_then(|c| ctx.canonical_landed.get(c).map(|l| l.clone()))
                .unwrap_or_else(|| canonical.to_string());
            Some(AttritionRow {
                input_row_id: record.row.row_id,
                company_name: record.row.company_name.clone(),
                given_url: record.row.given_url.clone().unwrap_or_default(),
                outcome_reason: outcome.reason.label(),
                fault_category: outcome.fault_category().to_string(),
                relevant_canonical_urls: relevant,
                llm_error_detail: record
                    .canonical_url
                    .as_deref()
                    .and_then(|c| ctx.llm_error_details.get(c).map(|d| d.clone()))
                    .unwrap_or_default(),
                timestamp: Local::now().to_rfc3339(),
            })
        })
        .collect()
}

fn outcome_inputs_for<'a>(
    ctx: &RunContext,
    record: &'a RowRecord,
    site: Option<&'a SiteContactDetails>,
) -> OwnedOutcomeInputs<'a> {
    let canonical = record.canonical_url.as_deref();
    let canonical_status = canonical.and_then(|c| ctx.canonical_status.get(c).map(|s| *s));
    let pathful: Vec<ScrapeStatus> = canonical
        .and_then(|c| {
            ctx.pathful_statuses
                .get(c)
                .map(|v| v.iter().map(|(_, s)| *s).collect())
        })
        .unwrap_or_default();
    let raw_counts: Vec<usize> = canonical
        .and_then(|c| ctx.canonical_raw_counts.get(c).map(|v| v.clone()))
        .unwrap_or_default();
    OwnedOutcomeInputs {
        record,
        site,
        canonical_status,
        pathful,
        raw_counts,
        regex_found: canonical.and_then(|c| ctx.regex_found.get(c).map(|v| *v)),
        llm_status: canonical.and_then(|c| ctx.llm_status.get(c).map(|v| *v)),
    }
}

/// Owning wrapper so the borrowed `RowOutcomeInputs` can be built from
/// cache snapshots without fighting lifetimes at every call site.
struct OwnedOutcomeInputs<'a> {
    record: &'a RowRecord,
    site: Option<&'a SiteContactDetails>,
    canonical_status: Option<ScrapeStatus>,
    pathful: Vec<ScrapeStatus>,
    raw_counts: Vec<usize>,
    regex_found: Option<bool>,
    llm_status: Option<LlmSiteStatus>,
}

fn determine_row_outcome(inputs: &OwnedOutcomeInputs<'_>) -> phonescout_core::RowOutcome {
    phonescout_report::determine_row_outcome(&RowOutcomeInputs {
        initial_scrape_status: inputs.record.initial_status,
        canonical_url: inputs.record.canonical_url.as_deref(),
        canonical_status: inputs.canonical_status,
        pathful_statuses: &inputs.pathful,
        site_details: inputs.site,
        regex_candidates_found: inputs.regex_found,
        llm_status: inputs.llm_status,
        raw_llm_counts_by_pathful: &inputs.raw_counts,
    })
}

/// `Original_Number_Status` for the Summary report.
fn original_number_status(record: &RowRecord, site: Option<&SiteContactDetails>) -> String {
    match &record.normalized_phone {
        NormalizedPhone::Empty => "Original_Not_Provided".to_string(),
        NormalizedPhone::InvalidFormat => "Original_InvalidFormat".to_string(),
        NormalizedPhone::E164(number) => match site {
            Some(site) => {
                if site.consolidated_numbers.iter().any(|c| &c.number == number) {
                    "Verified".to_string()
                } else if !site.consolidated_numbers.is_empty() {
                    "Corrected".to_string()
                } else {
                    "No Relevant Match Found by LLM".to_string()
                }
            }
            None if record.initial_status != ScrapeStatus::Success => {
                format!("Scrape_{}", record.initial_status)
            }
            None => "LLM_Not_Run_Or_NoOutput_For_Canonical".to_string(),
        },
    }
}
