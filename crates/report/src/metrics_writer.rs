//! Human-readable run metrics markdown.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

use phonescout_core::metrics::RunMetrics;
use phonescout_core::PipelineError;

use crate::rows::AttritionRow;

pub fn write_run_metrics(
    metrics: &RunMetrics,
    attrition: &[AttritionRow],
    out_dir: &Path,
    started_at: DateTime<Local>,
) -> Result<PathBuf, PipelineError> {
    let path = out_dir.join(format!("run_metrics_{}.md", metrics.run_id));
    let rendered = render(metrics, attrition, started_at);
    std::fs::write(&path, rendered)?;
    info!(path = %path.display(), "run metrics written");
    Ok(path)
}

fn render(metrics: &RunMetrics, attrition: &[AttritionRow], started_at: DateTime<Local>) -> String {
    let mut out = String::new();
    let d = &metrics.durations;

    let _ = writeln!(out, "# Pipeline Run Metrics: {}\n", metrics.run_id);
    let _ = writeln!(out, "**Run ID:** {}", metrics.run_id);
    let _ = writeln!(out, "**Total Run Duration:** {:.2} seconds", d.total_secs);
    let _ = writeln!(out, "**Pipeline Start Time:** {}", started_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "**Pipeline End Time:** {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"));

    let _ = writeln!(out, "## Task Durations (seconds)\n");
    let _ = writeln!(out, "- **Load Input:** {:.2}", d.load_input_secs);
    let _ = writeln!(out, "- **Scrape Websites (total):** {:.2}", d.scrape_total_secs);
    let _ = writeln!(out, "- **Regex Extraction (total):** {:.2}", d.regex_total_secs);
    let _ = writeln!(out, "- **LLM Classification (total):** {:.2}", d.llm_total_secs);
    let _ = writeln!(out, "- **Pass 1 Row Loop:** {:.2}", d.pass1_loop_secs);
    let _ = writeln!(out, "- **Report Generation:** {:.2}\n", d.report_pass_secs);

    let _ = writeln!(out, "### Average Task Durations\n");
    write_average(&mut out, "Scrape per New Canonical Site", d.scrape_total_secs, metrics.scraping.new_canonical_sites);
    write_average(&mut out, "Regex Extraction per Site", d.regex_total_secs, metrics.regex.sites_processed);
    write_average(&mut out, "LLM Classification per Site", d.llm_total_secs, metrics.llm.sites_processed);
    write_average(&mut out, "Pass 1 Loop per Input Row", d.pass1_loop_secs, metrics.input_rows);
    out.push('\n');

    let _ = writeln!(out, "## Data Processing\n");
    let _ = writeln!(out, "- **Input Rows:** {}", metrics.input_rows);
    let _ = writeln!(out, "- **Rows Processed (Pass 1):** {}", metrics.rows_processed_pass1);
    let _ = writeln!(out, "- **Rows With Failures (Pass 1):** {}\n", metrics.rows_failed_pass1);

    let _ = writeln!(out, "## Scraping\n");
    let s = &metrics.scraping;
    let _ = writeln!(out, "- **URLs Processed:** {}", s.urls_processed);
    let _ = writeln!(out, "- **Successful Scrapes:** {}", s.success);
    let _ = writeln!(out, "- **Invalid URLs:** {}", s.invalid_url);
    let _ = writeln!(out, "- **Duplicate Canonicals Skipped:** {}", s.already_processed);
    let _ = writeln!(out, "- **Scrape Failures:** {}", s.failures);
    let _ = writeln!(out, "- **New Canonical Sites Scraped:** {}", s.new_canonical_sites);
    let _ = writeln!(out, "- **Pages Scraped:** {}", s.pages_scraped_total);
    if !s.pages_by_type.is_empty() {
        let _ = writeln!(out, "- **Pages by Type:**");
        for (page_type, count) in &s.pages_by_type {
            let _ = writeln!(out, "  - {page_type}: {count}");
        }
    }
    out.push('\n');

    let _ = writeln!(out, "## Regex Extraction\n");
    let r = &metrics.regex;
    let _ = writeln!(out, "- **Sites Processed:** {}", r.sites_processed);
    let _ = writeln!(out, "- **Sites With Candidates:** {}", r.sites_with_candidates);
    let _ = writeln!(out, "- **Candidates Found:** {}\n", r.candidates_total);

    let _ = writeln!(out, "## LLM Classification\n");
    let l = &metrics.llm;
    let _ = writeln!(out, "- **Sites Processed:** {}", l.sites_processed);
    let _ = writeln!(out, "- **Successful Calls:** {}", l.calls_success);
    let _ = writeln!(out, "- **Failures (Prompt Missing):** {}", l.failures_prompt_missing);
    let _ = writeln!(out, "- **Failures (Processing):** {}", l.failures_processing);
    let _ = writeln!(out, "- **Sites Without Candidates:** {}", l.sites_without_candidates);
    let _ = writeln!(out, "- **Numbers Returned (raw):** {}", l.numbers_raw_total);
    let _ = writeln!(
        out,
        "- **Token Usage:** prompt {} / completion {} / total {} (from {} calls with usage data)\n",
        l.token_usage.prompt_tokens,
        l.token_usage.completion_tokens,
        l.token_usage.total_tokens,
        l.calls_with_token_data
    );

    let _ = writeln!(out, "## Reports\n");
    let rep = &metrics.reports;
    let _ = writeln!(out, "- **Summary Rows:** {}", rep.summary_rows);
    let _ = writeln!(out, "- **Detailed Rows:** {}", rep.detailed_rows);
    let _ = writeln!(out, "- **Top-Contacts Rows:** {}", rep.top_contact_rows);
    let _ = writeln!(out, "- **Final Processed Rows:** {}", rep.final_contact_rows);
    let _ = writeln!(out, "- **Attrition Rows:** {}\n", rep.attrition_rows);

    let _ = writeln!(out, "## Row-Level Failure Summary\n");
    if metrics.row_failure_counts.is_empty() {
        let _ = writeln!(out, "- No row-level failures recorded.\n");
    } else {
        for (stage, count) in &metrics.row_failure_counts {
            let _ = writeln!(out, "- **{stage}:** {count}");
        }
        out.push('\n');
    }

    let _ = writeln!(out, "## Attrition Summary\n");
    if attrition.is_empty() {
        let _ = writeln!(out, "- Every input row produced a contact.\n");
    } else {
        let mut by_reason: BTreeMap<(&str, &str), u64> = BTreeMap::new();
        for row in attrition {
            *by_reason
                .entry((row.outcome_reason.as_str(), row.fault_category.as_str()))
                .or_insert(0) += 1;
        }
        for ((reason, fault), count) in by_reason {
            let _ = writeln!(out, "- **{reason}** ({fault}): {count}");
        }
        out.push('\n');
    }

    let _ = writeln!(out, "## Errors Encountered\n");
    if metrics.errors_encountered.is_empty() {
        let _ = writeln!(out, "- None.");
    } else {
        for err in &metrics.errors_encountered {
            let _ = writeln!(out, "- {err}");
        }
    }

    out
}

fn write_average(out: &mut String, label: &str, total_secs: f64, count: u64) {
    if count > 0 {
        let _ = writeln!(out, "- **{label}:** {:.2} seconds", total_secs / count as f64);
    } else {
        let _ = writeln!(out, "- **{label}:** N/A");
    }
}
