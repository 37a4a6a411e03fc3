use std::collections::BTreeMap;

use crate::types::TokenUsage;

/// Counters collected over one run and rendered into the metrics markdown.
#[derive(Debug, Clone, Default)]
pub struct RunMetrics {
    pub run_id: String,
    pub input_rows: u64,
    pub rows_processed_pass1: u64,
    pub rows_failed_pass1: u64,
    /// Failure-CSV stage label -> count.
    pub row_failure_counts: BTreeMap<String, u64>,
    pub scraping: ScrapingStats,
    pub regex: RegexStats,
    pub llm: LlmStats,
    pub reports: ReportStats,
    pub durations: TaskDurations,
    pub errors_encountered: Vec<String>,
}

impl RunMetrics {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            ..Self::default()
        }
    }

    pub fn count_row_failure(&mut self, stage: &str) {
        *self.row_failure_counts.entry(stage.to_string()).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScrapingStats {
    pub urls_processed: u64,
    pub success: u64,
    pub invalid_url: u64,
    pub already_processed: u64,
    pub failures: u64,
    pub new_canonical_sites: u64,
    pub pages_scraped_total: u64,
    pub pages_by_type: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default)]
pub struct RegexStats {
    pub sites_processed: u64,
    pub sites_with_candidates: u64,
    pub candidates_total: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LlmStats {
    pub sites_processed: u64,
    pub calls_success: u64,
    pub failures_prompt_missing: u64,
    pub failures_processing: u64,
    pub sites_without_candidates: u64,
    pub numbers_raw_total: u64,
    pub calls_with_token_data: u64,
    pub token_usage: TokenUsage,
}

#[derive(Debug, Clone, Default)]
pub struct ReportStats {
    pub summary_rows: u64,
    pub detailed_rows: u64,
    pub top_contact_rows: u64,
    pub final_contact_rows: u64,
    pub attrition_rows: u64,
}

/// Wall-clock spent per pipeline stage, in seconds.
#[derive(Debug, Clone, Default)]
pub struct TaskDurations {
    pub load_input_secs: f64,
    pub scrape_total_secs: f64,
    pub regex_total_secs: f64,
    pub llm_total_secs: f64,
    pub pass1_loop_secs: f64,
    pub report_pass_secs: f64,
    pub total_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_failure_counter_accumulates() {
        let mut metrics = RunMetrics::new("20260801_120000");
        metrics.count_row_failure("URL_Validation_InvalidOrMissing");
        metrics.count_row_failure("URL_Validation_InvalidOrMissing");
        metrics.count_row_failure("LLM_Processing_GeneralError");
        assert_eq!(metrics.row_failure_counts["URL_Validation_InvalidOrMissing"], 2);
        assert_eq!(metrics.row_failure_counts["LLM_Processing_GeneralError"], 1);
    }
}
