//! Final per-row outcome attribution.
//!
//! A pure function over statuses recorded during the run: it never re-fetches
//! and never calls the classifier. The decision tree is first-match-wins;
//! every input row gets exactly one reason from the closed set.

use phonescout_core::{
    LlmSiteStatus, OutcomeReason, RowOutcome, ScrapeStatus, SiteContactDetails,
};

use crate::consolidate::is_top_contact_eligible;

/// Everything the classifier is allowed to look at for one row.
#[derive(Debug, Clone, Copy)]
pub struct RowOutcomeInputs<'a> {
    /// Scrape status recorded for this row's input URL.
    pub initial_scrape_status: ScrapeStatus,
    /// The row's canonical site key, if one was derived.
    pub canonical_url: Option<&'a str>,
    /// Overall scrape status recorded for the canonical site.
    pub canonical_status: Option<ScrapeStatus>,
    /// Status of every pathful URL recorded under the canonical key.
    pub pathful_statuses: &'a [ScrapeStatus],
    /// Consolidated details for the canonical, when consolidation ran.
    pub site_details: Option<&'a SiteContactDetails>,
    /// Whether the extractor found any candidates for the canonical.
    pub regex_candidates_found: Option<bool>,
    /// LLM stage record for the canonical.
    pub llm_status: Option<LlmSiteStatus>,
    /// Length of the raw classified list per pathful URL under the key.
    pub raw_llm_counts_by_pathful: &'a [usize],
}

pub fn determine_row_outcome(inputs: &RowOutcomeInputs<'_>) -> RowOutcome {
    RowOutcome::new(decide(inputs))
}

fn decide(inputs: &RowOutcomeInputs<'_>) -> OutcomeReason {
    if inputs.initial_scrape_status == ScrapeStatus::InvalidUrl {
        return OutcomeReason::InputUrlInvalid;
    }
    if inputs.initial_scrape_status == ScrapeStatus::MaxRedirects {
        return OutcomeReason::SkippedMaxRedirects;
    }

    let reportable_numbers = inputs
        .site_details
        .map(|details| {
            details
                .consolidated_numbers
                .iter()
                .filter(|n| is_top_contact_eligible(n))
                .count()
        })
        .unwrap_or(0);
    if reportable_numbers > 0 {
        return OutcomeReason::ContactExtracted;
    }

    let Some(_canonical) = inputs.canonical_url else {
        let initial = inputs.initial_scrape_status;
        if initial != ScrapeStatus::Success && initial != ScrapeStatus::NotRun {
            return OutcomeReason::ScrapingFailureInputUrl(initial);
        }
        return OutcomeReason::NoCanonicalUrlDetermined;
    };

    let canonical_status = inputs.canonical_status.unwrap_or(ScrapeStatus::NotRun);
    if canonical_status != ScrapeStatus::Success {
        let statuses = inputs.pathful_statuses;
        if !statuses.is_empty() {
            if statuses.iter().all(ScrapeStatus::is_network_failure) {
                return OutcomeReason::ScrapingAllAttemptsFailedNetwork;
            }
            if statuses.iter().all(ScrapeStatus::is_access_denied) {
                return OutcomeReason::ScrapingAllAttemptsFailedAccessDenied;
            }
            if statuses.iter().all(ScrapeStatus::is_not_found) {
                return OutcomeReason::ScrapingContentNotFoundAllAttempts;
            }
        }
        return OutcomeReason::ScrapingFailedCanonical(canonical_status);
    }

    if inputs.initial_scrape_status == ScrapeStatus::AlreadyProcessed {
        return OutcomeReason::CanonicalDuplicateSkipped;
    }

    if !inputs.regex_candidates_found.unwrap_or(false) {
        return OutcomeReason::NoRegexCandidatesFound;
    }

    let Some(details) = inputs.site_details else {
        return match inputs.llm_status {
            Some(LlmSiteStatus::PromptMissing) | Some(LlmSiteStatus::ProcessingError) => {
                OutcomeReason::LlmProcessingErrorAllAttempts
            }
            _ => OutcomeReason::LlmNoInputNoRegexCandidates,
        };
    };

    let eligible_empty = !details.consolidated_numbers.iter().any(is_top_contact_eligible);
    if eligible_empty {
        let all_raw_empty = inputs.raw_llm_counts_by_pathful.iter().all(|&count| count == 0);
        if all_raw_empty {
            return OutcomeReason::LlmOutputNoNumbersFound;
        }
        return OutcomeReason::LlmOutputNoneRelevant;
    }

    OutcomeReason::ProcessingGapNoContact
}
