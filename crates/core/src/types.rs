use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One row of the input table, immutable once loaded.
#[derive(Debug, Clone)]
pub struct InputRecord {
    pub row_id: u64,
    pub company_name: String,
    pub given_url: Option<String>,
    pub given_phone: Option<String>,
    pub description: Option<String>,
    pub target_country_codes: Vec<String>,
}

/// Coarse tag for what kind of page a crawled URL turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageType {
    Landing,
    Contact,
    LegalInfo,
    General,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Landing => "landing",
            PageType::Contact => "contact",
            PageType::LegalInfo => "legal_info",
            PageType::General => "general",
        }
    }
}

/// A page saved by the scraper: cleaned text on disk plus where it came from.
#[derive(Debug, Clone)]
pub struct ScrapedPage {
    pub text_path: PathBuf,
    pub landed_url: String,
    pub page_type: PageType,
}

/// A regex-harvested phone candidate with its surrounding context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneCandidate {
    pub number: String,
    pub source_url: String,
    pub snippet: String,
    pub original_input_company_name: String,
}

/// One number after LLM classification and post-normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedPhone {
    /// E.164 when normalizable, otherwise the raw string the LLM echoed.
    pub number: String,
    pub phone_type: String,
    pub classification: String,
    pub source_url: String,
    pub original_input_company_name: String,
    /// Empty on success; an `Error_*` tag when this item failed a stage.
    pub error_tag: Option<String>,
}

impl ClassifiedPhone {
    pub fn is_error(&self) -> bool {
        self.error_tag.is_some()
    }
}

/// Where a consolidated number was seen, deduped by (url, type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberSource {
    pub phone_type: String,
    pub source_path: String,
    pub source_url: String,
    pub original_input_company_name: String,
}

/// One unique number for a canonical site, carrying its best classification.
#[derive(Debug, Clone)]
pub struct ConsolidatedNumber {
    pub number: String,
    pub classification: String,
    pub sources: Vec<NumberSource>,
}

/// Everything consolidated for one canonical site.
#[derive(Debug, Clone)]
pub struct SiteContactDetails {
    pub canonical_url: String,
    pub company_name: Option<String>,
    pub consolidated_numbers: Vec<ConsolidatedNumber>,
    pub original_input_urls: Vec<String>,
}

/// Closed outcome set for one scrape attempt. The scraper emits these; the
/// outcome classifier matches on variants, never on substrings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeStatus {
    Success,
    InvalidUrl,
    Timeout,
    DnsError,
    ConnectionRefused,
    BrowserError,
    HttpError(u16),
    NoContentScraped,
    RobotsDisallowed,
    MaxRedirects,
    AlreadyProcessed,
    NotRun,
}

impl ScrapeStatus {
    /// Transient failures that warrant an entry-point retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScrapeStatus::Timeout | ScrapeStatus::ConnectionRefused | ScrapeStatus::BrowserError
        )
    }

    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            ScrapeStatus::Timeout
                | ScrapeStatus::DnsError
                | ScrapeStatus::ConnectionRefused
                | ScrapeStatus::BrowserError
        )
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            ScrapeStatus::RobotsDisallowed | ScrapeStatus::HttpError(401) | ScrapeStatus::HttpError(403)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ScrapeStatus::HttpError(404) | ScrapeStatus::HttpError(410))
    }
}

impl fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapeStatus::Success => write!(f, "Success"),
            ScrapeStatus::InvalidUrl => write!(f, "InvalidURL"),
            ScrapeStatus::Timeout => write!(f, "TimeoutError"),
            ScrapeStatus::DnsError => write!(f, "DNSError"),
            ScrapeStatus::ConnectionRefused => write!(f, "ConnectionRefused"),
            ScrapeStatus::BrowserError => write!(f, "BrowserError"),
            ScrapeStatus::HttpError(code) => write!(f, "HTTPError_{code}"),
            ScrapeStatus::NoContentScraped => write!(f, "NoContentScraped"),
            ScrapeStatus::RobotsDisallowed => write!(f, "RobotsDisallowed"),
            ScrapeStatus::MaxRedirects => write!(f, "MaxRedirects_InputURL"),
            ScrapeStatus::AlreadyProcessed => write!(f, "Already_Processed"),
            ScrapeStatus::NotRun => write!(f, "Not_Run"),
        }
    }
}

/// Per-canonical LLM stage record, consulted by the outcome classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmSiteStatus {
    Completed,
    PromptMissing,
    ProcessingError,
}

/// Coarse blame bucket reported alongside every row outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCategory {
    InputData,
    Website,
    PipelineLogic,
    Llm,
    PipelineError,
    Unknown,
    NotApplicable,
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FaultCategory::InputData => "Input Data Issue",
            FaultCategory::Website => "Website Issue",
            FaultCategory::PipelineLogic => "Pipeline Logic/Configuration",
            FaultCategory::Llm => "LLM Issue",
            FaultCategory::PipelineError => "Pipeline Error",
            FaultCategory::Unknown => "Unknown",
            FaultCategory::NotApplicable => "N/A",
        };
        write!(f, "{label}")
    }
}

/// Closed set of final per-row outcome reasons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeReason {
    InputUrlInvalid,
    SkippedMaxRedirects,
    ContactExtracted,
    ScrapingFailureInputUrl(ScrapeStatus),
    NoCanonicalUrlDetermined,
    ScrapingAllAttemptsFailedNetwork,
    ScrapingAllAttemptsFailedAccessDenied,
    ScrapingContentNotFoundAllAttempts,
    ScrapingFailedCanonical(ScrapeStatus),
    CanonicalDuplicateSkipped,
    NoRegexCandidatesFound,
    LlmProcessingErrorAllAttempts,
    LlmNoInputNoRegexCandidates,
    LlmOutputNoNumbersFound,
    LlmOutputNoneRelevant,
    ProcessingGapNoContact,
}

impl OutcomeReason {
    pub fn label(&self) -> String {
        match self {
            OutcomeReason::InputUrlInvalid => "Input_URL_Invalid".to_string(),
            OutcomeReason::SkippedMaxRedirects => {
                "Pipeline_Skipped_MaxRedirects_ForInputURL".to_string()
            }
            OutcomeReason::ContactExtracted => "Contact_Successfully_Extracted".to_string(),
            OutcomeReason::ScrapingFailureInputUrl(status) => {
                format!("ScrapingFailure_InputURL_{status}")
            }
            OutcomeReason::NoCanonicalUrlDetermined => {
                "Unknown_NoCanonicalURLDetermined".to_string()
            }
            OutcomeReason::ScrapingAllAttemptsFailedNetwork => {
                "Scraping_AllAttemptsFailed_Network".to_string()
            }
            OutcomeReason::ScrapingAllAttemptsFailedAccessDenied => {
                "Scraping_AllAttemptsFailed_AccessDenied".to_string()
            }
            OutcomeReason::ScrapingContentNotFoundAllAttempts => {
                "Scraping_ContentNotFound_AllAttempts".to_string()
            }
            OutcomeReason::ScrapingFailedCanonical(status) => {
                format!("ScrapingFailed_Canonical_{status}")
            }
            OutcomeReason::CanonicalDuplicateSkipped => {
                "Canonical_Duplicate_SkippedProcessing".to_string()
            }
            OutcomeReason::NoRegexCandidatesFound => {
                "Canonical_NoRegexCandidatesFound".to_string()
            }
            OutcomeReason::LlmProcessingErrorAllAttempts => {
                "LLM_Processing_Error_AllAttempts".to_string()
            }
            OutcomeReason::LlmNoInputNoRegexCandidates => {
                "LLM_NoInput_NoRegexCandidates".to_string()
            }
            OutcomeReason::LlmOutputNoNumbersFound => {
                "LLM_Output_NoNumbersFound_AllAttempts".to_string()
            }
            OutcomeReason::LlmOutputNoneRelevant => {
                "LLM_Output_NumbersFound_NoneRelevant_AllAttempts".to_string()
            }
            OutcomeReason::ProcessingGapNoContact => {
                "Unknown_Processing_Gap_NoContact".to_string()
            }
        }
    }

    pub fn fault_category(&self) -> FaultCategory {
        match self {
            OutcomeReason::InputUrlInvalid => FaultCategory::InputData,
            OutcomeReason::SkippedMaxRedirects => FaultCategory::Website,
            OutcomeReason::ContactExtracted => FaultCategory::NotApplicable,
            OutcomeReason::ScrapingFailureInputUrl(_) => FaultCategory::Website,
            OutcomeReason::NoCanonicalUrlDetermined => FaultCategory::Unknown,
            OutcomeReason::ScrapingAllAttemptsFailedNetwork
            | OutcomeReason::ScrapingAllAttemptsFailedAccessDenied
            | OutcomeReason::ScrapingContentNotFoundAllAttempts
            | OutcomeReason::ScrapingFailedCanonical(_) => FaultCategory::Website,
            OutcomeReason::CanonicalDuplicateSkipped => FaultCategory::PipelineLogic,
            OutcomeReason::NoRegexCandidatesFound => FaultCategory::PipelineLogic,
            OutcomeReason::LlmProcessingErrorAllAttempts => FaultCategory::Llm,
            OutcomeReason::LlmNoInputNoRegexCandidates => FaultCategory::PipelineLogic,
            OutcomeReason::LlmOutputNoNumbersFound | OutcomeReason::LlmOutputNoneRelevant => {
                FaultCategory::Llm
            }
            OutcomeReason::ProcessingGapNoContact => FaultCategory::Unknown,
        }
    }
}

/// Final verdict for one input row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOutcome {
    pub reason: OutcomeReason,
}

impl RowOutcome {
    pub fn new(reason: OutcomeReason) -> Self {
        Self { reason }
    }

    pub fn fault_category(&self) -> FaultCategory {
        self.reason.fault_category()
    }
}

/// Stage labels used in the row-failure CSV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureStage {
    UrlValidation,
    Scraping(ScrapeStatus),
    RegexFileRead,
    LlmPromptMissing,
    LlmProcessing,
    RowUnhandled,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::UrlValidation => write!(f, "URL_Validation_InvalidOrMissing"),
            FailureStage::Scraping(status) => write!(f, "Scraping_{status}"),
            FailureStage::RegexFileRead => write!(f, "Regex_Extraction_FileReadError"),
            FailureStage::LlmPromptMissing => write!(f, "LLM_Setup_PromptTemplateMissing"),
            FailureStage::LlmProcessing => write!(f, "LLM_Processing_GeneralError"),
            FailureStage::RowUnhandled => write!(f, "RowProcessing_Pass1_UnhandledException"),
        }
    }
}

/// Token accounting summed over every pass of an LLM conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_match_report_strings() {
        assert_eq!(ScrapeStatus::HttpError(404).to_string(), "HTTPError_404");
        assert_eq!(ScrapeStatus::Timeout.to_string(), "TimeoutError");
        assert_eq!(ScrapeStatus::AlreadyProcessed.to_string(), "Already_Processed");
    }

    #[test]
    fn outcome_labels_are_stable() {
        assert_eq!(
            OutcomeReason::ScrapingFailureInputUrl(ScrapeStatus::DnsError).label(),
            "ScrapingFailure_InputURL_DNSError"
        );
        assert_eq!(
            OutcomeReason::ContactExtracted.fault_category(),
            FaultCategory::NotApplicable
        );
        assert_eq!(
            OutcomeReason::CanonicalDuplicateSkipped.fault_category().to_string(),
            "Pipeline Logic/Configuration"
        );
    }

    #[test]
    fn status_partitions_do_not_overlap() {
        let denied = [
            ScrapeStatus::RobotsDisallowed,
            ScrapeStatus::HttpError(403),
            ScrapeStatus::HttpError(401),
        ];
        for status in denied {
            assert!(status.is_access_denied());
            assert!(!status.is_network_failure());
            assert!(!status.is_not_found());
        }
        assert!(ScrapeStatus::HttpError(404).is_not_found());
        assert!(!ScrapeStatus::HttpError(404).is_access_denied());
    }

    #[test]
    fn token_usage_sums_across_passes() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 });
        total.add(&TokenUsage { prompt_tokens: 2, completion_tokens: 1, total_tokens: 3 });
        assert_eq!(total.total_tokens, 18);
    }
}
