use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub robots: RobotsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub phone: PhoneConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScraperConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Timeout for a single page navigation, in milliseconds.
    #[serde(default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,
    /// Overall timeout for fetching one page including content extraction.
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    /// Extra retries for a failed entry-point fetch (transient errors only).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    /// How deep to follow internal links below the landing page.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Post-navigation settle window in milliseconds. 0 disables.
    #[serde(default = "default_networkidle_timeout_ms")]
    pub networkidle_timeout_ms: u64,
    /// Max pages fetched per canonical host. 0 means unlimited.
    #[serde(default = "default_max_pages_per_host")]
    pub max_pages_per_host: u64,
    /// Links scoring below this are not enqueued.
    #[serde(default = "default_min_score_to_queue")]
    pub min_score_to_queue: i32,
    /// Links scoring at or above this bypass the per-host page cap.
    #[serde(default = "default_score_bypass_threshold")]
    pub score_bypass_threshold: i32,
    #[serde(default = "default_critical_keywords")]
    pub critical_keywords: Vec<String>,
    #[serde(default = "default_high_priority_keywords")]
    pub high_priority_keywords: Vec<String>,
    #[serde(default = "default_target_keywords")]
    pub target_keywords: Vec<String>,
    #[serde(default = "default_exclude_path_patterns")]
    pub exclude_path_patterns: Vec<String>,
    /// A priority keyword only keeps its tier within this many path segments.
    #[serde(default = "default_max_keyword_path_segments")]
    pub max_keyword_path_segments: usize,
    /// Query parameters dropped during URL normalization.
    #[serde(default = "default_ignored_query_params")]
    pub ignored_query_params: Vec<String>,
    /// TLDs probed in order when an input host has no dot.
    #[serde(default = "default_probing_tlds")]
    pub probing_tlds: Vec<String>,
    #[serde(default = "default_company_name_max_len")]
    pub filename_company_name_max_len: usize,
    /// Row-scrape workers running in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            page_timeout_ms: default_page_timeout_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_seconds: default_retry_delay_seconds(),
            max_depth: default_max_depth(),
            networkidle_timeout_ms: default_networkidle_timeout_ms(),
            max_pages_per_host: default_max_pages_per_host(),
            min_score_to_queue: default_min_score_to_queue(),
            score_bypass_threshold: default_score_bypass_threshold(),
            critical_keywords: default_critical_keywords(),
            high_priority_keywords: default_high_priority_keywords(),
            target_keywords: default_target_keywords(),
            exclude_path_patterns: default_exclude_path_patterns(),
            max_keyword_path_segments: default_max_keyword_path_segments(),
            ignored_query_params: default_ignored_query_params(),
            probing_tlds: default_probing_tlds(),
            filename_company_name_max_len: default_company_name_max_len(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RobotsConfig {
    #[serde(default = "default_true")]
    pub respect: bool,
    #[serde(default = "default_robots_user_agent")]
    pub user_agent: String,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            respect: true,
            user_agent: default_robots_user_agent(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Read from GEMINI_API_KEY at startup; never stored in the config file.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_endpoint")]
    pub endpoint_base: String,
    #[serde(default = "default_llm_model")]
    pub model_name: String,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f64,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_prompt_template_path")]
    pub prompt_template_path: String,
    #[serde(default = "default_mismatch_retries")]
    pub max_retries_on_number_mismatch: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint_base: default_llm_endpoint(),
            model_name: default_llm_model(),
            temperature: default_llm_temperature(),
            max_tokens: default_llm_max_tokens(),
            prompt_template_path: default_prompt_template_path(),
            max_retries_on_number_mismatch: default_mismatch_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PhoneConfig {
    #[serde(default = "default_target_country_codes")]
    pub target_country_codes: Vec<String>,
    #[serde(default = "default_region_code")]
    pub default_region_code: String,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            target_country_codes: default_target_country_codes(),
            default_region_code: default_region_code(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    #[serde(default = "default_input_path")]
    pub input_path: String,
    #[serde(default = "default_output_base_dir")]
    pub output_base_dir: String,
    /// Row selection: "N-M", "N-", "-M", "N", or ""/"0" for all rows.
    #[serde(default)]
    pub row_range: String,
    /// Open-ended reads stop after this many consecutive empty rows.
    #[serde(default = "default_consecutive_empty_rows")]
    pub consecutive_empty_rows_to_stop: usize,
    /// Character window on each side of a regex match for snippets.
    #[serde(default = "default_snippet_window_chars")]
    pub snippet_window_chars: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            input_path: default_input_path(),
            output_base_dir: default_output_base_dir(),
            row_range: String::new(),
            consecutive_empty_rows_to_stop: default_consecutive_empty_rows(),
            snippet_window_chars: default_snippet_window_chars(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_file_level")]
    pub file_level: String,
    #[serde(default = "default_console_level")]
    pub console_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_level: default_file_level(),
            console_level: default_console_level(),
        }
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}
fn default_page_timeout_ms() -> u64 { 30_000 }
fn default_navigation_timeout_ms() -> u64 { 60_000 }
fn default_max_retries() -> u32 { 2 }
fn default_retry_delay_seconds() -> u64 { 5 }
fn default_max_depth() -> u32 { 1 }
fn default_networkidle_timeout_ms() -> u64 { 3_000 }
fn default_max_pages_per_host() -> u64 { 20 }
fn default_min_score_to_queue() -> i32 { 40 }
fn default_score_bypass_threshold() -> i32 { 80 }
fn default_critical_keywords() -> Vec<String> {
    csv_list("impressum,kontakt,contact,imprint")
}
fn default_high_priority_keywords() -> Vec<String> {
    csv_list("legal,privacy,terms,datenschutz,ueber-uns,about,about-us")
}
fn default_target_keywords() -> Vec<String> {
    csv_list("contact,about,support,impressum,kontakt,legal,privacy,terms,hilfe,datenschutz,ueber-uns")
}
fn default_exclude_path_patterns() -> Vec<String> {
    csv_list("/media/,/blog/,/wp-content/,/video/,/hilfe-video/")
}
fn default_max_keyword_path_segments() -> usize { 3 }
fn default_ignored_query_params() -> Vec<String> {
    csv_list("fallback")
}
fn default_probing_tlds() -> Vec<String> {
    csv_list("de,com,at,ch")
}
fn default_company_name_max_len() -> usize { 25 }
fn default_concurrency() -> usize { 4 }
fn default_true() -> bool { true }
fn default_robots_user_agent() -> String { "*".to_string() }
fn default_llm_endpoint() -> String { "https://generativelanguage.googleapis.com".to_string() }
fn default_llm_model() -> String { "gemini-1.5-pro-latest".to_string() }
fn default_llm_temperature() -> f64 { 0.5 }
fn default_llm_max_tokens() -> u32 { 8192 }
fn default_prompt_template_path() -> String { "prompts/phone_classification_v1.txt".to_string() }
fn default_mismatch_retries() -> u32 { 2 }
fn default_target_country_codes() -> Vec<String> { csv_list("DE,CH,AT") }
fn default_region_code() -> String { "DE".to_string() }
fn default_input_path() -> String { "input_companies.csv".to_string() }
fn default_output_base_dir() -> String { "output_data".to_string() }
fn default_consecutive_empty_rows() -> usize { 3 }
fn default_snippet_window_chars() -> usize { 300 }
fn default_file_level() -> String { "info".to_string() }
fn default_console_level() -> String { "warn".to_string() }

/// Parse a comma-separated list the way env overrides provide it.
pub fn csv_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
