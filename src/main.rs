mod cli;
mod input;
mod pipeline;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

// Keep memory flat under a busy browser + worker pool.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use phonescout_core::config::{csv_list, AppConfig};
use phonescout_scraper::{HeadlessFetcher, PageFetcher};

use crate::cli::{Cli, Commands};

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(8)
        .thread_stack_size(8 * 1024 * 1024)
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        eprintln!("config file {} not found, using built-in defaults", cli.config);
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str).context("config parse failed")?;
    apply_env_overrides(&mut config);

    match cli.command {
        Commands::Run {
            input,
            output_dir,
            range,
            depth,
            concurrency,
        } => {
            if let Some(input) = input {
                config.data.input_path = input;
            }
            if let Some(output_dir) = output_dir {
                config.data.output_base_dir = output_dir;
            }
            if let Some(range) = range {
                config.data.row_range = range;
            }
            if let Some(depth) = depth {
                config.scraper.max_depth = depth;
            }
            if let Some(concurrency) = concurrency {
                config.scraper.concurrency = concurrency;
            }
            run(config).await
        }
    }
}

async fn run(config: AppConfig) -> Result<()> {
    // Fatal startup checks before any output is created.
    let input_path = PathBuf::from(&config.data.input_path);
    if !input_path.exists() {
        bail!("input file not found: {}", input_path.display());
    }
    if config.llm.api_key.trim().is_empty() {
        bail!("GEMINI_API_KEY is not set; the classifier cannot run");
    }

    let run_id = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let run_dir = PathBuf::from(&config.data.output_base_dir).join(&run_id);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("cannot create run directory {}", run_dir.display()))?;

    let _log_guard = init_logging(&config, &run_dir, &run_id)?;
    info!(run_id = %run_id, run_dir = %run_dir.display(), "phonescout starting");

    let rows = input::load_input_rows(&input_path, &config.data)?;
    if rows.is_empty() {
        warn!("input produced no rows, nothing to do");
    }

    let fetcher = Arc::new(
        HeadlessFetcher::launch()
            .await
            .map_err(|e| anyhow::anyhow!("headless browser launch failed: {e}"))?,
    );

    let result = pipeline::run_pipeline(
        config,
        run_id,
        run_dir,
        rows,
        Arc::clone(&fetcher) as Arc<dyn PageFetcher>,
    )
    .await;

    if let Ok(fetcher) = Arc::try_unwrap(fetcher) {
        fetcher.shutdown().await;
    }

    result
}

fn init_logging(
    config: &AppConfig,
    run_dir: &Path,
    run_id: &str,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let file_appender =
        tracing_appender::rolling::never(run_dir, format!("pipeline_run_{run_id}.log"));
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(EnvFilter::new(&config.logging.file_level));

    let console_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.console_level)),
    );

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();
    Ok(guard)
}

/// Environment overrides layered over the config file, mirroring the knobs
/// the pipeline is usually tuned with in deployment.
fn apply_env_overrides(config: &mut AppConfig) {
    let env = std::env::var;

    if let Ok(v) = env("SCRAPER_USER_AGENT") {
        config.scraper.user_agent = v;
    }
    if let Ok(v) = env("SCRAPER_PAGE_TIMEOUT_MS") {
        if let Ok(n) = v.parse() {
            config.scraper.page_timeout_ms = n;
        }
    }
    if let Ok(v) = env("SCRAPER_NAVIGATION_TIMEOUT_MS") {
        if let Ok(n) = v.parse() {
            config.scraper.navigation_timeout_ms = n;
        }
    }
    if let Ok(v) = env("SCRAPER_MAX_RETRIES") {
        if let Ok(n) = v.parse() {
            config.scraper.max_retries = n;
        }
    }
    if let Ok(v) = env("SCRAPER_RETRY_DELAY_SECONDS") {
        if let Ok(n) = v.parse() {
            config.scraper.retry_delay_seconds = n;
        }
    }
    if let Ok(v) = env("MAX_DEPTH_INTERNAL_LINKS") {
        if let Ok(n) = v.parse() {
            config.scraper.max_depth = n;
        }
    }
    if let Ok(v) = env("SCRAPER_NETWORKIDLE_TIMEOUT_MS") {
        if let Ok(n) = v.parse() {
            config.scraper.networkidle_timeout_ms = n;
        }
    }
    if let Ok(v) = env("SCRAPER_MAX_PAGES_PER_DOMAIN") {
        if let Ok(n) = v.parse() {
            config.scraper.max_pages_per_host = n;
        }
    }
    if let Ok(v) = env("SCRAPER_MIN_SCORE_TO_QUEUE") {
        if let Ok(n) = v.parse() {
            config.scraper.min_score_to_queue = n;
        }
    }
    if let Ok(v) = env("SCRAPER_SCORE_THRESHOLD_FOR_LIMIT_BYPASS") {
        if let Ok(n) = v.parse() {
            config.scraper.score_bypass_threshold = n;
        }
    }
    if let Ok(v) = env("SCRAPER_CRITICAL_PRIORITY_KEYWORDS") {
        config.scraper.critical_keywords = csv_list(&v);
    }
    if let Ok(v) = env("SCRAPER_HIGH_PRIORITY_KEYWORDS") {
        config.scraper.high_priority_keywords = csv_list(&v);
    }
    if let Ok(v) = env("TARGET_LINK_KEYWORDS") {
        config.scraper.target_keywords = csv_list(&v);
    }
    if let Ok(v) = env("SCRAPER_EXCLUDE_LINK_PATH_PATTERNS") {
        config.scraper.exclude_path_patterns = csv_list(&v);
    }
    if let Ok(v) = env("SCRAPER_MAX_KEYWORD_PATH_SEGMENTS") {
        if let Ok(n) = v.parse() {
            config.scraper.max_keyword_path_segments = n;
        }
    }
    if let Ok(v) = env("SCRAPER_IGNORED_QUERY_PARAMS") {
        config.scraper.ignored_query_params = csv_list(&v);
    }
    if let Ok(v) = env("URL_PROBING_TLDS") {
        config.scraper.probing_tlds = csv_list(&v);
    }
    if let Ok(v) = env("FILENAME_COMPANY_NAME_MAX_LEN") {
        if let Ok(n) = v.parse() {
            config.scraper.filename_company_name_max_len = n;
        }
    }
    if let Ok(v) = env("SCRAPER_CONCURRENCY") {
        if let Ok(n) = v.parse::<usize>() {
            if n > 0 && n <= 64 {
                config.scraper.concurrency = n;
            }
        }
    }

    if let Ok(v) = env("RESPECT_ROBOTS_TXT") {
        config.robots.respect = v != "0" && v.to_lowercase() != "false";
    }
    if let Ok(v) = env("ROBOTS_TXT_USER_AGENT") {
        config.robots.user_agent = v;
    }

    if let Ok(v) = env("GEMINI_API_KEY") {
        config.llm.api_key = v;
    }
    if let Ok(v) = env("LLM_ENDPOINT_BASE") {
        config.llm.endpoint_base = v;
    }
    if let Ok(v) = env("LLM_MODEL_NAME") {
        config.llm.model_name = v;
    }
    if let Ok(v) = env("LLM_TEMPERATURE") {
        if let Ok(n) = v.parse() {
            config.llm.temperature = n;
        }
    }
    if let Ok(v) = env("LLM_MAX_TOKENS") {
        if let Ok(n) = v.parse() {
            config.llm.max_tokens = n;
        }
    }
    if let Ok(v) = env("LLM_PROMPT_TEMPLATE_PATH") {
        config.llm.prompt_template_path = v;
    }
    if let Ok(v) = env("LLM_MAX_RETRIES_ON_NUMBER_MISMATCH") {
        if let Ok(n) = v.parse() {
            config.llm.max_retries_on_number_mismatch = n;
        }
    }

    if let Ok(v) = env("TARGET_COUNTRY_CODES") {
        config.phone.target_country_codes =
            csv_list(&v).into_iter().map(|c| c.to_ascii_uppercase()).collect();
    }
    if let Ok(v) = env("DEFAULT_REGION_CODE") {
        config.phone.default_region_code = v.to_ascii_uppercase();
    }

    if let Ok(v) = env("INPUT_FILE_PATH") {
        config.data.input_path = v;
    }
    if let Ok(v) = env("OUTPUT_BASE_DIR") {
        config.data.output_base_dir = v;
    }
    if let Ok(v) = env("ROW_PROCESSING_RANGE") {
        config.data.row_range = v;
    }
    if let Ok(v) = env("CONSECUTIVE_EMPTY_ROWS_TO_STOP") {
        if let Ok(n) = v.parse() {
            config.data.consecutive_empty_rows_to_stop = n;
        }
    }
    if let Ok(v) = env("SNIPPET_WINDOW_CHARS") {
        if let Ok(n) = v.parse() {
            config.data.snippet_window_chars = n;
        }
    }

    if let Ok(v) = env("LOG_LEVEL") {
        config.logging.file_level = v.to_lowercase();
    }
    if let Ok(v) = env("CONSOLE_LOG_LEVEL") {
        config.logging.console_level = v.to_lowercase();
    }
}
