//! Page fetching behind a trait seam.
//!
//! The crawl loop only knows `PageFetcher`; production runs use the headless
//! Chrome fetcher, tests script their own. Browser failure strings are
//! classified into `FetchError` here and nowhere else.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventResponseReceived, ResourceType, SetUserAgentOverrideParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use phonescout_core::ScrapeStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("navigation timed out")]
    Timeout,
    #[error("DNS resolution failed")]
    Dns,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("redirect limit exceeded")]
    TooManyRedirects,
    #[error("browser error: {0}")]
    Browser(String),
}

impl FetchError {
    /// Map one Chrome/CDP error message onto the closed error set.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            FetchError::Timeout
        } else if lower.contains("name_not_resolved") || lower.contains("name not resolved") || lower.contains("dns") {
            FetchError::Dns
        } else if lower.contains("connection_refused") || lower.contains("connection refused") {
            FetchError::ConnectionRefused
        } else if lower.contains("too_many_redirects") || lower.contains("too many redirects") {
            FetchError::TooManyRedirects
        } else {
            FetchError::Browser(message.to_string())
        }
    }

    pub fn to_status(&self) -> ScrapeStatus {
        match self {
            FetchError::Timeout => ScrapeStatus::Timeout,
            FetchError::Dns => ScrapeStatus::DnsError,
            FetchError::ConnectionRefused => ScrapeStatus::ConnectionRefused,
            FetchError::TooManyRedirects => ScrapeStatus::MaxRedirects,
            FetchError::Browser(_) => ScrapeStatus::BrowserError,
        }
    }
}

/// One successfully rendered page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub requested_url: Url,
    /// URL observed after the browser followed redirects.
    pub landed_url: Url,
    /// HTTP status of the main document, when the CDP event was seen.
    pub http_status: Option<u16>,
    pub html: String,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub user_agent: String,
    /// Budget for the navigation itself.
    pub page_timeout: Duration,
    /// Budget for the whole fetch including rendering and extraction.
    pub navigation_timeout: Duration,
    /// Post-navigation settle window. Zero disables.
    pub settle_delay: Duration,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, settings: &FetchSettings) -> Result<FetchedPage, FetchError>;
}

/// Headless Chrome fetcher. One browser per run, one page per fetch.
pub struct HeadlessFetcher {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl HeadlessFetcher {
    pub async fn launch() -> Result<Self, FetchError> {
        let config = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .build()
            .map_err(FetchError::Browser)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::classify(&e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self { browser, handler_task })
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("browser close failed: {e}");
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }

    async fn drive_page(
        &self,
        page: &Page,
        url: &Url,
        settings: &FetchSettings,
    ) -> Result<FetchedPage, FetchError> {
        let ua_override = SetUserAgentOverrideParams {
            user_agent: settings.user_agent.clone(),
            accept_language: None,
            platform: None,
            user_agent_metadata: None,
        };
        if let Err(e) = page.execute(ua_override).await {
            debug!("could not set user agent: {e}");
        }

        // Listen before navigating so the document response is not missed.
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| FetchError::classify(&e.to_string()))?;

        match tokio::time::timeout(settings.page_timeout, page.goto(url.as_str())).await {
            Err(_) => return Err(FetchError::Timeout),
            Ok(Err(e)) => return Err(FetchError::classify(&e.to_string())),
            Ok(Ok(_)) => {}
        }

        // DOM-content-loaded; navigation errors past this point are tolerated,
        // the content call below decides whether the page is usable.
        let _ = tokio::time::timeout(settings.page_timeout, page.wait_for_navigation()).await;

        if !settings.settle_delay.is_zero() {
            tokio::time::sleep(settings.settle_delay).await;
        }

        let mut http_status = None;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(250), responses.next()).await
        {
            if matches!(event.r#type, ResourceType::Document) {
                http_status = Some(event.response.status as u16);
                break;
            }
        }

        let html = page
            .content()
            .await
            .map_err(|e| FetchError::classify(&e.to_string()))?;

        let landed_url = page
            .url()
            .await
            .ok()
            .flatten()
            .and_then(|s| Url::parse(&s).ok())
            .unwrap_or_else(|| url.clone());

        Ok(FetchedPage {
            requested_url: url.clone(),
            landed_url,
            http_status,
            html,
        })
    }
}

#[async_trait]
impl PageFetcher for HeadlessFetcher {
    async fn fetch(&self, url: &Url, settings: &FetchSettings) -> Result<FetchedPage, FetchError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::classify(&e.to_string()))?;

        let result = match tokio::time::timeout(
            settings.navigation_timeout,
            self.drive_page(&page, url, settings),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };

        if let Err(e) = page.close().await {
            debug!("page close failed: {e}");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chrome_error_strings_classify_into_the_closed_set() {
        assert_eq!(FetchError::classify("net::ERR_NAME_NOT_RESOLVED"), FetchError::Dns);
        assert_eq!(FetchError::classify("net::ERR_CONNECTION_REFUSED"), FetchError::ConnectionRefused);
        assert_eq!(FetchError::classify("net::ERR_TOO_MANY_REDIRECTS"), FetchError::TooManyRedirects);
        assert_eq!(FetchError::classify("Navigation timeout exceeded"), FetchError::Timeout);
        assert!(matches!(FetchError::classify("net::ERR_CERT_INVALID"), FetchError::Browser(_)));
    }

    #[test]
    fn fetch_errors_map_to_scrape_statuses() {
        assert_eq!(FetchError::Timeout.to_status(), ScrapeStatus::Timeout);
        assert_eq!(FetchError::Dns.to_status(), ScrapeStatus::DnsError);
        assert_eq!(FetchError::TooManyRedirects.to_status(), ScrapeStatus::MaxRedirects);
        assert_eq!(
            FetchError::Browser("boom".into()).to_status(),
            ScrapeStatus::BrowserError
        );
    }
}
