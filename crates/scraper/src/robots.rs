//! Per-host robots.txt gate with a fetch-once cache. Fail-open everywhere:
//! a fetch error, 404, or parse failure allows the crawl.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use texting_robots::Robot;
use tracing::{debug, warn};
use url::Url;

use phonescout_core::PipelineError;

pub struct RobotsGate {
    client: reqwest::Client,
    /// Host base -> parsed robots, `None` meaning "allow everything".
    cache: DashMap<String, Option<Arc<Robot>>>,
    respect: bool,
    user_agent: String,
}

impl RobotsGate {
    pub fn new(respect: bool, user_agent: &str) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| PipelineError::Config(format!("robots client: {e}")))?;
        Ok(Self {
            client,
            cache: DashMap::new(),
            respect,
            user_agent: user_agent.to_string(),
        })
    }

    pub async fn can_fetch(&self, url: &Url) -> bool {
        if !self.respect {
            return true;
        }
        let Some(host) = url.host_str() else {
            return true;
        };
        let base = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        };

        if let Some(cached) = self.cache.get(&base) {
            return allowed(cached.value(), url);
        }

        let robot = self.fetch_robot(&base).await;
        self.cache.insert(base, robot.clone());
        allowed(&robot, url)
    }

    async fn fetch_robot(&self, base: &str) -> Option<Arc<Robot>> {
        let robots_url = format!("{base}/robots.txt");
        match self
            .client
            .get(&robots_url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => match Robot::new(&self.user_agent, body.as_bytes()) {
                    Ok(robot) => Some(Arc::new(robot)),
                    Err(e) => {
                        debug!(url = %robots_url, "robots.txt parse failed, allowing: {e}");
                        None
                    }
                },
                Err(e) => {
                    debug!(url = %robots_url, "robots.txt body read failed, allowing: {e}");
                    None
                }
            },
            Ok(response) => {
                debug!(url = %robots_url, status = %response.status(), "no usable robots.txt, allowing");
                None
            }
            Err(e) => {
                warn!(url = %robots_url, "robots.txt fetch failed, allowing: {e}");
                None
            }
        }
    }
}

fn allowed(robot: &Option<Arc<Robot>>, url: &Url) -> bool {
    robot
        .as_ref()
        .map(|r| r.allowed(url.as_str()))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_gate_always_allows() {
        let gate = RobotsGate::new(false, "*").unwrap();
        let url = Url::parse("http://127.0.0.1:1/anything").unwrap();
        assert!(gate.can_fetch(&url).await);
    }

    #[tokio::test]
    async fn unreachable_host_fails_open_and_caches() {
        let gate = RobotsGate::new(true, "*").unwrap();
        // Nothing listens here; the fetch errors and the gate allows.
        let url = Url::parse("http://127.0.0.1:9/page").unwrap();
        assert!(gate.can_fetch(&url).await);
        assert_eq!(gate.cache.len(), 1);
        // Second check hits the cache.
        assert!(gate.can_fetch(&url).await);
        assert_eq!(gate.cache.len(), 1);
    }

    #[test]
    fn disallow_rules_apply_when_parsed() {
        let robot = Robot::new("scout", b"User-agent: *\nDisallow: /private/\n").unwrap();
        let cached = Some(Arc::new(robot));
        assert!(!allowed(&cached, &Url::parse("http://x.de/private/a").unwrap()));
        assert!(allowed(&cached, &Url::parse("http://x.de/public").unwrap()));
    }
}
