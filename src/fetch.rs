//! Resilient page fetching.
//!
//! [`Fetcher::fetch`] retrieves a URL's markup through the shared
//! [`Transport`], retrying under a [`RetryPolicy`]:
//!
//! | Condition | Handling |
//! |-----------|----------|
//! | timeout, connection error, 5xx | backoff `2^attempt` s + jitter |
//! | HTTP 429 | cooldown `2^(attempt+2)` s |
//! | HTTP 403 | rotate user agent, backoff |
//! | other 4xx | stop |
//! | short / keyword-matching body | retry after 4× backoff |
//! | site-specific anti-bot marker | stop immediately |
//! | proxy connect failure | same attempt re-sent direct, later attempts direct |

use crate::config::{BlockingRules, Config, host_matches};
use crate::error::FetchError;
use crate::http::{HttpRequest, Transport, TransportError};
use crate::models::FetchResult;
use crate::retry::{Retry, RetryPolicy};
use once_cell::sync::Lazy;
use rand::{Rng, rng};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use url::Url;

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.4; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
    ]
});

const SEARCH_REFERER: &str = "https://www.google.com/";
/// Upper bound on a single 429 cooldown.
const RATE_LIMIT_CEILING: Duration = Duration::from_secs(600);

/// Mutable state scoped to a single `fetch` call.
struct AttemptState {
    agents: Vec<String>,
    agent_index: AtomicUsize,
    direct_only: AtomicBool,
}

impl AttemptState {
    fn new(pinned: Option<&str>) -> Self {
        let mut agents: Vec<String> = Vec::new();
        if let Some(ua) = pinned {
            agents.push(ua.to_string());
        }
        agents.extend(USER_AGENTS.iter().map(|ua| ua.to_string()));
        let start = if pinned.is_some() {
            0
        } else {
            rng().random_range(0..agents.len())
        };
        Self {
            agents,
            agent_index: AtomicUsize::new(start),
            direct_only: AtomicBool::new(false),
        }
    }

    fn user_agent(&self) -> &str {
        &self.agents[self.agent_index.load(Ordering::SeqCst) % self.agents.len()]
    }

    fn rotate(&self) {
        self.agent_index.fetch_add(1, Ordering::SeqCst);
    }
}

/// Browser-like headers for `url`, with a referer picked by domain.
pub fn request_headers(url: &Url, user_agent: &str, config: &Config) -> Vec<(String, String)> {
    let host = url.host_str().unwrap_or_default();
    let accept_language = if host.ends_with(".cn") {
        "zh-CN,zh;q=0.9,en;q=0.8"
    } else {
        "en-US,en;q=0.9"
    };
    let known_site = config.selectors_for(host).is_some()
        || config
            .blocking
            .domain_markers
            .iter()
            .any(|m| host_matches(host, &m.domain));
    let referer = if known_site {
        format!("{}://{}/", url.scheme(), host)
    } else {
        SEARCH_REFERER.to_string()
    };

    vec![
        ("User-Agent".to_string(), user_agent.to_string()),
        (
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        ),
        ("Accept-Language".to_string(), accept_language.to_string()),
        ("Referer".to_string(), referer),
        ("Upgrade-Insecure-Requests".to_string(), "1".to_string()),
    ]
}

/// Inspect a 200 body for signs of an anti-bot challenge.
pub fn detect_block(host: &str, body: &str, rules: &BlockingRules) -> Option<FetchError> {
    if let Some(m) = rules
        .domain_markers
        .iter()
        .find(|m| host_matches(host, &m.domain) && body.contains(&m.marker))
    {
        return Some(FetchError::Blocked {
            marker: format!("{} anti-bot script `{}`", m.domain, m.marker),
            fatal: true,
        });
    }

    if body.len() < rules.min_body_bytes {
        return Some(FetchError::Blocked {
            marker: format!("body only {} bytes", body.len()),
            fatal: false,
        });
    }

    if body.len() < rules.short_body_bytes {
        let lower = body.to_lowercase();
        if let Some(keyword) = rules
            .keywords
            .iter()
            .find(|k| lower.contains(&k.to_lowercase()))
        {
            return Some(FetchError::Blocked {
                marker: format!("keyword `{keyword}` in {}-byte body", body.len()),
                fatal: false,
            });
        }
    }

    None
}

impl From<TransportError> for FetchError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout(msg) => FetchError::Timeout(msg),
            TransportError::Connect { message, .. } => FetchError::Connect(message),
            TransportError::Other(msg) => FetchError::Request(msg),
        }
    }
}

/// Page fetcher shared by all pipelines.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
    policy: RetryPolicy,
    /// 429 cooldowns; same base, longer ceiling than `policy`.
    cooldown: RetryPolicy,
    limiter: Arc<Semaphore>,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, config: Arc<Config>) -> Self {
        let policy = RetryPolicy::new(config.max_retries, Duration::from_secs(1));
        let cooldown = policy.clone().with_max_delay(RATE_LIMIT_CEILING);
        let limiter = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            transport,
            config,
            policy,
            cooldown,
            limiter,
        }
    }

    /// Fetch `url`, returning non-empty markup or a typed failure.
    #[instrument(level = "info", skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let host = parsed
            .host_str()
            .ok_or_else(|| FetchError::InvalidUrl {
                url: url.to_string(),
                reason: "missing host".to_string(),
            })?
            .to_string();

        let state = AttemptState::new(self.config.user_agent.as_deref());
        let outcome = self
            .policy
            .run(
                "fetch",
                |_| self.attempt(&parsed, &host, &state),
                |e, attempt| classify(e, attempt, &self.policy, &self.cooldown),
            )
            .await;

        match outcome {
            Ok(body) => {
                info!(bytes = body.len(), "Fetched page");
                Ok(FetchResult {
                    url: url.to_string(),
                    body,
                })
            }
            Err(ex) if ex.aborted => Err(ex.error),
            Err(ex) => Err(FetchError::Exhausted {
                attempts: ex.attempts,
                last: Box::new(ex.error),
            }),
        }
    }

    async fn attempt(&self, url: &Url, host: &str, state: &AttemptState) -> Result<String, FetchError> {
        let headers = request_headers(url, state.user_agent(), &self.config);
        let mut request = HttpRequest::get(url.as_str(), Duration::from_secs(self.config.timeout));
        request.headers = headers;
        if state.direct_only.load(Ordering::SeqCst) || !self.transport.has_proxy() {
            request = request.direct();
        }

        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| FetchError::Request("fetch limiter closed".to_string()))?;

        let response = match self.transport.send(request.clone()).await {
            Ok(resp) => resp,
            Err(TransportError::Connect {
                message,
                via_proxy: true,
            }) => {
                let proxy = self.transport.proxy_url().unwrap_or("proxy").to_string();
                warn!(%proxy, error = %message, "Proxy unreachable; falling back to direct connection");
                state.direct_only.store(true, Ordering::SeqCst);
                match self.transport.send(request.direct()).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        return Err(FetchError::ProxyFallback {
                            proxy,
                            proxy_error: message,
                            direct_error: e.to_string(),
                        });
                    }
                }
            }
            Err(e) => return Err(e.into()),
        };

        match response.status {
            200..=299 => {
                if response.body.trim().is_empty() {
                    return Err(FetchError::EmptyBody);
                }
                if let Some(blocked) = detect_block(host, &response.body, &self.config.blocking) {
                    return Err(blocked);
                }
                debug!(status = response.status, "Accepted response");
                Ok(response.body)
            }
            403 => {
                state.rotate();
                debug!(next_agent = %state.user_agent(), "403; rotating user agent");
                Err(FetchError::Status { status: 403 })
            }
            status => Err(FetchError::Status { status }),
        }
    }
}

fn classify(e: &FetchError, attempt: usize, policy: &RetryPolicy, cooldown: &RetryPolicy) -> Retry {
    match e {
        FetchError::Status { status: 429 } => Retry::After(cooldown.backoff(attempt + 2)),
        FetchError::Status { status: 403 } => Retry::Backoff,
        FetchError::Status { status } if (400..500).contains(status) => Retry::Abort,
        FetchError::Blocked { fatal: true, .. } => Retry::Abort,
        FetchError::Blocked { fatal: false, .. } => {
            Retry::After(policy.backoff(attempt).saturating_mul(4))
        }
        FetchError::InvalidUrl { .. } => Retry::Abort,
        _ => Retry::Backoff,
    }
}
