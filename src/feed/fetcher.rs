use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::header::USER_AGENT;
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use thiserror::Error;

use super::parser::{FeedParser, ParseError};
use super::policy::{apply_policy, apply_preparse_edits, decode_payload, EncodingError};
use super::Channel;
use crate::config::{Config, FeedPolicy, GlobalSettings};
use crate::hooks::{HookBus, HookError, HookEvent};

const MAX_RETRIES: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024;
const MAX_REDIRECTS: usize = 5;

/// Errors that drop a single feed from the current run.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, DNS, TLS or redirect failure reported by the client.
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Non-2xx status, after retries for 5xx.
    #[error("Server answered with status {0}")]
    HttpStatus(u16),
    /// No complete response within `FetchTimeout`.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// 429 Too Many Requests on every attempt.
    #[error("Still rate limited after {0} retries")]
    RateLimited(u32),
    /// Declared or streamed body over the 10 MB limit.
    #[error("Feed exceeds the {} MB size limit", MAX_FEED_SIZE / (1024 * 1024))]
    ResponseTooLarge,
    /// Body shorter than its Content-Length.
    #[error("Truncated body: {received} of {expected} bytes")]
    IncompleteResponse { expected: u64, received: usize },
    /// A `file://` feed that could not be read.
    #[error("Failed to read feed file '{path}': {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// Payload could not be decoded with the forced or declared charset.
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// The parser backend rejected the edited document.
    #[error("Could not parse feed: {0}")]
    Parse(#[from] ParseError),
    /// A `PreFetch` or `PostParse` observer failed.
    #[error(transparent)]
    Hook(#[from] HookError),
}

/// Outcome of fetching one feed.
#[derive(Debug)]
pub struct FetchResult {
    /// Declaration index of the feed in [`Config::feeds`].
    pub index: usize,
    pub result: Result<Channel, FetchError>,
}

/// Builds the HTTP client shared by every fetch of a run.
pub fn build_client(settings: &GlobalSettings) -> Result<reqwest::Client, FetchError> {
    let client = reqwest::Client::builder()
        .redirect(redirect_policy())
        .gzip(settings.get_gzipped_feeds)
        .user_agent(settings.user_agent.as_str())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .build()?;
    Ok(client)
}

/// Follows at most [`MAX_REDIRECTS`] hops, only to http(s), and rejects loops.
fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        let hops = attempt.previous().len();
        if hops >= MAX_REDIRECTS {
            return attempt.error(format!("Too many redirects (max {MAX_REDIRECTS})"));
        }

        let target = attempt.url();
        if !matches!(target.scheme(), "http" | "https") {
            let message = format!("Refusing redirect to {} URL", target.scheme());
            return attempt.error(message);
        }
        if attempt.previous().contains(target) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(to = %target, hop = hops + 1, "Following redirect");
        attempt.follow()
    })
}

/// Fetches and parses every enabled feed of `config`, at most
/// `MaxThreads` at a time.
///
/// Feeds are started in declaration order. Results are returned sorted by
/// declaration index once every feed has finished; a failed feed carries
/// its error and never affects the others.
pub async fn fetch_all(
    client: &reqwest::Client,
    config: &Config,
    parser: &dyn FeedParser,
    hooks: &HookBus,
) -> Vec<FetchResult> {
    let settings = config.settings();
    let limit = settings.max_threads.max(1);

    let enabled: Vec<_> = config
        .feeds()
        .iter()
        .enumerate()
        .filter(|(_, policy)| policy.enabled)
        .collect();
    if enabled.is_empty() {
        return Vec::new();
    }
    tracing::info!(feeds = enabled.len(), concurrency = limit, "Fetching feeds");

    let mut results: Vec<FetchResult> = stream::iter(enabled)
        .map(|(index, policy)| async move {
            let result = fetch_one(client, settings, policy, parser, hooks).await;
            match &result {
                Ok(channel) => tracing::debug!(
                    feed = %policy.url,
                    items = channel.items().len(),
                    "Fetched feed"
                ),
                Err(e) => tracing::warn!(feed = %policy.url, error = %e, "Feed failed"),
            }
            FetchResult { index, result }
        })
        .buffer_unordered(limit)
        .collect()
        .await;

    results.sort_by_key(|r| r.index);
    results
}

/// Fetches, decodes, edits, parses and post-processes one feed, firing
/// `PreFetch` before and `PostParse` after.
pub async fn fetch_one(
    client: &reqwest::Client,
    settings: &GlobalSettings,
    policy: &FeedPolicy,
    parser: &dyn FeedParser,
    hooks: &HookBus,
) -> Result<Channel, FetchError> {
    hooks.fire(&HookEvent::PreFetch { policy })?;

    let bytes = match policy.url.scheme() {
        "file" => read_file(policy).await?,
        _ => fetch_http(client, policy, settings.fetch_timeout).await?,
    };

    let text = decode_payload(&bytes, policy.forced_encoding.as_deref())?;
    let text = apply_preparse_edits(text, &policy.preparse_edits);

    let mut channel = parser.parse(&text)?;
    apply_policy(&mut channel, policy);

    hooks.fire(&HookEvent::PostParse {
        policy,
        channel: &channel,
    })?;
    Ok(channel)
}

async fn read_file(policy: &FeedPolicy) -> Result<Vec<u8>, FetchError> {
    let file_error = |source| FetchError::File {
        path: policy.url.path().to_string(),
        source,
    };

    let path = policy.url.to_file_path().map_err(|()| {
        file_error(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a local file path",
        ))
    })?;

    let meta = tokio::fs::metadata(&path).await.map_err(file_error)?;
    if meta.len() > MAX_FEED_SIZE as u64 {
        return Err(FetchError::ResponseTooLarge);
    }
    tokio::fs::read(&path).await.map_err(file_error)
}

/// Result of a single HTTP attempt that did not fail outright.
enum Attempt {
    Done(Vec<u8>),
    /// Transient failure; `error` is reported if no retries are left.
    Retry {
        error: FetchError,
        reason: &'static str,
    },
}

/// Backoff before retry number `retry` (0-based): 1s, 2s, 4s.
fn backoff_delay(retry: u32) -> Duration {
    Duration::from_secs(1 << retry)
}

async fn fetch_http(
    client: &reqwest::Client,
    policy: &FeedPolicy,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    let mut retry = 0;

    loop {
        let attempt = tokio::time::timeout(timeout, attempt_http(client, policy))
            .await
            .map_err(|_| FetchError::Timeout(timeout))??;

        match attempt {
            Attempt::Done(body) => return Ok(body),
            Attempt::Retry { error, reason } => {
                if retry >= MAX_RETRIES {
                    return Err(error);
                }
                let delay = backoff_delay(retry);
                tracing::warn!(
                    feed = %policy.url,
                    reason,
                    attempt = retry + 1,
                    delay_secs = delay.as_secs(),
                    "Transient fetch failure, retrying"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
        }
    }
}

/// 429 and 5xx responses and truncated bodies are retried; any other
/// non-2xx status fails the feed immediately.
async fn attempt_http(client: &reqwest::Client, policy: &FeedPolicy) -> Result<Attempt, FetchError> {
    let response = client
        .get(policy.url.clone())
        .header(USER_AGENT, policy.user_agent.as_str())
        .send()
        .await?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Ok(Attempt::Retry {
            error: FetchError::RateLimited(MAX_RETRIES),
            reason: "rate limited",
        });
    }
    if status.is_server_error() {
        return Ok(Attempt::Retry {
            error: FetchError::HttpStatus(status.as_u16()),
            reason: "server error",
        });
    }
    if !status.is_success() {
        return Err(FetchError::HttpStatus(status.as_u16()));
    }

    match read_body(response, MAX_FEED_SIZE).await {
        Ok(body) => Ok(Attempt::Done(body)),
        Err(error @ FetchError::IncompleteResponse { .. }) => Ok(Attempt::Retry {
            error,
            reason: "truncated body",
        }),
        Err(e) => Err(e),
    }
}

/// Streams the body, refusing anything over `limit` bytes whether declared
/// up front or discovered while reading.
async fn read_body(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    let declared = response.content_length();
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(FetchError::ResponseTooLarge);
    }

    let mut body = Vec::with_capacity(declared.map_or(0, |len| len as usize));
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        body.extend_from_slice(&chunk);
    }

    match declared {
        Some(expected) if (body.len() as u64) < expected => Err(FetchError::IncompleteResponse {
            expected,
            received: body.len(),
        }),
        _ => Ok(body),
    }
}
