use crate::error::{FetchError, SkippedSeries};
use crate::http::HttpClient;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// Bounds on the retry loop.
///
/// `max_attempts` counts every request made for one series, the first
/// included. The wait before attempt `n + 1` is `base_delay * 2^(n - 1)`.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff wait after the `attempt`-th request (1-based) failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

// request/response
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum Payload {
    Get,
    PostJson(serde_json::Value),
}

/// One outbound API call, independent of how it is executed.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub url: String,
    pub payload: Payload,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            payload: Payload::Get,
            headers: Vec::new(),
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            url: url.into(),
            payload: Payload::PostJson(body),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Raw response handed back by a transport.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

// transport
// ----------------------------------------------------------------------------

/// Seam between the retry loop and the network.
///
/// Production code goes through [`HttpTransport`]; tests substitute a
/// scripted transport so rate limiting and auth failures can be replayed
/// without a wire.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<HttpResponse, FetchError>;
}

/// `reqwest`-backed transport.
pub struct HttpTransport {
    client: HttpClient,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: crate::std_client_build(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<HttpResponse, FetchError> {
        let mut builder = match &request.payload {
            Payload::Get => self.client.get(&request.url),
            Payload::PostJson(body) => self.client.post(&request.url).json(body),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(classify_reqwest)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify_reqwest)?.to_vec();

        Ok(HttpResponse { status, body })
    }
}

fn classify_reqwest(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_connect() {
        FetchError::Connection(err.to_string())
    } else {
        FetchError::Malformed(err.to_string())
    }
}

// fetcher
// ----------------------------------------------------------------------------

/// Fetch-with-retry: one logical series fetch, tolerant of rate limiting.
///
/// 429s and transport-level timeouts back off exponentially up to the
/// attempt budget; any other failure is permanent for that series and
/// short-circuits immediately. Both exhaustion and permanent failures
/// surface as [`SkippedSeries`] so that one bad series can never abort a
/// batch.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_transport(Arc::new(HttpTransport::new()), policy)
    }

    pub fn with_transport(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch the raw payload for `series_id`.
    pub async fn fetch_bytes(
        &self,
        series_id: &str,
        request: &ApiRequest,
    ) -> Result<Vec<u8>, SkippedSeries> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            trace!("requesting {} (attempt {attempt})", request.url);

            let error = match self.transport.execute(request).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    trace!("fetched {series_id} on attempt {attempt}");
                    return Ok(response.body);
                }
                Ok(response) => FetchError::from_status_code(response.status),
                Err(err) => err,
            };

            // a 403 or a bad series id will not resolve with time
            if !error.is_transient() || attempt >= self.policy.max_attempts {
                return Err(SkippedSeries::new(series_id, attempt, error));
            }

            let wait = self.policy.backoff(attempt);
            warn!(
                "{error} for {series_id}; waiting {wait:?} before attempt {}/{}",
                attempt + 1,
                self.policy.max_attempts
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Fetch and deserialize a JSON payload.
    ///
    /// A payload that does not parse is a malformed response: permanent for
    /// the series, skipped like any other per-series failure.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        series_id: &str,
        request: &ApiRequest,
    ) -> Result<T, SkippedSeries> {
        let body = self.fetch_bytes(series_id, request).await?;
        serde_json::from_slice(&body).map_err(|err| {
            SkippedSeries::new(series_id, 1, FetchError::Malformed(err.to_string()))
        })
    }
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays a fixed script of responses and records when each request
    /// arrived (paused-clock instants, so backoff waits are observable).
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<HttpResponse, FetchError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<HttpResponse, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_instants(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(&self, _request: &ApiRequest) -> Result<HttpResponse, FetchError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted")
        }
    }

    fn ok(body: &str) -> Result<HttpResponse, FetchError> {
        Ok(HttpResponse {
            status: 200,
            body: body.as_bytes().to_vec(),
        })
    }

    fn status(code: u16) -> Result<HttpResponse, FetchError> {
        Ok(HttpResponse {
            status: code,
            body: Vec::new(),
        })
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_from_rate_limit_with_backoff() {
        let transport = ScriptedTransport::new(vec![status(429), ok("payload")]);
        let fetcher = Fetcher::with_transport(transport.clone(), policy());

        let body = fetcher
            .fetch_bytes("MDPOP", &ApiRequest::get("http://example/a"))
            .await
            .unwrap();
        assert_eq!(body, b"payload");

        // the wait before the second attempt is the base delay exactly:
        // at least `base`, at most `base * 2`
        let calls = transport.call_instants();
        assert_eq!(calls.len(), 2);
        let wait = calls[1] - calls[0];
        assert!(wait >= Duration::from_secs(2));
        assert!(wait <= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_monotonically_increasing() {
        let transport =
            ScriptedTransport::new(vec![status(429), status(429), status(429), ok("{}")]);
        let fetcher = Fetcher::with_transport(transport.clone(), policy());

        fetcher
            .fetch_bytes("MDPOP", &ApiRequest::get("http://example/a"))
            .await
            .unwrap();

        let calls = transport.call_instants();
        assert_eq!(calls.len(), 4);
        let waits: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            waits,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_becomes_a_skip() {
        let transport = ScriptedTransport::new(vec![
            status(429),
            status(429),
            status(429),
            status(429),
            status(429),
        ]);
        let fetcher = Fetcher::with_transport(transport.clone(), policy());

        let skip = fetcher
            .fetch_bytes("MDPOP", &ApiRequest::get("http://example/a"))
            .await
            .unwrap_err();
        assert_eq!(skip.series_id, "MDPOP");
        assert_eq!(skip.attempts, 5);
        assert!(matches!(skip.error, FetchError::RateLimited));
        assert_eq!(transport.call_instants().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_status_short_circuits() {
        let transport = ScriptedTransport::new(vec![status(403), ok("unreached")]);
        let fetcher = Fetcher::with_transport(transport.clone(), policy());

        let skip = fetcher
            .fetch_bytes("BADSERIES", &ApiRequest::get("http://example/a"))
            .await
            .unwrap_err();
        assert_eq!(skip.attempts, 1);
        assert!(matches!(skip.error, FetchError::Status { status: 403, .. }));

        // no retry budget consumed on errors that cannot resolve with time
        assert_eq!(transport.call_instants().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_retried() {
        let transport = ScriptedTransport::new(vec![Err(FetchError::Timeout), ok("payload")]);
        let fetcher = Fetcher::with_transport(transport.clone(), policy());

        let body = fetcher
            .fetch_bytes("MDPOP", &ApiRequest::get("http://example/a"))
            .await
            .unwrap();
        assert_eq!(body, b"payload");
        assert_eq!(transport.call_instants().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_json_is_a_skip() {
        #[derive(serde::Deserialize, Debug)]
        struct Empty {}

        let transport = ScriptedTransport::new(vec![ok("not json")]);
        let fetcher = Fetcher::with_transport(transport, policy());

        let skip = fetcher
            .fetch_json::<Empty>("MDPOP", &ApiRequest::get("http://example/a"))
            .await
            .unwrap_err();
        assert!(matches!(skip.error, FetchError::Malformed(_)));
    }
}
