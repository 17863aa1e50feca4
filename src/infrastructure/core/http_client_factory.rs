use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;

/// Three attempts total per info read: the initial call plus two retries.
const INFO_MAX_RETRIES: u32 = 2;
/// Backoff window for those retries. The ceiling keeps a fully-retried
/// read under a minute, so the thirteen per-cycle reads (two candle
/// windows per coin plus the asset contexts) cannot wedge the collect
/// phase past its budget on a single flaky endpoint.
const INFO_RETRY_MIN: Duration = Duration::from_millis(400);
const INFO_RETRY_MAX: Duration = Duration::from_secs(8);
/// An info read slower than this is indistinguishable from a dead venue;
/// fail it and let the retry layer decide.
const INFO_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// HTTP client for unauthenticated market-data reads.
    ///
    /// All info traffic targets a single venue host and is paced by the
    /// token bucket, so two warm connections cover the steady state. Signed
    /// exchange writes and LLM calls do NOT go through this client — their
    /// retry semantics (idempotency keys, fallback routing) are owned by
    /// the callers.
    pub fn create_client() -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(INFO_RETRY_MIN, INFO_RETRY_MAX)
            .build_with_max_retries(INFO_MAX_RETRIES);

        let client = Client::builder()
            .pool_max_idle_per_host(2)
            .timeout(INFO_REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }

    /// Plain client without retry middleware, for paths that must observe
    /// every failure themselves.
    pub fn create_bare_client(timeout: Duration) -> Client {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new())
    }
}
