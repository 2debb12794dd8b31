use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::config::ApiSettings;
use crate::error::PipelineError;
use crate::http_client::http_client;
use crate::rate_limit::{Clock, Limiter, RateLimiter, SystemClock};

const TOKEN_HEADER: &str = "X-Riot-Token";
pub const RATE_LIMITED: u16 = 429;

/// Status, retry hint and raw body of one upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(self.body.trim()).context("invalid json in upstream response")
    }

    /// Turns a non-success response into the error the caller aborts with.
    pub fn error_for(&self, what: impl Into<String>) -> PipelineError {
        PipelineError::UpstreamStatus {
            what: what.into(),
            status: self.status,
            body: self.body.clone(),
        }
    }
}

/// One GET against the upstream. The real implementation is [`HttpTransport`].
pub trait RiotTransport {
    fn get(&mut self, url: &str) -> Result<ApiResponse>;
}

pub struct HttpTransport {
    client: &'static Client,
    api_key: String,
}

impl HttpTransport {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: api_key.into(),
        })
    }
}

impl RiotTransport for HttpTransport {
    fn get(&mut self, url: &str) -> Result<ApiResponse> {
        let resp = self
            .client
            .get(url)
            .header(TOKEN_HEADER, &self.api_key)
            .send()
            .with_context(|| format!("request failed: {}", redact(url)))?;
        let status = resp.status();
        let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
            resp.headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        } else {
            None
        };
        let body = resp.text().context("failed reading body")?;
        Ok(ApiResponse {
            status: status.as_u16(),
            retry_after,
            body,
        })
    }
}

fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// URL builders for the endpoints the pipeline uses.
#[derive(Debug, Clone)]
pub struct RiotEndpoints {
    regional: String,
    platform: String,
}

impl RiotEndpoints {
    pub fn new(region: &str, platform: &str) -> Self {
        Self {
            regional: format!("https://{region}.api.riotgames.com"),
            platform: format!("https://{platform}.api.riotgames.com"),
        }
    }

    /// Sends every request to `base`, e.g. a local stand-in server.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            regional: base.clone(),
            platform: base,
        }
    }

    pub fn from_settings(settings: &ApiSettings) -> Self {
        match settings.base_override.as_deref() {
            Some(base) => Self::with_base(base),
            None => Self::new(&settings.region, &settings.platform),
        }
    }

    pub fn account_by_riot_id(&self, game_name: &str, tag_line: &str) -> Result<String> {
        let mut url = Url::parse(&self.regional)
            .with_context(|| format!("invalid base url {}", self.regional))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("base url cannot carry a path: {}", self.regional))?
            .pop_if_empty()
            .extend(["riot", "account", "v1", "accounts", "by-riot-id"])
            .push(game_name)
            .push(tag_line);
        Ok(url.to_string())
    }

    pub fn match_ids(&self, puuid: &str, start: usize, count: u32) -> String {
        format!(
            "{}/lol/match/v5/matches/by-puuid/{puuid}/ids?start={start}&count={count}",
            self.regional
        )
    }

    pub fn match_detail(&self, match_id: &str) -> String {
        format!("{}/lol/match/v5/matches/{match_id}", self.regional)
    }

    pub fn platform_status(&self) -> String {
        format!("{}/lol/status/v4/platform-data", self.platform)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub default_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            default_retry_after: Duration::from_secs(2),
        }
    }
}

/// Paced, retrying access to the upstream API.
pub struct RiotApi<T: RiotTransport, C: Clock> {
    transport: T,
    endpoints: RiotEndpoints,
    limiter: Limiter<C>,
    retry: RetryPolicy,
}

impl RiotApi<HttpTransport, SystemClock> {
    pub fn from_settings(settings: &ApiSettings) -> Result<Self> {
        Ok(Self::new(
            HttpTransport::new(settings.api_key.clone())?,
            RiotEndpoints::from_settings(settings),
            Limiter::new(SystemClock::default(), &settings.rate_limits),
            RetryPolicy {
                max_attempts: settings.max_attempts,
                default_retry_after: settings.default_retry_after,
            },
        ))
    }
}

impl<T: RiotTransport, C: Clock> RiotApi<T, C> {
    pub fn new(
        transport: T,
        endpoints: RiotEndpoints,
        limiter: Limiter<C>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            endpoints,
            limiter,
            retry,
        }
    }

    pub fn endpoints(&self) -> &RiotEndpoints {
        &self.endpoints
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// GET with rate-limit recovery. A 429 sleeps for the response's hint (or
    /// the default) and retries; once attempts run out the last response is
    /// returned as-is and the caller inspects its status.
    pub fn get(&mut self, url: &str) -> Result<ApiResponse> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.limiter.acquire();
            let resp = self.transport.get(url)?;
            if resp.status != RATE_LIMITED || attempt >= max_attempts {
                return Ok(resp);
            }
            let wait = resp.retry_after.unwrap_or(self.retry.default_retry_after);
            warn!(
                attempt,
                max_attempts,
                "rate limited, sleeping {}s",
                wait.as_secs_f64()
            );
            self.limiter.clock().sleep(wait);
            attempt += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use super::*;
    use governor::clock::FakeRelativeClock;

    /// Replays scripted responses; answers 404 once the script runs dry.
    #[derive(Debug, Default)]
    pub struct ScriptedTransport {
        pub responses: VecDeque<Result<ApiResponse, String>>,
        pub requested: Vec<String>,
    }

    impl ScriptedTransport {
        pub fn push(&mut self, status: u16, body: &str) {
            self.responses.push_back(Ok(ApiResponse {
                status,
                retry_after: None,
                body: body.to_string(),
            }));
        }

        pub fn push_rate_limited(&mut self, retry_after_secs: Option<u64>) {
            self.responses.push_back(Ok(ApiResponse {
                status: RATE_LIMITED,
                retry_after: retry_after_secs.map(Duration::from_secs),
                body: "rate limited".to_string(),
            }));
        }

        /// Next request fails before any response arrives.
        pub fn push_transport_error(&mut self, message: &str) {
            self.responses.push_back(Err(message.to_string()));
        }
    }

    impl RiotTransport for ScriptedTransport {
        fn get(&mut self, url: &str) -> Result<ApiResponse> {
            self.requested.push(url.to_string());
            match self.responses.pop_front() {
                Some(Ok(resp)) => Ok(resp),
                Some(Err(message)) => Err(anyhow!(message)),
                None => Ok(ApiResponse {
                    status: 404,
                    retry_after: None,
                    body: "not found".to_string(),
                }),
            }
        }
    }

    pub fn scripted_api(
        transport: ScriptedTransport,
        clock: &FakeRelativeClock,
    ) -> RiotApi<ScriptedTransport, FakeRelativeClock> {
        RiotApi::new(
            transport,
            RiotEndpoints::with_base("http://upstream.test"),
            Limiter::unlimited(clock.clone()),
            RetryPolicy::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptedTransport, scripted_api};
    use super::*;
    use governor::clock::FakeRelativeClock;

    use crate::rate_limit::elapsed;

    #[test]
    fn riot_id_segments_are_percent_encoded() {
        let endpoints = RiotEndpoints::new("europe", "euw1");
        let url = endpoints
            .account_by_riot_id("Faker Fan/1", "EUW")
            .expect("valid url");
        assert_eq!(
            url,
            "https://europe.api.riotgames.com/riot/account/v1/accounts/by-riot-id/Faker%20Fan%2F1/EUW"
        );
    }

    #[test]
    fn match_ids_url_carries_paging() {
        let endpoints = RiotEndpoints::with_base("http://localhost:9000/");
        assert_eq!(
            endpoints.match_ids("abc", 200, 100),
            "http://localhost:9000/lol/match/v5/matches/by-puuid/abc/ids?start=200&count=100"
        );
    }

    #[test]
    fn retries_after_rate_limit_using_hint() {
        let clock = FakeRelativeClock::default();
        let mut transport = ScriptedTransport::default();
        transport.push_rate_limited(Some(7));
        transport.push(200, "{}");
        let mut api = scripted_api(transport, &clock);

        let resp = api.get("http://upstream.test/x").expect("transport ok");
        assert_eq!(resp.status, 200);
        assert_eq!(api.transport().requested.len(), 2);
        assert_eq!(elapsed(&clock), Duration::from_secs(7));
    }

    #[test]
    fn missing_hint_falls_back_to_default_wait() {
        let clock = FakeRelativeClock::default();
        let mut transport = ScriptedTransport::default();
        transport.push_rate_limited(None);
        transport.push(200, "[]");
        let mut api = scripted_api(transport, &clock);

        api.get("http://upstream.test/x").expect("transport ok");
        assert_eq!(elapsed(&clock), Duration::from_secs(2));
    }

    #[test]
    fn exhausted_retries_return_last_response() {
        let clock = FakeRelativeClock::default();
        let mut transport = ScriptedTransport::default();
        for _ in 0..6 {
            transport.push_rate_limited(Some(1));
        }
        let mut api = scripted_api(transport, &clock);

        let resp = api.get("http://upstream.test/x").expect("transport ok");
        assert_eq!(resp.status, RATE_LIMITED);
        assert_eq!(api.transport().requested.len(), 5);
        assert_eq!(elapsed(&clock), Duration::from_secs(4));
    }

    #[test]
    fn other_failures_are_not_retried() {
        let clock = FakeRelativeClock::default();
        let mut transport = ScriptedTransport::default();
        transport.push(500, "boom");
        let mut api = scripted_api(transport, &clock);

        let resp = api.get("http://upstream.test/x").expect("transport ok");
        assert_eq!(resp.status, 500);
        assert_eq!(api.transport().requested.len(), 1);
    }
}
