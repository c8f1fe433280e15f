use crate::client::error::{redact, DarkskyError};
use crate::client::rate_limit::RateLimiter;
use crate::client::retry::{with_backoff, Backoff};
use crate::client::{Fetched, ForecastApi};
use bon::bon;
use chrono::Utc;
use log::{error, info, warn};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};

pub const BASE_URL: &str = "https://api.darksky.net";

// Lightweight request used to confirm the secret key: a single location with every
// optional section excluded.
const CHECK_LOCATION: &str = "38.840544,-105.0444233";
const CHECK_PARAMS: &str = "exclude=currently,minutely,hourly,daily,alerts,flags&lang=en&units=us";

/// HTTP client for the Dark Sky forecast API.
///
/// Every request sent through [`ForecastApi::get`] is rate limited and retried with
/// exponential backoff on server errors, connection failures and HTTP 429. Other
/// failure statuses surface immediately as a typed [`DarkskyError`].
pub struct DarkskyClient {
    http: Client,
    secret_key: String,
    user_agent: Option<String>,
    base_url: String,
    backoff: Backoff,
    limiter: RateLimiter,
    verified: AtomicBool,
}

#[bon]
impl DarkskyClient {
    /// Creates a client. Only `secret_key` is required; `base_url`, `backoff` and
    /// `limiter` default to the production API and its limits.
    #[builder]
    pub fn new(
        secret_key: String,
        user_agent: Option<String>,
        base_url: Option<String>,
        backoff: Option<Backoff>,
        limiter: Option<RateLimiter>,
    ) -> Self {
        Self {
            http: Client::new(),
            secret_key,
            user_agent,
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| BASE_URL.to_string()),
            backoff: backoff.unwrap_or_default(),
            limiter: limiter.unwrap_or_default(),
            verified: AtomicBool::new(false),
        }
    }

    /// Confirms the secret key with one cheap forecast request.
    ///
    /// Takes a rate limit slot per attempt and retries server errors with the client's
    /// backoff policy. Returns `Ok(false)` when the API answers with something that is
    /// not a forecast.
    ///
    /// # Errors
    ///
    /// [`DarkskyError::MissingSecretKey`] if no key was configured, otherwise whatever
    /// error the API returned.
    pub async fn verify_credentials(&self) -> Result<bool, DarkskyError> {
        if self.secret_key.trim().is_empty() {
            return Err(DarkskyError::MissingSecretKey);
        }

        let today = Utc::now().date_naive();
        let url = format!(
            "{}/forecast/{}/{},{}T00:00:00?{}",
            self.base_url, self.secret_key, CHECK_LOCATION, today, CHECK_PARAMS
        );

        let url = url.as_str();
        let fetched = with_backoff(&self.backoff, DarkskyError::is_server_error, move || async move {
            self.limiter.acquire().await;
            self.send(url).await
        })
        .await
        .inspect_err(|e| error!("Secret key check failed: {}", e))?;

        let valid = match fetched {
            Fetched::Payload(body) => body.get("latitude").is_some(),
            Fetched::Empty => false,
        };
        self.verified.store(true, Ordering::Relaxed);
        Ok(valid)
    }

    async fn send(&self, url: &str) -> Result<Fetched, DarkskyError> {
        let mut request = self.http.get(url).header(ACCEPT, "application/json");
        if let Some(agent) = &self.user_agent {
            request = request.header(USER_AGENT, agent);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DarkskyError::NetworkRequest {
                url: redact(url),
                source: e.without_url(),
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| DarkskyError::NetworkRequest {
                url: redact(url),
                source: e.without_url(),
            })?;

        if !status.is_success() {
            warn!("HTTP {} for {}", status, redact(url));
            return Err(DarkskyError::from_response(url, status, &body));
        }

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Fetched::Empty);
        }

        let value = serde_json::from_slice(&body).map_err(|e| DarkskyError::JsonParse {
            url: redact(url),
            source: e,
        })?;
        Ok(Fetched::from_value(value))
    }
}

impl ForecastApi for DarkskyClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, url: &str) -> Result<Fetched, DarkskyError> {
        // The key is checked once, before the first forecast request.
        if !self.verified.load(Ordering::Relaxed) {
            if self.verify_credentials().await? {
                info!("Secret key verified");
            } else {
                warn!("Secret key check did not return a forecast, continuing anyway");
            }
        }

        let url = url.replace("<secret_key>", &self.secret_key);
        let url = url.as_str();
        with_backoff(&self.backoff, DarkskyError::is_transient, move || async move {
            self.limiter.acquire().await;
            self.send(url).await
        })
        .await
    }
}
