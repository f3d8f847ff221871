use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::BookingApi;
use crate::model::Booking;

pub const USER_AGENT: &str = concat!("booking-notifier/", env!("CARGO_PKG_VERSION"));

/// Source of recent bookings.
#[async_trait]
pub trait BookingSource: Send + Sync {
    /// Return at most `max_rows` recent bookings, in whatever order upstream
    /// chooses.
    async fn fetch_recent(&self, max_rows: u32) -> Result<Vec<Booking>>;
}

/// Client for the public bookings endpoint.
#[derive(Clone)]
pub struct BookingApiClient {
    http: Client,
    base_url: Url,
    org: String,
}

impl fmt::Debug for BookingApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookingApiClient")
            .field("base_url", &self.base_url)
            .field("org", &self.org)
            .finish_non_exhaustive()
    }
}

impl BookingApiClient {
    pub fn from_config(cfg: &BookingApi) -> Result<Self> {
        let base_url = parse_base_url(&cfg.base_url)?;
        Self::with_base_url(
            cfg.org.clone(),
            base_url,
            Duration::from_secs(cfg.timeout_seconds),
        )
    }

    pub fn with_base_url(org: String, base_url: Url, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            org,
        })
    }

    pub fn build_request(&self, max_rows: u32) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("bookings/")
            .context("invalid booking API base URL")?;
        let max_rows = max_rows.to_string();
        self.http
            .get(endpoint)
            .query(&[
                ("org", self.org.as_str()),
                ("maxRows", max_rows.as_str()),
                ("verbose", "1"),
            ])
            .header("Accept", "application/json")
            .build()
            .context("failed to build bookings request")
    }
}

/// Make sure relative joins land under the configured path.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    Url::parse(&with_slash).with_context(|| format!("invalid base URL {}", raw))
}

/// Decode a bookings response body.
///
/// Error payloads from the API are errors. A body without a `bookings`
/// array is an empty page.
pub fn parse_bookings_response(body: &str) -> Result<Vec<Booking>> {
    let data: Value = serde_json::from_str(body).context("invalid bookings response JSON")?;
    if let Some(message) = application_error(&data) {
        bail!("booking API error: {}", message);
    }
    let rows = match data.get("bookings") {
        Some(Value::Array(rows)) => rows.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => bail!("unexpected bookings payload: {}", other),
    };
    Ok(rows.into_iter().map(Booking::from_value).collect())
}

fn application_error(data: &Value) -> Option<String> {
    let obj = data.as_object()?;
    let message = || {
        obj.get("message")
            .or_else(|| obj.get("error"))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "unknown error".to_string())
    };
    match obj.get("error") {
        Some(Value::Null) | Some(Value::Bool(false)) | None => {}
        Some(Value::String(s)) if s.is_empty() => {}
        Some(_) => return Some(message()),
    }
    let status_error = obj
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| s.eq_ignore_ascii_case("error"));
    let unsuccessful = matches!(obj.get("success"), Some(Value::Bool(false)));
    (status_error || unsuccessful).then(message)
}

#[async_trait]
impl BookingSource for BookingApiClient {
    #[instrument(skip(self), fields(org = %self.org))]
    async fn fetch_recent(&self, max_rows: u32) -> Result<Vec<Booking>> {
        let request = self.build_request(max_rows)?;
        debug!(url = %request.url(), "fetching bookings");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach booking API")?;

        let status = res.status();
        let body = res.text().await.context("failed to read bookings response")?;
        if !status.is_success() {
            warn!(%status, "booking API returned an error status");
            return Err(anyhow!("booking API error {}: {}", status, body));
        }

        let bookings = parse_bookings_response(&body)?;
        info!(count = bookings.len(), "fetched bookings");
        Ok(bookings)
    }
}
