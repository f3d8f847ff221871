use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::booking_api::{parse_base_url, USER_AGENT};
use crate::config::Pushover;
use crate::message::Message;

/// Delivers one push message.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &Message) -> Result<()>;
}

#[derive(Clone)]
pub struct PushoverClient {
    http: Client,
    base_url: Url,
    app_token: String,
    user_key: String,
}

impl fmt::Debug for PushoverClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushoverClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
pub struct PushoverResponse {
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub request: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl PushoverClient {
    pub fn from_config(cfg: &Pushover) -> Result<Self> {
        let base_url = parse_base_url(&cfg.base_url)?;
        Self::with_base_url(
            cfg.app_token.clone(),
            cfg.user_key.clone(),
            base_url,
            Duration::from_secs(cfg.timeout_seconds),
        )
    }

    pub fn with_base_url(
        app_token: String,
        user_key: String,
        base_url: Url,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            app_token,
            user_key,
        })
    }

    pub fn build_request(&self, message: &Message) -> Result<reqwest::Request> {
        if self.app_token.trim().is_empty() || self.user_key.trim().is_empty() {
            bail!("missing Pushover credentials (PUSHOVER_APP_TOKEN / PUSHOVER_USER_KEY)");
        }
        let endpoint = self
            .base_url
            .join("1/messages.json")
            .context("invalid Pushover base URL")?;
        self.http
            .post(endpoint)
            .form(&[
                ("token", self.app_token.as_str()),
                ("user", self.user_key.as_str()),
                ("title", message.title.as_str()),
                ("message", message.body.as_str()),
            ])
            .build()
            .context("failed to build Pushover request")
    }

    /// Send and return the provider's answer; used by the smoke-test binary.
    pub async fn send_raw(&self, message: &Message) -> Result<(StatusCode, String)> {
        let request = self.build_request(message)?;
        debug!(url = %request.url(), title = %message.title, "sending push");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Pushover")?;
        let status = res.status();
        let body = res.text().await.context("failed to read Pushover response")?;
        Ok((status, body))
    }
}

/// Interpret a Pushover reply; anything but `status: 1` on a 2xx is a failure.
pub fn check_response(status: StatusCode, body: &str) -> Result<PushoverResponse> {
    let parsed: Option<PushoverResponse> = serde_json::from_str(body).ok();
    match parsed {
        Some(resp) if status.is_success() && resp.status == 1 => Ok(resp),
        Some(resp) if !resp.errors.is_empty() => Err(anyhow!(
            "pushover error {}: {}",
            status,
            resp.errors.join("; ")
        )),
        _ => Err(anyhow!("pushover error {}: {}", status, body)),
    }
}

#[async_trait]
impl Notifier for PushoverClient {
    #[instrument(skip_all, fields(title = %message.title))]
    async fn send(&self, message: &Message) -> Result<()> {
        let (status, body) = self.send_raw(message).await?;
        match check_response(status, &body) {
            Ok(resp) => {
                debug!(request = ?resp.request, "push accepted");
                Ok(())
            }
            Err(err) => {
                warn!(%status, "push rejected");
                Err(err)
            }
        }
    }
}
