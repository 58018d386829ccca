// Minimal Twilio client: programmable SMS over the Messages API.

use std::collections::HashMap;
use std::time::Duration;

pub mod models;
use reqwest::{header, Client};
use thiserror::Error;

use crate::models::{ApiErrorResponse, MessageResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.twilio.com";

#[derive(Debug, Clone)]
pub struct TwilioOptions {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number (E.164) or messaging service alias
    pub from_number: String,
    /// Overridable for tests; defaults to the public API host
    pub base_url: String,
    pub timeout: Duration,
}

impl TwilioOptions {
    pub fn new(account_sid: String, auth_token: String, from_number: String) -> Self {
        Self {
            account_sid,
            auth_token,
            from_number,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Credentials and sender are all present
    pub fn is_configured(&self) -> bool {
        !self.account_sid.trim().is_empty()
            && !self.auth_token.trim().is_empty()
            && !self.from_number.trim().is_empty()
    }
}

#[derive(Debug, Error)]
pub enum TwilioError {
    #[error("twilio credentials or sender number missing")]
    NotConfigured,

    #[error("request to twilio failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("twilio returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse twilio response: {0}")]
    Decode(String),
}

impl TwilioError {
    /// The API could not be reached at all (as opposed to rejecting the request)
    pub fn is_unreachable(&self) -> bool {
        match self {
            TwilioError::NotConfigured => true,
            TwilioError::Transport(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TwilioService {
    options: TwilioOptions,
    client: Client,
}

impl TwilioService {
    /// Build the HTTP client with the configured request timeout
    pub fn new(options: TwilioOptions) -> Result<Self, TwilioError> {
        let client = Client::builder().timeout(options.timeout).build()?;
        Ok(Self { options, client })
    }

    /// Send a plain SMS to `recipient`.
    pub async fn send_sms(
        &self,
        recipient: &str,
        body: &str,
    ) -> Result<MessageResponse, TwilioError> {
        if !self.options.is_configured() {
            return Err(TwilioError::NotConfigured);
        }

        let url = format!(
            "{base}/2010-04-01/Accounts/{sid}/Messages.json",
            base = self.options.base_url.trim_end_matches('/'),
            sid = self.options.account_sid
        );

        let mut form_body: HashMap<&str, &str> = HashMap::new();
        form_body.insert("To", recipient);
        form_body.insert("From", self.options.from_number.as_str());
        form_body.insert("Body", body);

        let response = self
            .client
            .post(url)
            .basic_auth(&self.options.account_sid, Some(&self.options.auth_token))
            .header(header::ACCEPT, "application/json")
            .form(&form_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&raw)
                .map(|e| e.message)
                .unwrap_or(raw);
            return Err(TwilioError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<MessageResponse>()
            .await
            .map_err(|e| TwilioError::Decode(e.to_string()))
    }
}
