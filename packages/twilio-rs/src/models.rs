use serde::{Deserialize, Serialize};

/// Message resource returned by `POST .../Messages.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub sid: String,
    pub status: Option<String>,
    pub to: Option<String>,
    pub from: Option<String>,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
}

/// Error envelope Twilio sends with 4xx/5xx responses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub code: Option<i64>,
    pub message: String,
    pub more_info: Option<String>,
    pub status: Option<u16>,
}
