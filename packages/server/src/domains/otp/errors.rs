use thiserror::Error;

#[derive(Error, Debug)]
pub enum OtpError {
    #[error("Bad input: {0}")]
    BadInput(&'static str),

    /// Gateway unconfigured, unreachable or timed out; retry later
    #[error("SMS delivery unavailable")]
    DeliveryUnavailable,

    #[error("SMS delivery failed: {0}")]
    DeliveryFailed(#[source] anyhow::Error),

    #[error("Challenge store error: {0}")]
    Store(#[source] anyhow::Error),
}
