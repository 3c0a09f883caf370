//! SMS provider gateway client
//!
//! HTTP client for a Twilio-style messages API: form-encoded POST with basic
//! auth, JSON responses, numeric error codes. The error classification here
//! is the contract the dispatcher builds on: a fatal error means the request
//! can never succeed as formed (bad sender, bad recipient, bad credentials);
//! everything else may succeed on retry.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{error, trace};

use crate::types::{GatewayErrorBody, GatewaySendRequest, GatewaySendResponse};

const TWILIO_API_BASE: &str = "https://api.twilio.com";

/// Provider error codes that can never succeed as formed.
/// 21211: invalid 'To' number; 21212: invalid 'From' number;
/// 21606: 'From' is not an SMS-capable number; 20003: authentication failure.
const INVALID_RECIPIENT_CODES: [i64; 1] = [21211];
const INVALID_SENDER_CODES: [i64; 2] = [21212, 21606];
const AUTH_FAILURE_CODES: [i64; 1] = [20003];

/// Abstraction over the SMS provider, so the dispatcher can be exercised
/// without network access.
#[async_trait]
pub trait SmsGatewayLike: Send + Sync {
    async fn send_message(
        &self,
        request: &GatewaySendRequest,
    ) -> Result<GatewaySendResponse, GatewayError>;
}

/// HTTP client for the provider's messages endpoint
pub struct TwilioClient {
    client: Client,
    account_sid: String,
    auth_token: String,
    base_url: String,
}

impl TwilioClient {
    pub fn new(account_sid: String, auth_token: String) -> Self {
        Self {
            client: Client::new(),
            account_sid,
            auth_token,
            base_url: TWILIO_API_BASE.to_string(),
        }
    }

    /// Point the client at a different host (local provider emulators).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SmsGatewayLike for TwilioClient {
    async fn send_message(
        &self,
        request: &GatewaySendRequest,
    ) -> Result<GatewaySendResponse, GatewayError> {
        trace!(to = %request.to, "Sending SMS via provider");

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        );
        let form = [
            ("From", request.from.as_str()),
            ("To", request.to.as_str()),
            ("Body", request.body.as_str()),
        ];

        let response = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(GatewayError::Request)?;

        let status = response.status();
        let body = response.text().await.map_err(GatewayError::Request)?;

        if !status.is_success() {
            let parsed: GatewayErrorBody =
                serde_json::from_str(&body).map_err(|e| GatewayError::Parse {
                    body: body.clone(),
                    error: e,
                })?;
            error!(
                code = ?parsed.code,
                status = %status,
                "Provider rejected SMS send"
            );
            return Err(GatewayError::Api {
                code: parsed.code,
                message: parsed.message,
                status: status.as_u16(),
            });
        }

        let result: GatewaySendResponse =
            serde_json::from_str(&body).map_err(|e| GatewayError::Parse {
                body: body.clone(),
                error: e,
            })?;

        trace!(sid = %result.sid, "SMS accepted by provider");
        Ok(result)
    }
}

/// Errors from the provider gateway
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to parse provider response: {error}, body: {body}")]
    Parse {
        body: String,
        #[source]
        error: serde_json::Error,
    },

    #[error("Provider API error {code:?}: {message}")]
    Api {
        code: Option<i64>,
        message: String,
        status: u16,
    },
}

impl GatewayError {
    /// Whether the request can never succeed as formed. Network errors,
    /// provider 5xx, and rate limits are all transient.
    pub fn is_fatal(&self) -> bool {
        match self {
            GatewayError::Api { code, status, .. } => {
                if *status == 401 {
                    return true;
                }
                match code {
                    Some(code) => {
                        INVALID_RECIPIENT_CODES.contains(code)
                            || INVALID_SENDER_CODES.contains(code)
                            || AUTH_FAILURE_CODES.contains(code)
                    }
                    None => false,
                }
            }
            GatewayError::Request(_) | GatewayError::Parse { .. } => false,
        }
    }
}
