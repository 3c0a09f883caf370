//! Wire types for the SMS provider and the dispatch layer

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Outbound message handed to the provider gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySendRequest {
    pub from: String,
    pub to: String,
    pub body: String,
}

/// Successful provider response (subset of the message resource)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySendResponse {
    pub sid: String,
    pub status: String,
}

/// Provider error body: `{"code": 21211, "message": "...", "status": 400}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayErrorBody {
    pub code: Option<i64>,
    pub message: String,
    pub status: Option<u16>,
}

/// Terminal status of a dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Sent,
    Skipped,
}

/// Why a dispatch was skipped without contacting the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    RateLimited,
}

/// Result of `SmsDispatcher::send`. A skipped send is a soft outcome, not an
/// error.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub status: SendStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    /// Seconds left on the cooldown when the send was rate limited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<u64>,
}

impl SendResult {
    pub fn sent(provider_id: impl Into<String>) -> Self {
        Self {
            status: SendStatus::Sent,
            provider_id: Some(provider_id.into()),
            reason: None,
            cooldown_remaining_secs: None,
        }
    }

    pub fn rate_limited(remaining: std::time::Duration) -> Self {
        Self {
            status: SendStatus::Skipped,
            provider_id: None,
            reason: Some(SkipReason::RateLimited),
            cooldown_remaining_secs: Some(remaining.as_secs()),
        }
    }

    pub fn was_sent(&self) -> bool {
        self.status == SendStatus::Sent
    }
}

/// Delivery-tracking event handed to the monitoring collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub message_sid: Option<String>,
    pub from: String,
    pub to: String,
    pub status: String,
    pub body_length: usize,
}

/// Business subscription tier. Closed set, handled exhaustively wherever
/// responses are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Basic,
    Pro,
    Enterprise,
}
