//! Inbound webhook ingestion flows
//!
//! Provider callbacks enter here: an inbound SMS threads into the customer's
//! open conversation (or starts one), and a missed call additionally drives
//! the auto-response send through the dispatcher. The provider-number to
//! business mapping happens upstream; these flows receive the business id
//! already resolved.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::error::CommonError;
use shared::identity::Session;
use shared::primitives::{WrappedJsonValue, WrappedUuidV4};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use inbox::logic::conversation::{
    self, Conversation, ConversationSource, CreateConversationRequest,
};
use inbox::logic::event::EventBus;
use inbox::logic::message::{self, AppendMessageRequest, MessageType, SenderInfo};
use inbox::repository::{ConversationRepositoryLike, MessageRepositoryLike};

use crate::logic::dispatcher::{SendOptions, SmsDispatcher};
use crate::logic::responder::auto_response_body;
use crate::types::SubscriptionTier;

/// Per-business auto-response settings. The business/billing store is an
/// external collaborator; only what response generation needs is injected.
#[derive(Debug, Clone)]
pub struct AutoResponseConfig {
    pub business_name: String,
    pub tier: SubscriptionTier,
}

/// Inbound SMS callback payload (normalized)
#[derive(Debug, Clone)]
pub struct InboundSms {
    pub message_sid: String,
    pub from: String,
    pub to: String,
    pub body: String,
}

/// Missed-call callback payload (normalized)
#[derive(Debug, Clone)]
pub struct MissedCall {
    pub call_sid: String,
    pub from: String,
    pub to: String,
    pub call_status: String,
}

/// What happened to the auto-response for a missed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AutoResponseOutcome {
    Sent,
    Skipped,
    Failed,
}

/// Result of ingesting one webhook callback
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
    pub conversation_id: WrappedUuidV4,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<WrappedUuidV4>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_response: Option<AutoResponseOutcome>,
}

fn system_session(business_id: &str) -> Session {
    Session::new(inbox::logic::message::SYSTEM_SENDER, business_id)
}

/// The customer's current conversation for this number, or a fresh one.
async fn find_or_create_conversation<R>(
    repository: &R,
    event_bus: &EventBus,
    session: &Session,
    customer_phone: &str,
    source: ConversationSource,
) -> Result<Conversation, CommonError>
where
    R: ConversationRepositoryLike + MessageRepositoryLike,
{
    if let Some(existing) = repository
        .find_open_conversation_by_phone(&session.business_id, customer_phone)
        .await?
    {
        return Ok(existing);
    }

    let detail = conversation::create_conversation(
        repository,
        event_bus,
        session,
        CreateConversationRequest {
            customer_phone: Some(customer_phone.to_string()),
            source: Some(source),
            ..Default::default()
        },
    )
    .await?;

    info!(
        conversation_id = %detail.conversation.id,
        customer_phone,
        source = ?source,
        "Created conversation from inbound webhook"
    );
    Ok(detail.conversation)
}

/// Ingest an inbound SMS: thread it into the customer's conversation as a
/// customer message. Notification fan-out rides on the appended event.
pub async fn ingest_inbound_sms<R>(
    repository: &R,
    event_bus: &EventBus,
    business_id: &str,
    inbound: InboundSms,
) -> Result<IngestResult, CommonError>
where
    R: ConversationRepositoryLike + MessageRepositoryLike,
{
    let session = system_session(business_id);
    let conversation = find_or_create_conversation(
        repository,
        event_bus,
        &session,
        &inbound.from,
        ConversationSource::Sms,
    )
    .await?;

    let message = message::append_message(
        repository,
        event_bus,
        &session,
        &conversation.id,
        SenderInfo::customer(),
        AppendMessageRequest {
            content: Some(inbound.body),
            metadata: Some(WrappedJsonValue::new(json!({
                "messageSid": inbound.message_sid,
                "to": inbound.to,
            }))),
            ..Default::default()
        },
    )
    .await?;

    Ok(IngestResult {
        conversation_id: conversation.id,
        message_id: Some(message.id),
        auto_response: None,
    })
}

/// Ingest a missed call: record the marker message, then send the tier's
/// auto-response through the dispatcher. A rate-limited send is a soft skip;
/// a gateway failure is logged and the callback still succeeds — the call
/// record must not be lost because the reply could not go out.
pub async fn handle_missed_call<R>(
    repository: &R,
    event_bus: &EventBus,
    dispatcher: &SmsDispatcher,
    config: &AutoResponseConfig,
    business_id: &str,
    missed_call: MissedCall,
) -> Result<IngestResult, CommonError>
where
    R: ConversationRepositoryLike + MessageRepositoryLike,
{
    let session = system_session(business_id);
    let conversation = find_or_create_conversation(
        repository,
        event_bus,
        &session,
        &missed_call.from,
        ConversationSource::MissedCall,
    )
    .await?;

    let marker = message::append_message(
        repository,
        event_bus,
        &session,
        &conversation.id,
        SenderInfo::system(),
        AppendMessageRequest {
            content: Some(format!("Missed call ({})", missed_call.call_status)),
            message_type: Some(MessageType::System),
            metadata: Some(WrappedJsonValue::new(json!({
                "callSid": missed_call.call_sid,
                "to": missed_call.to,
            }))),
        },
    )
    .await?;

    let customer_name =
        Some(conversation.customer_name.as_str()).filter(|name| *name != "Unknown");
    let body = auto_response_body(config.tier, &config.business_name, customer_name);

    let auto_response = match dispatcher
        .send(&missed_call.to, &missed_call.from, &body, SendOptions::default())
        .await
    {
        Ok(result) if result.was_sent() => {
            message::append_message(
                repository,
                event_bus,
                &session,
                &conversation.id,
                SenderInfo::system(),
                AppendMessageRequest {
                    content: Some(body),
                    metadata: Some(WrappedJsonValue::new(json!({
                        "autoResponse": true,
                        "messageSid": result.provider_id,
                    }))),
                    ..Default::default()
                },
            )
            .await?;
            AutoResponseOutcome::Sent
        }
        Ok(result) => {
            debug!(
                to = %missed_call.from,
                remaining_secs = ?result.cooldown_remaining_secs,
                "Auto-response skipped by rate limiter"
            );
            AutoResponseOutcome::Skipped
        }
        Err(e) => {
            warn!(to = %missed_call.from, error = %e, "Auto-response send failed");
            AutoResponseOutcome::Failed
        }
    };

    Ok(IngestResult {
        conversation_id: conversation.id,
        message_id: Some(marker.id),
        auto_response: Some(auto_response),
    })
}
