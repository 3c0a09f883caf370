//! Message thread domain model and logic
//!
//! Messages form an append-only log per conversation, totally ordered by
//! `(created_at, insertion_sequence)` — the sequence is a per-conversation
//! monotonic counter breaking timestamp-resolution ties.

use std::collections::BTreeMap;

use libsql::FromValue;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shared::error::CommonError;
use shared::identity::Session;
use shared::primitives::{
    PageRequest, SortDirection, WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4,
};
use utoipa::{IntoParams, ToSchema};

use super::conversation::Conversation;
use super::event::{EventBus, InboxEvent};
use crate::repository::{AppendMessage, ConversationRepositoryLike, MessageRepositoryLike};

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Team,
    Customer,
    System,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Team => "team",
            SenderType::Customer => "customer",
            SenderType::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<SenderType> {
        match s {
            "team" => Some(SenderType::Team),
            "customer" => Some(SenderType::Customer),
            "system" => Some(SenderType::System),
            _ => None,
        }
    }
}

impl FromValue for SenderType {
    fn from_sql(val: libsql::Value) -> libsql::Result<Self> {
        match val {
            libsql::Value::Text(s) => SenderType::parse(&s).ok_or(libsql::Error::InvalidColumnType),
            _ => Err(libsql::Error::InvalidColumnType),
        }
    }
}

impl From<SenderType> for libsql::Value {
    fn from(val: SenderType) -> Self {
        libsql::Value::Text(val.as_str().to_string())
    }
}

/// Payload kind of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Document,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Document => "document",
            MessageType::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<MessageType> {
        match s {
            "text" => Some(MessageType::Text),
            "image" => Some(MessageType::Image),
            "document" => Some(MessageType::Document),
            "system" => Some(MessageType::System),
            _ => None,
        }
    }
}

impl FromValue for MessageType {
    fn from_sql(val: libsql::Value) -> libsql::Result<Self> {
        match val {
            libsql::Value::Text(s) => {
                MessageType::parse(&s).ok_or(libsql::Error::InvalidColumnType)
            }
            _ => Err(libsql::Error::InvalidColumnType),
        }
    }
}

impl From<MessageType> for libsql::Value {
    fn from(val: MessageType) -> Self {
        libsql::Value::Text(val.as_str().to_string())
    }
}

/// Sender marker used for customer-authored messages.
pub const CUSTOMER_SENDER: &str = "customer";
/// Sender marker used for engine-generated messages.
pub const SYSTEM_SENDER: &str = "system";

/// Author of an appended message: a team member's user id, the customer
/// marker, or the system marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct SenderInfo {
    pub sender: String,
    pub sender_type: SenderType,
}

impl SenderInfo {
    pub fn team(user_id: impl Into<String>) -> Self {
        Self {
            sender: user_id.into(),
            sender_type: SenderType::Team,
        }
    }

    pub fn customer() -> Self {
        Self {
            sender: CUSTOMER_SENDER.to_string(),
            sender_type: SenderType::Customer,
        }
    }

    pub fn system() -> Self {
        Self {
            sender: SYSTEM_SENDER.to_string(),
            sender_type: SenderType::System,
        }
    }
}

/// A single message in a conversation thread
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: WrappedUuidV4,
    pub conversation_id: WrappedUuidV4,
    pub sender: String,
    pub sender_type: SenderType,
    pub message_type: MessageType,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<WrappedJsonValue>,
    pub insertion_sequence: i64,
    pub created_at: WrappedChronoDateTime,
    /// user id -> read timestamp
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub read_by: BTreeMap<String, WrappedChronoDateTime>,
}

impl Message {
    /// Explicit mention targets from structured metadata. Free-text `@name`
    /// is never parsed; `metadata.mentions` is the only source.
    pub fn mentions(&self) -> Vec<String> {
        let Some(metadata) = &self.metadata else {
            return Vec::new();
        };
        let Some(entries) = metadata.get_inner().get("mentions").and_then(|m| m.as_array()) else {
            return Vec::new();
        };

        let mut seen = std::collections::BTreeSet::new();
        entries
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .filter(|s| seen.insert(s.to_string()))
            .map(String::from)
            .collect()
    }
}

// --- Requests / responses ---

/// Request body for appending a team message
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppendMessageRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<WrappedJsonValue>,
}

/// Paging and ordering for a thread listing
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, JsonSchema, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(style = Form, parameter_in = Query)]
pub struct ListMessagesQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_direction: Option<SortDirection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ListMessagesResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct MessageResponse {
    pub message: Message,
}

// --- Logic Functions ---

/// Append a message to a conversation the caller already holds. Used by the
/// public append path and by ingestion flows that fetched the conversation
/// themselves. Does not publish events.
pub async fn append_raw<R: MessageRepositoryLike>(
    repository: &R,
    sender: SenderInfo,
    conversation: &Conversation,
    content: String,
    metadata: Option<WrappedJsonValue>,
) -> Result<(Conversation, Message), CommonError> {
    if conversation.archived_at.is_some() {
        return Err(CommonError::invalid_request(
            "messages cannot be appended to an archived conversation",
        ));
    }

    let message_type = match sender.sender_type {
        SenderType::System => MessageType::System,
        _ => MessageType::Text,
    };

    append_typed(repository, sender, conversation, content, message_type, metadata).await
}

async fn append_typed<R: MessageRepositoryLike>(
    repository: &R,
    sender: SenderInfo,
    conversation: &Conversation,
    content: String,
    message_type: MessageType,
    metadata: Option<WrappedJsonValue>,
) -> Result<(Conversation, Message), CommonError> {
    repository
        .append_message(&AppendMessage {
            id: WrappedUuidV4::new(),
            conversation_id: conversation.id.clone(),
            sender: sender.sender,
            sender_type: sender.sender_type,
            message_type,
            content,
            metadata,
            created_at: WrappedChronoDateTime::now(),
        })
        .await
}

/// Append a message via the HTTP surface: validates, enforces tenancy, and
/// publishes the appended event for notification fan-out.
pub async fn append_message<R: ConversationRepositoryLike + MessageRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    session: &Session,
    conversation_id: &WrappedUuidV4,
    sender: SenderInfo,
    request: AppendMessageRequest,
) -> Result<Message, CommonError> {
    let content = request
        .content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| CommonError::invalid_request("content is required"))?;

    let conversation =
        super::conversation::fetch_owned(repository, session, conversation_id).await?;
    if conversation.archived_at.is_some() {
        return Err(CommonError::invalid_request(
            "messages cannot be appended to an archived conversation",
        ));
    }

    let message_type = request.message_type.unwrap_or(MessageType::Text);
    let (conversation, message) = append_typed(
        repository,
        sender,
        &conversation,
        content,
        message_type,
        request.metadata,
    )
    .await?;

    let _ = event_bus.publish(InboxEvent::message_appended(conversation, message.clone()));

    Ok(message)
}

/// List a conversation's messages, marking them read for the caller first so
/// the returned page reflects the caller's own receipts.
pub async fn list_messages<R: ConversationRepositoryLike + MessageRepositoryLike>(
    repository: &R,
    session: &Session,
    conversation_id: &WrappedUuidV4,
    query: ListMessagesQuery,
) -> Result<Vec<Message>, CommonError> {
    super::conversation::fetch_owned(repository, session, conversation_id).await?;

    repository
        .mark_messages_read(
            conversation_id,
            &session.user_id,
            WrappedChronoDateTime::now(),
        )
        .await?;

    let page = PageRequest::new(
        query.limit.unwrap_or(shared::primitives::DEFAULT_PAGE_LIMIT),
        query.offset.unwrap_or(0),
    )
    .clamped();

    repository
        .get_messages_by_conversation(
            conversation_id,
            query.sort_direction.unwrap_or_default(),
            &page,
        )
        .await
}

/// Mark every unread message in the conversation read for `user_id`,
/// returning how many were updated. Idempotent.
pub async fn mark_read<R: ConversationRepositoryLike + MessageRepositoryLike>(
    repository: &R,
    session: &Session,
    conversation_id: &WrappedUuidV4,
) -> Result<u64, CommonError> {
    super::conversation::fetch_owned(repository, session, conversation_id).await?;

    repository
        .mark_messages_read(
            conversation_id,
            &session.user_id,
            WrappedChronoDateTime::now(),
        )
        .await
}
