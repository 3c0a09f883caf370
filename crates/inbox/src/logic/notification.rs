//! Notification fan-out
//!
//! A pure rule set maps inbox events to the notifications they produce, and a
//! background dispatcher task consumes the event bus and persists them.
//! Notification writes are independent of each other and of the triggering
//! mutation: a failed write is logged and swallowed, never propagated back to
//! the caller. Delivery is at-least-once; the store deduplicates on
//! `(user, conversation, message, kind)`.

use libsql::FromValue;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::error::CommonError;
use shared::identity::Session;
use shared::primitives::{
    PageRequest, WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4,
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use utoipa::{IntoParams, ToSchema};

use super::event::{EventRx, InboxEvent, InboxEventKind};
use super::message::SenderType;
use crate::repository::{CreateNotification, NotificationRepositoryLike};

/// What triggered a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Mention,
    NewMessage,
    Assignment,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Mention => "mention",
            NotificationKind::NewMessage => "new_message",
            NotificationKind::Assignment => "assignment",
        }
    }

    pub fn parse(s: &str) -> Option<NotificationKind> {
        match s {
            "mention" => Some(NotificationKind::Mention),
            "new_message" => Some(NotificationKind::NewMessage),
            "assignment" => Some(NotificationKind::Assignment),
            _ => None,
        }
    }
}

impl FromValue for NotificationKind {
    fn from_sql(val: libsql::Value) -> libsql::Result<Self> {
        match val {
            libsql::Value::Text(s) => {
                NotificationKind::parse(&s).ok_or(libsql::Error::InvalidColumnType)
            }
            _ => Err(libsql::Error::InvalidColumnType),
        }
    }
}

impl From<NotificationKind> for libsql::Value {
    fn from(val: NotificationKind) -> Self {
        libsql::Value::Text(val.as_str().to_string())
    }
}

/// A stored notification for one user
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: WrappedUuidV4,
    pub user_id: String,
    pub business_id: String,
    pub conversation_id: WrappedUuidV4,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<WrappedUuidV4>,
    pub kind: NotificationKind,
    #[schemars(with = "serde_json::Value")]
    #[schema(value_type = Object)]
    pub payload: WrappedJsonValue,
    pub created_at: WrappedChronoDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<WrappedChronoDateTime>,
}

const PREVIEW_MAX_CHARS: usize = 120;

fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_MAX_CHARS).collect()
}

/// The fan-out rules: which notifications an event produces.
///
/// - customer message on an assigned conversation -> `new_message` for the
///   assignee (nothing when unassigned);
/// - team message with `metadata.mentions` -> `mention` for each mentioned
///   user except the author, even when self-mentioned;
/// - successful assignment -> `assignment` for the newly assigned user,
///   keyed by the assignment's real id.
pub fn fan_out(event: &InboxEvent) -> Vec<CreateNotification> {
    match &event.kind {
        InboxEventKind::MessageAppended {
            conversation,
            message,
        } => match message.sender_type {
            SenderType::Customer => {
                let Some(assignee) = &conversation.assigned_to else {
                    return Vec::new();
                };
                vec![CreateNotification {
                    id: WrappedUuidV4::new(),
                    user_id: assignee.clone(),
                    business_id: conversation.business_id.clone(),
                    conversation_id: conversation.id.clone(),
                    message_id: Some(message.id.clone()),
                    kind: NotificationKind::NewMessage,
                    payload: WrappedJsonValue::new(json!({
                        "conversationId": conversation.id,
                        "messageId": message.id,
                        "customerName": conversation.customer_name,
                        "preview": preview(&message.content),
                    })),
                    created_at: WrappedChronoDateTime::now(),
                }]
            }
            SenderType::Team => message
                .mentions()
                .into_iter()
                .filter(|user_id| *user_id != message.sender)
                .map(|user_id| CreateNotification {
                    id: WrappedUuidV4::new(),
                    user_id,
                    business_id: conversation.business_id.clone(),
                    conversation_id: conversation.id.clone(),
                    message_id: Some(message.id.clone()),
                    kind: NotificationKind::Mention,
                    payload: WrappedJsonValue::new(json!({
                        "conversationId": conversation.id,
                        "messageId": message.id,
                        "mentionedBy": message.sender,
                        "preview": preview(&message.content),
                    })),
                    created_at: WrappedChronoDateTime::now(),
                })
                .collect(),
            SenderType::System => Vec::new(),
        },
        InboxEventKind::ConversationAssigned {
            conversation,
            assignment,
        } => vec![CreateNotification {
            id: WrappedUuidV4::new(),
            user_id: assignment.user_id.clone(),
            business_id: conversation.business_id.clone(),
            conversation_id: conversation.id.clone(),
            message_id: None,
            kind: NotificationKind::Assignment,
            payload: WrappedJsonValue::new(json!({
                "conversationId": conversation.id,
                "assignmentId": assignment.id,
                "assignedBy": assignment.assigned_by,
                "customerName": conversation.customer_name,
            })),
            created_at: WrappedChronoDateTime::now(),
        }],
        InboxEventKind::ConversationCreated { .. }
        | InboxEventKind::ConversationResolved { .. }
        | InboxEventKind::ConversationReopened { .. }
        | InboxEventKind::ConversationArchived { .. } => Vec::new(),
    }
}

/// Persist the notifications for one event. Each write stands alone; a
/// failure is logged and the rest still go through.
pub async fn deliver<R: NotificationRepositoryLike>(repository: &R, event: &InboxEvent) {
    for notification in fan_out(event) {
        let user_id = notification.user_id.clone();
        if let Err(e) = repository.create_notification(&notification).await {
            warn!(
                user_id = %user_id,
                error = %e,
                "Failed to persist notification"
            );
        }
    }
}

/// Background consumer of the event bus.
pub struct NotificationDispatcher;

impl NotificationDispatcher {
    /// Spawn the dispatcher task. It runs until the event bus is dropped.
    pub fn spawn<R>(repository: R, mut rx: EventRx) -> JoinHandle<()>
    where
        R: NotificationRepositoryLike + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            debug!("Notification dispatcher started");
            loop {
                match rx.recv().await {
                    Ok(event) => deliver(&repository, &event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Notification dispatcher lagged behind the event bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Notification dispatcher stopped");
        })
    }
}

// --- Requests / responses ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, JsonSchema, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(style = Form, parameter_in = Query)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ListNotificationsResponse {
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct MarkNotificationReadResponse {
    pub updated: bool,
}

// --- Logic Functions ---

/// List the caller's notifications, newest first.
pub async fn list_notifications<R: NotificationRepositoryLike>(
    repository: &R,
    session: &Session,
    query: ListNotificationsQuery,
) -> Result<ListNotificationsResponse, CommonError> {
    let page = PageRequest::new(
        query.limit.unwrap_or(shared::primitives::DEFAULT_PAGE_LIMIT),
        query.offset.unwrap_or(0),
    )
    .clamped();

    let notifications = repository
        .get_notifications_by_user(&session.business_id, &session.user_id, query.unread_only, &page)
        .await?;

    Ok(ListNotificationsResponse { notifications })
}

/// Mark one of the caller's notifications read. Already-read notifications
/// report `updated: false`.
pub async fn mark_notification_read<R: NotificationRepositoryLike>(
    repository: &R,
    session: &Session,
    notification_id: &WrappedUuidV4,
) -> Result<MarkNotificationReadResponse, CommonError> {
    let updated = repository
        .mark_notification_read(
            notification_id,
            &session.user_id,
            WrappedChronoDateTime::now(),
        )
        .await?;

    Ok(MarkNotificationReadResponse {
        updated: updated > 0,
    })
}

#[cfg(test)]
mod tests {
    mod unit {
        use super::super::*;
        use crate::logic::assignment::Assignment;
        use crate::logic::conversation::{
            Conversation, ConversationPriority, ConversationSource, ConversationStatus,
        };
        use crate::logic::message::{Message, MessageType, SenderInfo};
        use std::collections::BTreeMap;

        fn conversation(assigned_to: Option<&str>) -> Conversation {
            let now = WrappedChronoDateTime::now();
            Conversation {
                id: WrappedUuidV4::new(),
                business_id: "biz-1".to_string(),
                customer_phone: "+15550100".to_string(),
                customer_name: "Ada".to_string(),
                customer_id: None,
                source: ConversationSource::Sms,
                status: ConversationStatus::Open,
                priority: ConversationPriority::Medium,
                assigned_to: assigned_to.map(String::from),
                assigned_at: assigned_to.map(|_| now),
                last_message_at: Some(now),
                created_at: now,
                updated_at: now,
                resolved_at: None,
                archived_at: None,
            }
        }

        fn message(
            conversation: &Conversation,
            sender: SenderInfo,
            metadata: Option<serde_json::Value>,
        ) -> Message {
            Message {
                id: WrappedUuidV4::new(),
                conversation_id: conversation.id.clone(),
                sender: sender.sender,
                sender_type: sender.sender_type,
                message_type: MessageType::Text,
                content: "hello there".to_string(),
                metadata: metadata.map(WrappedJsonValue::new),
                insertion_sequence: 1,
                created_at: WrappedChronoDateTime::now(),
                read_by: BTreeMap::new(),
            }
        }

        #[test]
        fn test_customer_message_notifies_assignee() {
            let conv = conversation(Some("user-b"));
            let msg = message(&conv, SenderInfo::customer(), None);
            let event = InboxEvent::message_appended(conv, msg);

            let created = fan_out(&event);
            assert_eq!(created.len(), 1);
            assert_eq!(created[0].user_id, "user-b");
            assert_eq!(created[0].kind, NotificationKind::NewMessage);
        }

        #[test]
        fn test_customer_message_on_unassigned_conversation_is_silent() {
            let conv = conversation(None);
            let msg = message(&conv, SenderInfo::customer(), None);
            let event = InboxEvent::message_appended(conv, msg);

            assert!(fan_out(&event).is_empty());
        }

        #[test]
        fn test_mentions_notify_everyone_except_author() {
            let conv = conversation(Some("user-b"));
            let msg = message(
                &conv,
                SenderInfo::team("user-z"),
                Some(serde_json::json!({"mentions": ["user-x", "user-y", "user-z"]})),
            );
            let event = InboxEvent::message_appended(conv, msg);

            let created = fan_out(&event);
            assert_eq!(created.len(), 2);
            let targets: Vec<&str> = created.iter().map(|n| n.user_id.as_str()).collect();
            assert_eq!(targets, vec!["user-x", "user-y"]);
            assert!(created.iter().all(|n| n.kind == NotificationKind::Mention));
        }

        #[test]
        fn test_team_message_without_mentions_is_silent() {
            let conv = conversation(Some("user-b"));
            let msg = message(&conv, SenderInfo::team("user-z"), None);
            let event = InboxEvent::message_appended(conv, msg);

            assert!(fan_out(&event).is_empty());
        }

        #[test]
        fn test_system_message_never_notifies() {
            let conv = conversation(Some("user-b"));
            let msg = message(&conv, SenderInfo::system(), None);
            let event = InboxEvent::message_appended(conv, msg);

            assert!(fan_out(&event).is_empty());
        }

        #[test]
        fn test_assignment_notifies_new_assignee_with_assignment_id() {
            let conv = conversation(Some("user-a"));
            let now = WrappedChronoDateTime::now();
            let assignment = Assignment {
                id: WrappedUuidV4::new(),
                conversation_id: conv.id.clone(),
                user_id: "user-a".to_string(),
                assigned_by: "user-m".to_string(),
                assigned_at: now,
                completed_at: None,
                completed_by: None,
                notes: None,
            };
            let event = InboxEvent::conversation_assigned(conv, assignment.clone());

            let created = fan_out(&event);
            assert_eq!(created.len(), 1);
            assert_eq!(created[0].user_id, "user-a");
            assert_eq!(created[0].kind, NotificationKind::Assignment);
            assert_eq!(
                created[0].payload.get_inner()["assignmentId"],
                serde_json::to_value(&assignment.id).unwrap()
            );
        }

        #[test]
        fn test_preview_truncates_long_content() {
            let long = "x".repeat(500);
            assert_eq!(preview(&long).chars().count(), PREVIEW_MAX_CHARS);
        }
    }
}
