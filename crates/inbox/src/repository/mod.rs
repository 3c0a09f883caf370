//! Repository layer for the inbox crate
//! Trait definitions and the sqlite implementation for conversation, message,
//! assignment, and notification storage

pub mod sqlite;

use async_trait::async_trait;
use shared::{
    error::CommonError,
    primitives::{
        PageRequest, SortDirection, WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4,
    },
};

pub use sqlite::Repository;

use crate::logic::{
    assignment::Assignment,
    conversation::{Conversation, ConversationPriority, ConversationStats, ConversationStatus},
    message::{Message, MessageType, SenderType},
    notification::{Notification, NotificationKind},
};

// --- Conversation Repository Types ---

/// Parameters for inserting a new conversation
#[derive(Debug, Clone)]
pub struct CreateConversation {
    pub conversation: Conversation,
}

/// Parameters for a partial conversation update (customer fields + priority)
#[derive(Debug, Clone)]
pub struct UpdateConversation {
    pub id: WrappedUuidV4,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_id: Option<String>,
    pub priority: ConversationPriority,
    pub updated_at: WrappedChronoDateTime,
}

/// Parameters for the atomic assign transition
#[derive(Debug, Clone)]
pub struct AssignConversation {
    pub conversation_id: WrappedUuidV4,
    pub assignment_id: WrappedUuidV4,
    pub user_id: String,
    pub assigned_by: String,
    pub notes: Option<String>,
    pub now: WrappedChronoDateTime,
}

/// Parameters for the resolve transition
#[derive(Debug, Clone)]
pub struct ResolveConversation {
    pub conversation_id: WrappedUuidV4,
    pub resolved_by: String,
    pub now: WrappedChronoDateTime,
}

/// Parameters for the reopen transition
#[derive(Debug, Clone)]
pub struct ReopenConversation {
    pub conversation_id: WrappedUuidV4,
    pub now: WrappedChronoDateTime,
}

/// Parameters for the archive transition
#[derive(Debug, Clone)]
pub struct ArchiveConversation {
    pub conversation_id: WrappedUuidV4,
    pub archived_by: String,
    pub now: WrappedChronoDateTime,
}

/// Tenant-scoped listing filter
#[derive(Debug, Clone)]
pub struct ConversationFilter {
    pub business_id: String,
    pub status: Option<ConversationStatus>,
    pub assigned_to: Option<String>,
    pub priority: Option<ConversationPriority>,
    pub search: Option<String>,
    pub customer_phone: Option<String>,
    pub include_archived: bool,
    pub page: PageRequest,
}

// --- Message Repository Types ---

/// Parameters for appending a message to a thread
#[derive(Debug, Clone)]
pub struct AppendMessage {
    pub id: WrappedUuidV4,
    pub conversation_id: WrappedUuidV4,
    pub sender: String,
    pub sender_type: SenderType,
    pub message_type: MessageType,
    pub content: String,
    pub metadata: Option<WrappedJsonValue>,
    pub created_at: WrappedChronoDateTime,
}

// --- Notification Repository Types ---

/// Parameters for persisting a notification
#[derive(Debug, Clone)]
pub struct CreateNotification {
    pub id: WrappedUuidV4,
    pub user_id: String,
    pub business_id: String,
    pub conversation_id: WrappedUuidV4,
    pub message_id: Option<WrappedUuidV4>,
    pub kind: NotificationKind,
    pub payload: WrappedJsonValue,
    pub created_at: WrappedChronoDateTime,
}

// --- Repository Traits ---

/// Repository trait for conversation storage and transitions.
///
/// The transition methods (`assign_conversation`, `resolve_conversation`,
/// `reopen_conversation`, `archive_conversation`) validate the status move
/// and apply all side effects in one transaction: either the whole
/// transition lands or none of it does.
#[async_trait]
pub trait ConversationRepositoryLike: Send + Sync {
    async fn create_conversation(&self, params: &CreateConversation) -> Result<(), CommonError>;

    async fn get_conversation_by_id(
        &self,
        id: &WrappedUuidV4,
    ) -> Result<Option<Conversation>, CommonError>;

    /// Most recent non-archived conversation for a customer number, used by
    /// inbound ingestion to thread follow-ups.
    async fn find_open_conversation_by_phone(
        &self,
        business_id: &str,
        customer_phone: &str,
    ) -> Result<Option<Conversation>, CommonError>;

    async fn list_conversations(
        &self,
        filter: &ConversationFilter,
    ) -> Result<Vec<Conversation>, CommonError>;

    async fn conversation_stats(
        &self,
        business_id: &str,
        include_archived: bool,
    ) -> Result<ConversationStats, CommonError>;

    async fn update_conversation(&self, params: &UpdateConversation) -> Result<(), CommonError>;

    /// Complete the prior active assignment, insert the new one, and open
    /// the conversation — atomically.
    async fn assign_conversation(
        &self,
        params: &AssignConversation,
    ) -> Result<(Conversation, Assignment), CommonError>;

    async fn resolve_conversation(
        &self,
        params: &ResolveConversation,
    ) -> Result<Conversation, CommonError>;

    async fn reopen_conversation(
        &self,
        params: &ReopenConversation,
    ) -> Result<Conversation, CommonError>;

    async fn archive_conversation(
        &self,
        params: &ArchiveConversation,
    ) -> Result<Conversation, CommonError>;
}

/// Repository trait for assignment rows
#[async_trait]
pub trait AssignmentRepositoryLike: Send + Sync {
    async fn get_active_assignment(
        &self,
        conversation_id: &WrappedUuidV4,
    ) -> Result<Option<Assignment>, CommonError>;

    async fn get_assignment_by_id(
        &self,
        id: &WrappedUuidV4,
    ) -> Result<Option<Assignment>, CommonError>;

    async fn complete_assignment(
        &self,
        id: &WrappedUuidV4,
        completed_by: &str,
        now: WrappedChronoDateTime,
    ) -> Result<Assignment, CommonError>;

    async fn annotate_assignment(
        &self,
        id: &WrappedUuidV4,
        notes: &str,
    ) -> Result<Assignment, CommonError>;
}

/// Repository trait for message threads
#[async_trait]
pub trait MessageRepositoryLike: Send + Sync {
    /// Append a message, allocating its insertion sequence and bumping the
    /// conversation's `last_message_at` in the same transaction. Returns the
    /// updated conversation snapshot and the stored message.
    async fn append_message(
        &self,
        params: &AppendMessage,
    ) -> Result<(Conversation, Message), CommonError>;

    async fn get_messages_by_conversation(
        &self,
        conversation_id: &WrappedUuidV4,
        direction: SortDirection,
        page: &PageRequest,
    ) -> Result<Vec<Message>, CommonError>;

    /// Set the read receipt for every message lacking one for this user.
    /// Returns the number of messages updated; 0 when nothing was unread.
    async fn mark_messages_read(
        &self,
        conversation_id: &WrappedUuidV4,
        user_id: &str,
        now: WrappedChronoDateTime,
    ) -> Result<u64, CommonError>;
}

/// Repository trait for notifications
#[async_trait]
pub trait NotificationRepositoryLike: Send + Sync {
    /// Insert a notification; replays of the same `(user, conversation,
    /// message, kind)` tuple are ignored.
    async fn create_notification(&self, params: &CreateNotification) -> Result<(), CommonError>;

    async fn get_notifications_by_user(
        &self,
        business_id: &str,
        user_id: &str,
        unread_only: bool,
        page: &PageRequest,
    ) -> Result<Vec<Notification>, CommonError>;

    /// Returns the number of rows updated (0 when unknown or already read).
    async fn mark_notification_read(
        &self,
        id: &WrappedUuidV4,
        user_id: &str,
        now: WrappedChronoDateTime,
    ) -> Result<u64, CommonError>;
}

/// Combined repository trait for all inbox operations
#[async_trait]
pub trait InboxFullRepositoryLike:
    ConversationRepositoryLike
    + AssignmentRepositoryLike
    + MessageRepositoryLike
    + NotificationRepositoryLike
{
}

// Blanket implementation for any type that implements all traits
impl<T> InboxFullRepositoryLike for T where
    T: ConversationRepositoryLike
        + AssignmentRepositoryLike
        + MessageRepositoryLike
        + NotificationRepositoryLike
{
}
