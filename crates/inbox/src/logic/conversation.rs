//! Conversation domain model and lifecycle state machine
//!
//! A conversation is the unit of a customer-business interaction thread. Its
//! status moves through a closed transition table; every transition applies
//! its side effects atomically or not at all.

use libsql::FromValue;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shared::error::CommonError;
use shared::identity::Session;
use shared::primitives::{PageRequest, WrappedChronoDateTime, WrappedUuidV4};
use utoipa::{IntoParams, ToSchema};

use super::assignment::Assignment;
use super::event::{EventBus, InboxEvent};
use super::message::{Message, SenderInfo};
use crate::repository::{
    ArchiveConversation, AssignConversation, AssignmentRepositoryLike, ConversationFilter,
    ConversationRepositoryLike, CreateConversation, MessageRepositoryLike, ReopenConversation,
    ResolveConversation, UpdateConversation,
};

/// Conversation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    New,
    Open,
    Resolved,
    Archived,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::New => "new",
            ConversationStatus::Open => "open",
            ConversationStatus::Resolved => "resolved",
            ConversationStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<ConversationStatus> {
        match s {
            "new" => Some(ConversationStatus::New),
            "open" => Some(ConversationStatus::Open),
            "resolved" => Some(ConversationStatus::Resolved),
            "archived" => Some(ConversationStatus::Archived),
            _ => None,
        }
    }

    /// The legal transition table. `Archived` is terminal; `Open -> Open`
    /// covers reassignment.
    pub fn can_transition_to(&self, to: ConversationStatus) -> bool {
        use ConversationStatus::*;
        match (*self, to) {
            (Archived, _) => false,
            (_, Archived) => true,
            (New, Open) | (Open, Open) | (Resolved, Open) => true,
            (New, Resolved) | (Open, Resolved) => true,
            (Resolved, New) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromValue for ConversationStatus {
    fn from_sql(val: libsql::Value) -> libsql::Result<Self> {
        match val {
            libsql::Value::Text(s) => {
                ConversationStatus::parse(&s).ok_or(libsql::Error::InvalidColumnType)
            }
            _ => Err(libsql::Error::InvalidColumnType),
        }
    }
}

impl From<ConversationStatus> for libsql::Value {
    fn from(val: ConversationStatus) -> Self {
        libsql::Value::Text(val.as_str().to_string())
    }
}

/// Fail with `InvalidTransition` unless the move is in the transition table.
pub fn ensure_transition(
    from: ConversationStatus,
    to: ConversationStatus,
) -> Result<(), CommonError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(CommonError::InvalidTransition {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        })
    }
}

/// Where a conversation originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConversationSource {
    Sms,
    MissedCall,
    Web,
}

impl ConversationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationSource::Sms => "sms",
            ConversationSource::MissedCall => "missed_call",
            ConversationSource::Web => "web",
        }
    }

    pub fn parse(s: &str) -> Option<ConversationSource> {
        match s {
            "sms" => Some(ConversationSource::Sms),
            "missed_call" => Some(ConversationSource::MissedCall),
            "web" => Some(ConversationSource::Web),
            _ => None,
        }
    }
}

impl FromValue for ConversationSource {
    fn from_sql(val: libsql::Value) -> libsql::Result<Self> {
        match val {
            libsql::Value::Text(s) => {
                ConversationSource::parse(&s).ok_or(libsql::Error::InvalidColumnType)
            }
            _ => Err(libsql::Error::InvalidColumnType),
        }
    }
}

impl From<ConversationSource> for libsql::Value {
    fn from(val: ConversationSource) -> Self {
        libsql::Value::Text(val.as_str().to_string())
    }
}

/// Triage priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl ConversationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationPriority::Low => "low",
            ConversationPriority::Medium => "medium",
            ConversationPriority::High => "high",
            ConversationPriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<ConversationPriority> {
        match s {
            "low" => Some(ConversationPriority::Low),
            "medium" => Some(ConversationPriority::Medium),
            "high" => Some(ConversationPriority::High),
            "urgent" => Some(ConversationPriority::Urgent),
            _ => None,
        }
    }
}

impl FromValue for ConversationPriority {
    fn from_sql(val: libsql::Value) -> libsql::Result<Self> {
        match val {
            libsql::Value::Text(s) => {
                ConversationPriority::parse(&s).ok_or(libsql::Error::InvalidColumnType)
            }
            _ => Err(libsql::Error::InvalidColumnType),
        }
    }
}

impl From<ConversationPriority> for libsql::Value {
    fn from(val: ConversationPriority) -> Self {
        libsql::Value::Text(val.as_str().to_string())
    }
}

/// A customer-business interaction thread
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: WrappedUuidV4,
    pub business_id: String,
    pub customer_phone: String,
    pub customer_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub source: ConversationSource,
    pub status: ConversationStatus,
    pub priority: ConversationPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<WrappedChronoDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<WrappedChronoDateTime>,
    pub created_at: WrappedChronoDateTime,
    pub updated_at: WrappedChronoDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<WrappedChronoDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<WrappedChronoDateTime>,
}

// --- Requests / responses ---

/// Request to create a new conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ConversationSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ConversationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<ConversationPriority>,
}

/// Partial update of customer fields and priority. Status is owned by the
/// transition endpoints and rejected here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConversationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<ConversationPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ConversationStatus>,
}

/// Request to assign a conversation to a team member
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignConversationRequest {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Filterable list query for the inbox view
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, JsonSchema, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(style = Form, parameter_in = Query)]
pub struct ListConversationsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ConversationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<ConversationPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

/// Status breakdown returned alongside conversation listings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ConversationStats {
    pub total: i64,
    pub new: i64,
    pub open: i64,
    pub resolved: i64,
    pub archived: i64,
    pub unassigned: i64,
}

/// A conversation with its active assignment (and optionally messages)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_assignment: Option<Assignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ListConversationsResponse {
    pub conversations: Vec<Conversation>,
    pub stats: ConversationStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ConversationResponse {
    pub conversation: ConversationDetail,
}

// --- Logic Functions ---

/// Fetch a conversation and enforce tenant ownership. Cross-tenant access is
/// an authorization error, not a missing row.
pub async fn fetch_owned<R: ConversationRepositoryLike>(
    repository: &R,
    session: &Session,
    conversation_id: &WrappedUuidV4,
) -> Result<Conversation, CommonError> {
    let conversation = repository
        .get_conversation_by_id(conversation_id)
        .await?
        .ok_or_else(|| CommonError::not_found("Conversation", conversation_id))?;
    session.ensure_business(&conversation.business_id)?;
    Ok(conversation)
}

/// Create a conversation in `NEW`, optionally appending an initial customer
/// message.
pub async fn create_conversation<R: ConversationRepositoryLike + MessageRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    session: &Session,
    request: CreateConversationRequest,
) -> Result<ConversationDetail, CommonError> {
    let customer_phone = request
        .customer_phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| CommonError::invalid_request("customerPhone is required"))?
        .to_string();
    let source = request
        .source
        .ok_or_else(|| CommonError::invalid_request("source is required"))?;

    let status = request.status.unwrap_or(ConversationStatus::New);
    if status == ConversationStatus::Archived {
        return Err(CommonError::invalid_request(
            "a conversation cannot be created archived",
        ));
    }

    let now = WrappedChronoDateTime::now();
    let conversation = Conversation {
        id: WrappedUuidV4::new(),
        business_id: session.business_id.clone(),
        customer_phone,
        customer_name: request
            .customer_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "Unknown".to_string()),
        customer_id: request.customer_id,
        source,
        status,
        priority: request.priority.unwrap_or(ConversationPriority::Medium),
        assigned_to: None,
        assigned_at: None,
        last_message_at: None,
        created_at: now,
        updated_at: now,
        resolved_at: None,
        archived_at: None,
    };

    repository
        .create_conversation(&CreateConversation {
            conversation: conversation.clone(),
        })
        .await?;

    let _ = event_bus.publish(InboxEvent::conversation_created(conversation.clone()));

    let mut conversation = conversation;
    if let Some(initial) = request
        .initial_message
        .filter(|m| !m.trim().is_empty())
    {
        let (updated, message) =
            super::message::append_raw(repository, SenderInfo::customer(), &conversation, initial, None)
                .await?;
        let _ = event_bus.publish(InboxEvent::message_appended(updated.clone(), message));
        conversation = updated;
    }

    Ok(ConversationDetail {
        conversation,
        active_assignment: None,
        messages: None,
    })
}

/// List conversations for the caller's business, with stats for the same
/// archived-visibility.
pub async fn list_conversations<R: ConversationRepositoryLike>(
    repository: &R,
    session: &Session,
    query: ListConversationsQuery,
) -> Result<ListConversationsResponse, CommonError> {
    let page = PageRequest::new(
        query.limit.unwrap_or(shared::primitives::DEFAULT_PAGE_LIMIT),
        query.offset.unwrap_or(0),
    )
    .clamped();

    let filter = ConversationFilter {
        business_id: session.business_id.clone(),
        status: query.status,
        assigned_to: query.assigned_to,
        priority: query.priority,
        search: query.search,
        customer_phone: query.customer_phone,
        include_archived: query.include_archived,
        page,
    };

    let conversations = repository.list_conversations(&filter).await?;
    let stats = repository
        .conversation_stats(&session.business_id, query.include_archived)
        .await?;

    Ok(ListConversationsResponse {
        conversations,
        stats,
    })
}

/// Get one conversation with its active assignment attached, optionally with
/// its messages (ascending).
pub async fn get_conversation<
    R: ConversationRepositoryLike + AssignmentRepositoryLike + MessageRepositoryLike,
>(
    repository: &R,
    session: &Session,
    conversation_id: &WrappedUuidV4,
    include_messages: bool,
) -> Result<ConversationDetail, CommonError> {
    let conversation = fetch_owned(repository, session, conversation_id).await?;
    let active_assignment = repository.get_active_assignment(conversation_id).await?;

    let messages = if include_messages {
        Some(
            repository
                .get_messages_by_conversation(
                    conversation_id,
                    shared::primitives::SortDirection::Asc,
                    &PageRequest::default(),
                )
                .await?,
        )
    } else {
        None
    };

    Ok(ConversationDetail {
        conversation,
        active_assignment,
        messages,
    })
}

/// Apply a partial update to customer fields / priority.
pub async fn update_conversation<R: ConversationRepositoryLike + AssignmentRepositoryLike>(
    repository: &R,
    session: &Session,
    conversation_id: &WrappedUuidV4,
    request: UpdateConversationRequest,
) -> Result<ConversationDetail, CommonError> {
    if request.status.is_some() {
        return Err(CommonError::invalid_request(
            "status can only be changed through assign/resolve/reopen/archive",
        ));
    }

    let existing = fetch_owned(repository, session, conversation_id).await?;

    let params = UpdateConversation {
        id: conversation_id.clone(),
        customer_name: request.customer_name.unwrap_or(existing.customer_name),
        customer_phone: request.customer_phone.unwrap_or(existing.customer_phone),
        customer_id: request.customer_id.or(existing.customer_id),
        priority: request.priority.unwrap_or(existing.priority),
        updated_at: WrappedChronoDateTime::now(),
    };
    repository.update_conversation(&params).await?;

    let conversation = fetch_owned(repository, session, conversation_id).await?;
    let active_assignment = repository.get_active_assignment(conversation_id).await?;
    Ok(ConversationDetail {
        conversation,
        active_assignment,
        messages: None,
    })
}

/// Assign a conversation to a team member. Completes any prior active
/// assignment and opens the conversation; the complete-prior/insert-new
/// sequence runs in one transaction in the repository.
pub async fn assign_conversation<R: ConversationRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    session: &Session,
    conversation_id: &WrappedUuidV4,
    request: AssignConversationRequest,
) -> Result<ConversationDetail, CommonError> {
    if request.user_id.trim().is_empty() {
        return Err(CommonError::invalid_request("userId is required"));
    }

    // Tenant check up front; the repository revalidates status under the
    // transaction's write lock.
    fetch_owned(repository, session, conversation_id).await?;

    let (conversation, assignment) = repository
        .assign_conversation(&AssignConversation {
            conversation_id: conversation_id.clone(),
            assignment_id: WrappedUuidV4::new(),
            user_id: request.user_id,
            assigned_by: session.user_id.clone(),
            notes: request.notes,
            now: WrappedChronoDateTime::now(),
        })
        .await?;

    let _ = event_bus.publish(InboxEvent::conversation_assigned(
        conversation.clone(),
        assignment.clone(),
    ));

    Ok(ConversationDetail {
        conversation,
        active_assignment: Some(assignment),
        messages: None,
    })
}

/// Resolve a conversation, completing its active assignment if present.
pub async fn resolve_conversation<R: ConversationRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    session: &Session,
    conversation_id: &WrappedUuidV4,
) -> Result<ConversationDetail, CommonError> {
    fetch_owned(repository, session, conversation_id).await?;

    let conversation = repository
        .resolve_conversation(&ResolveConversation {
            conversation_id: conversation_id.clone(),
            resolved_by: session.user_id.clone(),
            now: WrappedChronoDateTime::now(),
        })
        .await?;

    let _ = event_bus.publish(InboxEvent::conversation_resolved(conversation.clone()));

    Ok(ConversationDetail {
        conversation,
        active_assignment: None,
        messages: None,
    })
}

/// Reopen a resolved conversation. If the conversation had an assignment it
/// is reactivated and the conversation opens; otherwise it returns to `NEW`.
pub async fn reopen_conversation<R: ConversationRepositoryLike + AssignmentRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    session: &Session,
    conversation_id: &WrappedUuidV4,
) -> Result<ConversationDetail, CommonError> {
    fetch_owned(repository, session, conversation_id).await?;

    let conversation = repository
        .reopen_conversation(&ReopenConversation {
            conversation_id: conversation_id.clone(),
            now: WrappedChronoDateTime::now(),
        })
        .await?;

    let _ = event_bus.publish(InboxEvent::conversation_reopened(conversation.clone()));

    let active_assignment = repository.get_active_assignment(conversation_id).await?;
    Ok(ConversationDetail {
        conversation,
        active_assignment,
        messages: None,
    })
}

/// Archive a conversation: soft lifecycle end, messages and assignments are
/// kept.
pub async fn archive_conversation<R: ConversationRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    session: &Session,
    conversation_id: &WrappedUuidV4,
) -> Result<ConversationDetail, CommonError> {
    fetch_owned(repository, session, conversation_id).await?;

    let conversation = repository
        .archive_conversation(&ArchiveConversation {
            conversation_id: conversation_id.clone(),
            archived_by: session.user_id.clone(),
            now: WrappedChronoDateTime::now(),
        })
        .await?;

    let _ = event_bus.publish(InboxEvent::conversation_archived(conversation.clone()));

    Ok(ConversationDetail {
        conversation,
        active_assignment: None,
        messages: None,
    })
}
