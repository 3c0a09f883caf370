//! Inbox event bus
//!
//! Inbox mutations publish events onto a multi-producer broadcast bus; the
//! notification dispatcher consumes them on a background task so the
//! triggering write never waits on notification persistence. Publishing is
//! fire-and-forget: a bus with no subscribers simply drops the event.

use serde::Serialize;
use shared::primitives::{WrappedChronoDateTime, WrappedUuidV4};
use tokio::sync::broadcast;

use super::assignment::Assignment;
use super::conversation::Conversation;
use super::message::Message;

/// Default capacity for the event channel
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

/// Types of inbox events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboxEventKind {
    /// A conversation was created
    ConversationCreated { conversation: Conversation },
    /// A conversation was assigned to a team member
    ConversationAssigned {
        conversation: Conversation,
        assignment: Assignment,
    },
    /// A conversation was resolved
    ConversationResolved { conversation: Conversation },
    /// A resolved conversation was reopened
    ConversationReopened { conversation: Conversation },
    /// A conversation was archived
    ConversationArchived { conversation: Conversation },
    /// A message was appended to a conversation's thread
    MessageAppended {
        conversation: Conversation,
        message: Message,
    },
}

/// An inbox event with metadata
#[derive(Debug, Clone, Serialize)]
pub struct InboxEvent {
    pub id: WrappedUuidV4,
    pub kind: InboxEventKind,
    pub created_at: WrappedChronoDateTime,
}

impl InboxEvent {
    pub fn new(kind: InboxEventKind) -> Self {
        Self {
            id: WrappedUuidV4::new(),
            kind,
            created_at: WrappedChronoDateTime::now(),
        }
    }

    pub fn conversation_created(conversation: Conversation) -> Self {
        Self::new(InboxEventKind::ConversationCreated { conversation })
    }

    pub fn conversation_assigned(conversation: Conversation, assignment: Assignment) -> Self {
        Self::new(InboxEventKind::ConversationAssigned {
            conversation,
            assignment,
        })
    }

    pub fn conversation_resolved(conversation: Conversation) -> Self {
        Self::new(InboxEventKind::ConversationResolved { conversation })
    }

    pub fn conversation_reopened(conversation: Conversation) -> Self {
        Self::new(InboxEventKind::ConversationReopened { conversation })
    }

    pub fn conversation_archived(conversation: Conversation) -> Self {
        Self::new(InboxEventKind::ConversationArchived { conversation })
    }

    pub fn message_appended(conversation: Conversation, message: Message) -> Self {
        Self::new(InboxEventKind::MessageAppended {
            conversation,
            message,
        })
    }
}

/// Channel types for event broadcasting
pub type EventTx = broadcast::Sender<InboxEvent>;
pub type EventRx = broadcast::Receiver<InboxEvent>;

/// Multi-producer, multi-consumer event bus for inbox events
#[derive(Clone)]
pub struct EventBus {
    tx: EventTx,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Get a sender handle for publishing events
    pub fn sender(&self) -> EventTx {
        self.tx.clone()
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> EventRx {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    #[allow(clippy::result_large_err)]
    pub fn publish(
        &self,
        event: InboxEvent,
    ) -> Result<usize, broadcast::error::SendError<InboxEvent>> {
        self.tx.send(event)
    }

    /// Get the number of active subscribers
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_QUEUE_CAPACITY)
    }
}
