//! Service layer for the inbox crate
//! Holds the dependencies for conversation, message, assignment, and
//! notification operations, and owns the background notification dispatcher.

use crate::{
    logic::event::EventBus,
    logic::notification::NotificationDispatcher,
    repository::Repository,
};

/// Main service struct for inbox operations
#[derive(Clone)]
pub struct InboxService {
    pub repository: Repository,
    pub event_bus: EventBus,
}

/// Parameters for creating an InboxService
pub struct InboxServiceParams {
    pub repository: Repository,
    pub event_bus: EventBus,
}

impl InboxService {
    /// Create a new InboxService and start the notification dispatcher on
    /// the event bus. The dispatcher task ends when the bus is dropped.
    pub fn new(params: InboxServiceParams) -> Self {
        NotificationDispatcher::spawn(params.repository.clone(), params.event_bus.subscribe());

        Self {
            repository: params.repository,
            event_bus: params.event_bus,
        }
    }
}
