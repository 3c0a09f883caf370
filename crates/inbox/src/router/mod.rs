//! Router layer for the inbox crate
//! HTTP endpoints for conversations, messages, and notifications

pub mod conversation;
pub mod message;
pub mod notification;

use std::sync::Arc;
use utoipa::openapi::OpenApi as OpenApiDoc;
use utoipa_axum::router::OpenApiRouter;

use crate::service::InboxService;

pub const SERVICE_ROUTE_KEY: &str = "inbox";

/// Create the combined inbox router
pub fn create_router() -> OpenApiRouter<Arc<InboxService>> {
    let conversation_router = conversation::create_router();
    let message_router = message::create_router();
    let notification_router = notification::create_router();

    OpenApiRouter::new()
        .merge(conversation_router)
        .merge(message_router)
        .merge(notification_router)
}

/// Get the combined OpenAPI spec for the inbox crate
pub fn get_openapi_spec() -> OpenApiDoc {
    let (_, conversation_spec) = conversation::create_router().split_for_parts();
    let (_, message_spec) = message::create_router().split_for_parts();
    let (_, notification_spec) = notification::create_router().split_for_parts();

    let mut spec = conversation_spec;
    spec.merge(message_spec);
    spec.merge(notification_spec);
    spec
}
