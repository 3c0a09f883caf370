//! Message thread HTTP endpoints

use axum::extract::{Json, Path, Query, State};
use std::sync::Arc;
use tracing::trace;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::SERVICE_ROUTE_KEY;
use crate::{
    logic::message::{
        self, AppendMessageRequest, ListMessagesQuery, ListMessagesResponse, MessageResponse,
        SenderInfo,
    },
    service::InboxService,
};
use shared::{
    adapters::openapi::{API_VERSION_TAG, CreatedResponse, JsonResponse},
    error::CommonError,
    identity::Session,
    primitives::WrappedUuidV4,
};

/// Create the message router
pub fn create_router() -> OpenApiRouter<Arc<InboxService>> {
    OpenApiRouter::new()
        .routes(routes!(route_list_messages))
        .routes(routes!(route_append_message))
}

#[utoipa::path(
    get,
    path = "/conversations/{conversation_id}/messages",
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
        ListMessagesQuery,
    ),
    responses(
        (status = 200, description = "List messages", body = ListMessagesResponse),
        (status = 401, description = "Unauthorized", body = CommonError),
        (status = 403, description = "Forbidden", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "List messages",
    description = "List the conversation's messages; marks them read for the caller",
    operation_id = "list-messages",
)]
async fn route_list_messages(
    State(ctx): State<Arc<InboxService>>,
    session: Session,
    Path(conversation_id): Path<WrappedUuidV4>,
    Query(query): Query<ListMessagesQuery>,
) -> JsonResponse<ListMessagesResponse, CommonError> {
    trace!(conversation_id = %conversation_id, "Listing messages");
    let res = message::list_messages(&ctx.repository, &session, &conversation_id, query)
        .await
        .map(|messages| ListMessagesResponse { messages });
    trace!(success = res.is_ok(), "Listing messages completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = "/conversations/{conversation_id}/messages",
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
    ),
    request_body = AppendMessageRequest,
    responses(
        (status = 201, description = "Message appended", body = MessageResponse),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 401, description = "Unauthorized", body = CommonError),
        (status = 403, description = "Forbidden", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Append message",
    description = "Append a team message to the thread; mention metadata fans out notifications",
    operation_id = "append-message",
)]
async fn route_append_message(
    State(ctx): State<Arc<InboxService>>,
    session: Session,
    Path(conversation_id): Path<WrappedUuidV4>,
    Json(request): Json<AppendMessageRequest>,
) -> CreatedResponse<MessageResponse, CommonError> {
    trace!(conversation_id = %conversation_id, "Appending message");
    let sender = SenderInfo::team(session.user_id.clone());
    let res = message::append_message(
        &ctx.repository,
        &ctx.event_bus,
        &session,
        &conversation_id,
        sender,
        request,
    )
    .await
    .map(|message| MessageResponse { message });
    trace!(success = res.is_ok(), "Appending message completed");
    CreatedResponse::from(res)
}
