//! Conversation HTTP endpoints

use axum::extract::{Json, Path, Query, State};
use std::sync::Arc;
use tracing::trace;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::SERVICE_ROUTE_KEY;
use crate::{
    logic::conversation::{
        self, AssignConversationRequest, ConversationResponse, CreateConversationRequest,
        ListConversationsQuery, ListConversationsResponse, UpdateConversationRequest,
    },
    service::InboxService,
};
use serde::Deserialize;
use shared::{
    adapters::openapi::{API_VERSION_TAG, CreatedResponse, JsonResponse},
    error::CommonError,
    identity::Session,
    primitives::WrappedUuidV4,
};

/// Create the conversation router
pub fn create_router() -> OpenApiRouter<Arc<InboxService>> {
    OpenApiRouter::new()
        .routes(routes!(route_list_conversations))
        .routes(routes!(route_create_conversation))
        .routes(routes!(route_get_conversation))
        .routes(routes!(route_update_conversation))
        .routes(routes!(route_assign_conversation))
        .routes(routes!(route_resolve_conversation))
        .routes(routes!(route_reopen_conversation))
        .routes(routes!(route_archive_conversation))
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(style = Form, parameter_in = Query)]
pub struct GetConversationQuery {
    #[serde(default)]
    pub include_messages: bool,
}

#[utoipa::path(
    get,
    path = "/conversations",
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(ListConversationsQuery),
    responses(
        (status = 200, description = "List conversations with stats", body = ListConversationsResponse),
        (status = 401, description = "Unauthorized", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "List conversations",
    description = "List the business's conversations with filtering and status stats",
    operation_id = "list-conversations",
)]
async fn route_list_conversations(
    State(ctx): State<Arc<InboxService>>,
    session: Session,
    Query(query): Query<ListConversationsQuery>,
) -> JsonResponse<ListConversationsResponse, CommonError> {
    trace!(business_id = %session.business_id, "Listing conversations");
    let res = conversation::list_conversations(&ctx.repository, &session, query).await;
    trace!(success = res.is_ok(), "Listing conversations completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = "/conversations",
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    request_body = CreateConversationRequest,
    responses(
        (status = 201, description = "Conversation created", body = ConversationResponse),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 401, description = "Unauthorized", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Create conversation",
    description = "Create a conversation, optionally with an initial customer message",
    operation_id = "create-conversation",
)]
async fn route_create_conversation(
    State(ctx): State<Arc<InboxService>>,
    session: Session,
    Json(request): Json<CreateConversationRequest>,
) -> CreatedResponse<ConversationResponse, CommonError> {
    trace!(business_id = %session.business_id, "Creating conversation");
    let res =
        conversation::create_conversation(&ctx.repository, &ctx.event_bus, &session, request)
            .await
            .map(|conversation| ConversationResponse { conversation });
    trace!(success = res.is_ok(), "Creating conversation completed");
    CreatedResponse::from(res)
}

#[utoipa::path(
    get,
    path = "/conversations/{conversation_id}",
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
        GetConversationQuery,
    ),
    responses(
        (status = 200, description = "Get conversation", body = ConversationResponse),
        (status = 401, description = "Unauthorized", body = CommonError),
        (status = 403, description = "Forbidden", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Get conversation",
    description = "Fetch one conversation with its active assignment, optionally with messages",
    operation_id = "get-conversation",
)]
async fn route_get_conversation(
    State(ctx): State<Arc<InboxService>>,
    session: Session,
    Path(conversation_id): Path<WrappedUuidV4>,
    Query(query): Query<GetConversationQuery>,
) -> JsonResponse<ConversationResponse, CommonError> {
    trace!(conversation_id = %conversation_id, "Getting conversation");
    let res = conversation::get_conversation(
        &ctx.repository,
        &session,
        &conversation_id,
        query.include_messages,
    )
    .await
    .map(|conversation| ConversationResponse { conversation });
    trace!(success = res.is_ok(), "Getting conversation completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    put,
    path = "/conversations/{conversation_id}",
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
    ),
    request_body = UpdateConversationRequest,
    responses(
        (status = 200, description = "Conversation updated", body = ConversationResponse),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 401, description = "Unauthorized", body = CommonError),
        (status = 403, description = "Forbidden", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Update conversation",
    description = "Partially update customer fields and priority",
    operation_id = "update-conversation",
)]
async fn route_update_conversation(
    State(ctx): State<Arc<InboxService>>,
    session: Session,
    Path(conversation_id): Path<WrappedUuidV4>,
    Json(request): Json<UpdateConversationRequest>,
) -> JsonResponse<ConversationResponse, CommonError> {
    trace!(conversation_id = %conversation_id, "Updating conversation");
    let res =
        conversation::update_conversation(&ctx.repository, &session, &conversation_id, request)
            .await
            .map(|conversation| ConversationResponse { conversation });
    trace!(success = res.is_ok(), "Updating conversation completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = "/conversations/{conversation_id}/assign",
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
    ),
    request_body = AssignConversationRequest,
    responses(
        (status = 200, description = "Conversation assigned", body = ConversationResponse),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 401, description = "Unauthorized", body = CommonError),
        (status = 403, description = "Forbidden", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 409, description = "Invalid transition", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Assign conversation",
    description = "Assign the conversation to a team member, completing any prior assignment",
    operation_id = "assign-conversation",
)]
async fn route_assign_conversation(
    State(ctx): State<Arc<InboxService>>,
    session: Session,
    Path(conversation_id): Path<WrappedUuidV4>,
    Json(request): Json<AssignConversationRequest>,
) -> JsonResponse<ConversationResponse, CommonError> {
    trace!(conversation_id = %conversation_id, user_id = %request.user_id, "Assigning conversation");
    let res = conversation::assign_conversation(
        &ctx.repository,
        &ctx.event_bus,
        &session,
        &conversation_id,
        request,
    )
    .await
    .map(|conversation| ConversationResponse { conversation });
    trace!(success = res.is_ok(), "Assigning conversation completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = "/conversations/{conversation_id}/resolve",
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
    ),
    responses(
        (status = 200, description = "Conversation resolved", body = ConversationResponse),
        (status = 401, description = "Unauthorized", body = CommonError),
        (status = 403, description = "Forbidden", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 409, description = "Invalid transition", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Resolve conversation",
    description = "Resolve the conversation and complete its active assignment",
    operation_id = "resolve-conversation",
)]
async fn route_resolve_conversation(
    State(ctx): State<Arc<InboxService>>,
    session: Session,
    Path(conversation_id): Path<WrappedUuidV4>,
) -> JsonResponse<ConversationResponse, CommonError> {
    trace!(conversation_id = %conversation_id, "Resolving conversation");
    let res = conversation::resolve_conversation(
        &ctx.repository,
        &ctx.event_bus,
        &session,
        &conversation_id,
    )
    .await
    .map(|conversation| ConversationResponse { conversation });
    trace!(success = res.is_ok(), "Resolving conversation completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = "/conversations/{conversation_id}/reopen",
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
    ),
    responses(
        (status = 200, description = "Conversation reopened", body = ConversationResponse),
        (status = 401, description = "Unauthorized", body = CommonError),
        (status = 403, description = "Forbidden", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 409, description = "Invalid transition", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Reopen conversation",
    description = "Reopen a resolved conversation",
    operation_id = "reopen-conversation",
)]
async fn route_reopen_conversation(
    State(ctx): State<Arc<InboxService>>,
    session: Session,
    Path(conversation_id): Path<WrappedUuidV4>,
) -> JsonResponse<ConversationResponse, CommonError> {
    trace!(conversation_id = %conversation_id, "Reopening conversation");
    let res = conversation::reopen_conversation(
        &ctx.repository,
        &ctx.event_bus,
        &session,
        &conversation_id,
    )
    .await
    .map(|conversation| ConversationResponse { conversation });
    trace!(success = res.is_ok(), "Reopening conversation completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = "/conversations/{conversation_id}/archive",
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
    ),
    responses(
        (status = 200, description = "Conversation archived", body = ConversationResponse),
        (status = 401, description = "Unauthorized", body = CommonError),
        (status = 403, description = "Forbidden", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 409, description = "Invalid transition", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Archive conversation",
    description = "Archive the conversation; messages and assignments are kept",
    operation_id = "archive-conversation",
)]
async fn route_archive_conversation(
    State(ctx): State<Arc<InboxService>>,
    session: Session,
    Path(conversation_id): Path<WrappedUuidV4>,
) -> JsonResponse<ConversationResponse, CommonError> {
    trace!(conversation_id = %conversation_id, "Archiving conversation");
    let res = conversation::archive_conversation(
        &ctx.repository,
        &ctx.event_bus,
        &session,
        &conversation_id,
    )
    .await
    .map(|conversation| ConversationResponse { conversation });
    trace!(success = res.is_ok(), "Archiving conversation completed");
    JsonResponse::from(res)
}
