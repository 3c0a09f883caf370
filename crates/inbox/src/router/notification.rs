//! Notification HTTP endpoints

use axum::extract::{Path, Query, State};
use std::sync::Arc;
use tracing::trace;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::SERVICE_ROUTE_KEY;
use crate::{
    logic::notification::{
        self, ListNotificationsQuery, ListNotificationsResponse, MarkNotificationReadResponse,
    },
    service::InboxService,
};
use shared::{
    adapters::openapi::{API_VERSION_TAG, JsonResponse},
    error::CommonError,
    identity::Session,
    primitives::WrappedUuidV4,
};

/// Create the notification router
pub fn create_router() -> OpenApiRouter<Arc<InboxService>> {
    OpenApiRouter::new()
        .routes(routes!(route_list_notifications))
        .routes(routes!(route_mark_notification_read))
}

#[utoipa::path(
    get,
    path = "/notifications",
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(ListNotificationsQuery),
    responses(
        (status = 200, description = "List notifications", body = ListNotificationsResponse),
        (status = 401, description = "Unauthorized", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "List notifications",
    description = "List the caller's notifications, newest first",
    operation_id = "list-notifications",
)]
async fn route_list_notifications(
    State(ctx): State<Arc<InboxService>>,
    session: Session,
    Query(query): Query<ListNotificationsQuery>,
) -> JsonResponse<ListNotificationsResponse, CommonError> {
    trace!(user_id = %session.user_id, "Listing notifications");
    let res = notification::list_notifications(&ctx.repository, &session, query).await;
    trace!(success = res.is_ok(), "Listing notifications completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = "/notifications/{notification_id}/read",
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("notification_id" = WrappedUuidV4, Path, description = "Notification ID"),
    ),
    responses(
        (status = 200, description = "Notification read-marked", body = MarkNotificationReadResponse),
        (status = 401, description = "Unauthorized", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Mark notification read",
    description = "Mark one of the caller's notifications as read",
    operation_id = "mark-notification-read",
)]
async fn route_mark_notification_read(
    State(ctx): State<Arc<InboxService>>,
    session: Session,
    Path(notification_id): Path<WrappedUuidV4>,
) -> JsonResponse<MarkNotificationReadResponse, CommonError> {
    trace!(notification_id = %notification_id, "Marking notification read");
    let res =
        notification::mark_notification_read(&ctx.repository, &session, &notification_id).await;
    trace!(success = res.is_ok(), "Marking notification read completed");
    JsonResponse::from(res)
}
