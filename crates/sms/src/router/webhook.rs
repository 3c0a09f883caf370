//! Provider webhook endpoints
//!
//! Inbound callbacks from the SMS/voice provider. The provider-number to
//! business mapping is resolved upstream; these routes receive the business
//! id in the path and the provider's form-encoded payload in the body.

use axum::extract::{Form, Path, State};
use serde::Deserialize;
use std::sync::Arc;
use tracing::trace;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::SERVICE_ROUTE_KEY;
use crate::logic::ingest::{self, InboundSms, IngestResult, MissedCall};
use crate::service::SmsService;
use shared::{
    adapters::openapi::{API_VERSION_TAG, JsonResponse},
    error::CommonError,
};

/// Create the webhook router
pub fn create_router() -> OpenApiRouter<Arc<SmsService>> {
    OpenApiRouter::new()
        .routes(routes!(route_inbound_sms))
        .routes(routes!(route_missed_call))
}

/// Inbound SMS callback, form-encoded with the provider's field names
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct InboundSmsForm {
    #[serde(rename = "MessageSid")]
    pub message_sid: String,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "Body")]
    pub body: String,
}

/// Missed-call status callback
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MissedCallForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "CallStatus", default = "default_call_status")]
    pub call_status: String,
}

fn default_call_status() -> String {
    "no-answer".to_string()
}

#[utoipa::path(
    post,
    path = "/webhooks/{business_id}/sms",
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("business_id" = String, Path, description = "Business (tenant) ID"),
    ),
    request_body(content = InboundSmsForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "SMS ingested", body = IngestResult),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Inbound SMS webhook",
    description = "Thread an inbound SMS into the customer's conversation",
    operation_id = "webhook-inbound-sms",
)]
async fn route_inbound_sms(
    State(ctx): State<Arc<SmsService>>,
    Path(business_id): Path<String>,
    Form(form): Form<InboundSmsForm>,
) -> JsonResponse<IngestResult, CommonError> {
    trace!(business_id = %business_id, from = %form.from, "Inbound SMS webhook");
    let res = ingest::ingest_inbound_sms(
        &ctx.inbox.repository,
        &ctx.inbox.event_bus,
        &business_id,
        InboundSms {
            message_sid: form.message_sid,
            from: form.from,
            to: form.to,
            body: form.body,
        },
    )
    .await;
    trace!(success = res.is_ok(), "Inbound SMS webhook completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = "/webhooks/{business_id}/missed-call",
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("business_id" = String, Path, description = "Business (tenant) ID"),
    ),
    request_body(content = MissedCallForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Missed call ingested", body = IngestResult),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Missed-call webhook",
    description = "Record a missed call and send the auto-response SMS",
    operation_id = "webhook-missed-call",
)]
async fn route_missed_call(
    State(ctx): State<Arc<SmsService>>,
    Path(business_id): Path<String>,
    Form(form): Form<MissedCallForm>,
) -> JsonResponse<IngestResult, CommonError> {
    trace!(business_id = %business_id, from = %form.from, "Missed-call webhook");
    let res = ingest::handle_missed_call(
        &ctx.inbox.repository,
        &ctx.inbox.event_bus,
        &ctx.dispatcher,
        &ctx.auto_response,
        &business_id,
        MissedCall {
            call_sid: form.call_sid,
            from: form.from,
            to: form.to,
            call_status: form.call_status,
        },
    )
    .await;
    trace!(success = res.is_ok(), "Missed-call webhook completed");
    JsonResponse::from(res)
}
