//! Router layer for the sms crate

pub mod webhook;

use std::sync::Arc;
use utoipa::openapi::OpenApi as OpenApiDoc;
use utoipa_axum::router::OpenApiRouter;

use crate::service::SmsService;

pub const SERVICE_ROUTE_KEY: &str = "sms";

/// Create the combined sms router
pub fn create_router() -> OpenApiRouter<Arc<SmsService>> {
    OpenApiRouter::new().merge(webhook::create_router())
}

/// Get the OpenAPI spec for the sms crate
pub fn get_openapi_spec() -> OpenApiDoc {
    let (_, spec) = webhook::create_router().split_for_parts();
    spec
}
