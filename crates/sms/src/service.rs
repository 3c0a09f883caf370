//! Service layer for the sms crate
//! Bundles the inbox engine, the dispatcher, and the auto-response settings
//! for the webhook routes

use std::sync::Arc;

use inbox::service::InboxService;

use crate::logic::dispatcher::SmsDispatcher;
use crate::logic::ingest::AutoResponseConfig;

/// Main service struct for SMS ingestion and dispatch
#[derive(Clone)]
pub struct SmsService {
    pub inbox: Arc<InboxService>,
    pub dispatcher: Arc<SmsDispatcher>,
    pub auto_response: AutoResponseConfig,
}

/// Parameters for creating an SmsService
pub struct SmsServiceParams {
    pub inbox: Arc<InboxService>,
    pub dispatcher: Arc<SmsDispatcher>,
    pub auto_response: AutoResponseConfig,
}

impl SmsService {
    pub fn new(params: SmsServiceParams) -> Self {
        Self {
            inbox: params.inbox,
            dispatcher: params.dispatcher,
            auto_response: params.auto_response,
        }
    }
}
