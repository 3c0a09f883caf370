//! Logic layer for the sms crate
//! Gateway client, rate limiting, dispatch, auto-response, and webhook
//! ingestion flows

pub mod client;
pub mod dispatcher;
pub mod ingest;
pub mod limiter;
pub mod responder;

pub use client::{GatewayError, SmsGatewayLike, TwilioClient};
pub use dispatcher::{
    DeliveryTrackerLike, LogDeliveryTracker, SendOptions, SmsDispatcher, SmsSendError,
};
pub use limiter::{DEFAULT_SEND_COOLDOWN, InMemoryRateLimiter, RateLimiterLike};
