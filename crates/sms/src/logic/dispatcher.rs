//! Outbound SMS dispatch
//!
//! `send` consults the rate limiter, calls the gateway, stamps the cooldown,
//! and records a delivery-tracking event. Rate limiting is a soft outcome
//! (`SendResult::skipped`); gateway failures come back as typed errors split
//! into fatal and transient so the calling flow can decide whether to retry,
//! fall back, or give up — this layer itself never retries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::logic::client::{GatewayError, SmsGatewayLike};
use crate::logic::limiter::RateLimiterLike;
use crate::types::{DeliveryRecord, GatewaySendRequest, SendResult};

/// Options for a single send
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    pub bypass_rate_limit: bool,
}

/// Typed dispatch error preserving the fatal/transient split of the
/// underlying gateway error.
#[derive(Debug, thiserror::Error)]
pub enum SmsSendError {
    /// The request can never succeed as formed; do not retry.
    #[error("fatal sms gateway error: {0}")]
    Fatal(#[source] GatewayError),
    /// The send may succeed on retry with backoff.
    #[error("transient sms gateway error: {0}")]
    Transient(#[source] GatewayError),
}

impl From<SmsSendError> for shared::error::CommonError {
    fn from(e: SmsSendError) -> Self {
        match e {
            SmsSendError::Fatal(source) => shared::error::CommonError::GatewayFatal {
                msg: source.to_string(),
                source: Some(source.into()),
            },
            SmsSendError::Transient(source) => shared::error::CommonError::GatewayTransient {
                msg: source.to_string(),
                source: Some(source.into()),
            },
        }
    }
}

/// Monitoring collaborator for delivery accounting. Recording is best-effort:
/// failures are logged by the dispatcher and never fail the send.
pub trait DeliveryTrackerLike: Send + Sync {
    fn record(&self, record: &DeliveryRecord) -> Result<(), anyhow::Error>;
}

/// Tracker that logs delivery events through the tracing pipeline.
pub struct LogDeliveryTracker;

impl DeliveryTrackerLike for LogDeliveryTracker {
    fn record(&self, record: &DeliveryRecord) -> Result<(), anyhow::Error> {
        tracing::info!(
            message_sid = ?record.message_sid,
            from = %record.from,
            to = %record.to,
            status = %record.status,
            body_length = record.body_length,
            "sms delivery event"
        );
        Ok(())
    }
}

/// Outbound SMS dispatcher with per-recipient cooldown enforcement
pub struct SmsDispatcher {
    gateway: Arc<dyn SmsGatewayLike>,
    limiter: Arc<dyn RateLimiterLike>,
    tracker: Arc<dyn DeliveryTrackerLike>,
}

impl SmsDispatcher {
    pub fn new(
        gateway: Arc<dyn SmsGatewayLike>,
        limiter: Arc<dyn RateLimiterLike>,
        tracker: Arc<dyn DeliveryTrackerLike>,
    ) -> Self {
        Self {
            gateway,
            limiter,
            tracker,
        }
    }

    /// Send one SMS. The cooldown slot is reserved atomically before the
    /// gateway call and rolled back if the gateway fails, so a failed
    /// attempt does not lock the recipient out.
    pub async fn send(
        &self,
        from: &str,
        to: &str,
        body: &str,
        options: SendOptions,
    ) -> Result<SendResult, SmsSendError> {
        let reservation = if options.bypass_rate_limit {
            self.limiter.reserve_bypassing(to)
        } else {
            match self.limiter.try_reserve(to) {
                Ok(reservation) => reservation,
                Err(remaining) => {
                    debug!(to, remaining_secs = remaining.as_secs(), "SMS send rate limited");
                    return Ok(SendResult::rate_limited(remaining));
                }
            }
        };

        let request = GatewaySendRequest {
            from: from.to_string(),
            to: to.to_string(),
            body: body.to_string(),
        };

        match self.gateway.send_message(&request).await {
            Ok(response) => {
                self.track(DeliveryRecord {
                    message_sid: Some(response.sid.clone()),
                    from: from.to_string(),
                    to: to.to_string(),
                    status: response.status,
                    body_length: body.len(),
                });
                Ok(SendResult::sent(response.sid))
            }
            Err(gateway_error) => {
                self.limiter.rollback(reservation);
                self.track(DeliveryRecord {
                    message_sid: None,
                    from: from.to_string(),
                    to: to.to_string(),
                    status: "failed".to_string(),
                    body_length: body.len(),
                });

                if gateway_error.is_fatal() {
                    Err(SmsSendError::Fatal(gateway_error))
                } else {
                    Err(SmsSendError::Transient(gateway_error))
                }
            }
        }
    }

    /// Cooldown remaining for a destination, for UI/diagnostic use.
    pub fn time_remaining(&self, to: &str) -> Option<Duration> {
        self.limiter.time_remaining(to)
    }

    /// Administrative override: drop the destination's cooldown entry.
    pub fn clear(&self, to: &str) {
        self.limiter.clear(to);
    }

    fn track(&self, record: DeliveryRecord) {
        if let Err(e) = self.tracker.record(&record) {
            warn!(error = %e, to = %record.to, "Failed to record sms delivery event");
        }
    }
}

#[cfg(test)]
mod tests {
    mod unit {
        use super::super::*;
        use crate::logic::limiter::InMemoryRateLimiter;
        use crate::types::GatewaySendResponse;
        use async_trait::async_trait;
        use std::sync::Mutex;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct MockGateway {
            calls: AtomicUsize,
            fail_with: Mutex<Option<fn() -> GatewayError>>,
        }

        impl MockGateway {
            fn ok() -> Self {
                Self {
                    calls: AtomicUsize::new(0),
                    fail_with: Mutex::new(None),
                }
            }

            fn failing(factory: fn() -> GatewayError) -> Self {
                Self {
                    calls: AtomicUsize::new(0),
                    fail_with: Mutex::new(Some(factory)),
                }
            }

            fn calls(&self) -> usize {
                self.calls.load(Ordering::SeqCst)
            }
        }

        #[async_trait]
        impl SmsGatewayLike for MockGateway {
            async fn send_message(
                &self,
                _request: &crate::types::GatewaySendRequest,
            ) -> Result<GatewaySendResponse, GatewayError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                match *self.fail_with.lock().unwrap() {
                    Some(factory) => Err(factory()),
                    None => Ok(GatewaySendResponse {
                        sid: "SM123".to_string(),
                        status: "queued".to_string(),
                    }),
                }
            }
        }

        fn dispatcher_with(
            gateway: Arc<MockGateway>,
            cooldown: Duration,
        ) -> SmsDispatcher {
            SmsDispatcher::new(
                gateway,
                Arc::new(InMemoryRateLimiter::new(cooldown)),
                Arc::new(LogDeliveryTracker),
            )
        }

        const FROM: &str = "+15550000";
        const TO: &str = "+15550100";

        #[tokio::test]
        async fn test_send_then_skip_within_cooldown() {
            let gateway = Arc::new(MockGateway::ok());
            let dispatcher =
                dispatcher_with(gateway.clone(), crate::logic::limiter::DEFAULT_SEND_COOLDOWN);

            let first = dispatcher
                .send(FROM, TO, "hello", SendOptions::default())
                .await
                .unwrap();
            assert!(first.was_sent());
            assert_eq!(first.provider_id.as_deref(), Some("SM123"));

            let second = dispatcher
                .send(FROM, TO, "hello again", SendOptions::default())
                .await
                .unwrap();
            assert_eq!(second.status, crate::types::SendStatus::Skipped);
            assert_eq!(second.reason, Some(crate::types::SkipReason::RateLimited));

            // The skipped send never reached the gateway.
            assert_eq!(gateway.calls(), 1);
        }

        #[tokio::test]
        async fn test_send_allowed_again_after_cooldown() {
            let gateway = Arc::new(MockGateway::ok());
            let dispatcher = dispatcher_with(gateway.clone(), Duration::from_millis(30));

            assert!(dispatcher
                .send(FROM, TO, "one", SendOptions::default())
                .await
                .unwrap()
                .was_sent());
            assert!(!dispatcher
                .send(FROM, TO, "two", SendOptions::default())
                .await
                .unwrap()
                .was_sent());

            tokio::time::sleep(Duration::from_millis(40)).await;

            assert!(dispatcher
                .send(FROM, TO, "three", SendOptions::default())
                .await
                .unwrap()
                .was_sent());
            assert_eq!(gateway.calls(), 2);
        }

        #[tokio::test]
        async fn test_bypass_skips_cooldown_check() {
            let gateway = Arc::new(MockGateway::ok());
            let dispatcher =
                dispatcher_with(gateway.clone(), crate::logic::limiter::DEFAULT_SEND_COOLDOWN);

            dispatcher
                .send(FROM, TO, "one", SendOptions::default())
                .await
                .unwrap();
            let bypassed = dispatcher
                .send(
                    FROM,
                    TO,
                    "urgent",
                    SendOptions {
                        bypass_rate_limit: true,
                    },
                )
                .await
                .unwrap();
            assert!(bypassed.was_sent());
            assert_eq!(gateway.calls(), 2);
        }

        #[tokio::test]
        async fn test_fatal_error_classified_and_cooldown_released() {
            let gateway = Arc::new(MockGateway::failing(|| GatewayError::Api {
                code: Some(21211),
                message: "Invalid 'To' number".to_string(),
                status: 400,
            }));
            let dispatcher =
                dispatcher_with(gateway.clone(), crate::logic::limiter::DEFAULT_SEND_COOLDOWN);

            let err = dispatcher
                .send(FROM, TO, "hello", SendOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, SmsSendError::Fatal(_)));

            // The failed attempt did not consume the cooldown.
            assert!(dispatcher.time_remaining(TO).is_none());
            dispatcher
                .send(FROM, TO, "retry", SendOptions::default())
                .await
                .unwrap_err();
            assert_eq!(gateway.calls(), 2);
        }

        #[tokio::test]
        async fn test_transient_error_classified() {
            let gateway = Arc::new(MockGateway::failing(|| GatewayError::Api {
                code: Some(30001),
                message: "Queue overflow".to_string(),
                status: 500,
            }));
            let dispatcher =
                dispatcher_with(gateway, crate::logic::limiter::DEFAULT_SEND_COOLDOWN);

            let err = dispatcher
                .send(FROM, TO, "hello", SendOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, SmsSendError::Transient(_)));
        }

        #[tokio::test]
        async fn test_time_remaining_and_clear() {
            let gateway = Arc::new(MockGateway::ok());
            let dispatcher =
                dispatcher_with(gateway, crate::logic::limiter::DEFAULT_SEND_COOLDOWN);

            dispatcher
                .send(FROM, TO, "hello", SendOptions::default())
                .await
                .unwrap();
            assert!(dispatcher.time_remaining(TO).is_some());

            dispatcher.clear(TO);
            assert!(dispatcher.time_remaining(TO).is_none());
            assert!(dispatcher
                .send(FROM, TO, "again", SendOptions::default())
                .await
                .unwrap()
                .was_sent());
        }
    }
}
