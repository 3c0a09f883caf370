//! API server binary: wires the inbox engine and the SMS layer behind one
//! HTTP listener.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Json;
use axum::routing::get;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::info;

use inbox::logic::event::EventBus;
use inbox::repository::Repository;
use inbox::service::{InboxService, InboxServiceParams};
use shared::libsql::{SqlMigrationLoader, connect_local, run_migrations};
use sms::logic::dispatcher::{LogDeliveryTracker, SmsDispatcher};
use sms::logic::ingest::AutoResponseConfig;
use sms::logic::limiter::InMemoryRateLimiter;
use sms::logic::client::TwilioClient;
use sms::service::{SmsService, SmsServiceParams};
use sms::types::SubscriptionTier;

#[derive(Debug, Parser)]
#[command(name = "textback-api-server", about = "Shared team inbox API server")]
struct Args {
    #[arg(long, env = "TEXTBACK_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "TEXTBACK_PORT", default_value_t = 8080)]
    port: u16,

    #[arg(long, env = "TEXTBACK_DB_PATH", default_value = "data/textback.db")]
    db_path: PathBuf,

    #[arg(long, env = "TWILIO_ACCOUNT_SID", default_value = "")]
    twilio_account_sid: String,

    #[arg(long, env = "TWILIO_AUTH_TOKEN", default_value = "")]
    twilio_auth_token: String,

    /// Display name used in auto-response texts
    #[arg(long, env = "TEXTBACK_BUSINESS_NAME", default_value = "our team")]
    business_name: String,

    /// Subscription tier: basic, pro, or enterprise
    #[arg(long, env = "TEXTBACK_TIER", default_value = "basic")]
    tier: String,
}

fn parse_tier(s: &str) -> Result<SubscriptionTier, anyhow::Error> {
    match s {
        "basic" => Ok(SubscriptionTier::Basic),
        "pro" => Ok(SubscriptionTier::Pro),
        "enterprise" => Ok(SubscriptionTier::Enterprise),
        other => anyhow::bail!("unknown tier: {other} (expected basic|pro|enterprise)"),
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    shared::env::configure_env()?;
    shared::logging::configure_logging()?;

    let args = Args::parse();
    let tier = parse_tier(&args.tier)?;

    let (_db, conn) = connect_local(&args.db_path)
        .await
        .context("Failed to open database")?;
    run_migrations(&conn, &Repository::load_sql_migrations())
        .await
        .context("Failed to run migrations")?;
    info!(db_path = %args.db_path.display(), "Database ready");

    let repository = Repository::new(conn);
    let event_bus = EventBus::default();
    let inbox_service = Arc::new(InboxService::new(InboxServiceParams {
        repository,
        event_bus,
    }));

    let gateway = TwilioClient::new(args.twilio_account_sid, args.twilio_auth_token);
    let dispatcher = Arc::new(SmsDispatcher::new(
        Arc::new(gateway),
        Arc::new(InMemoryRateLimiter::default()),
        Arc::new(LogDeliveryTracker),
    ));

    let sms_service = Arc::new(SmsService::new(SmsServiceParams {
        inbox: inbox_service.clone(),
        dispatcher,
        auto_response: AutoResponseConfig {
            business_name: args.business_name,
            tier,
        },
    }));

    let (inbox_router, inbox_spec) = inbox::router::create_router().split_for_parts();
    let (sms_router, sms_spec) = sms::router::create_router().split_for_parts();

    let mut openapi = inbox_spec;
    openapi.merge(sms_spec);

    let app = axum::Router::new()
        .merge(inbox_router.with_state(inbox_service))
        .merge(sms_router.with_state(sms_service))
        .route(
            "/openapi.json",
            get(move || {
                let spec = openapi.clone();
                async move { Json(spec) }
            }),
        )
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}
