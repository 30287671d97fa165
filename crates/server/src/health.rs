use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use leadflow_db::DbPool;
use leadflow_whatsapp::{ConnectionState, Outbox, StatusHandle};

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: DbPool,
    pub transport_status: StatusHandle,
    pub outbox: Arc<Outbox>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WhatsAppHealth {
    pub state: &'static str,
    pub pending_auth_challenge: bool,
    pub outbox_depth: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub whatsapp: WhatsAppHealth,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: HealthState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(bind_address = %address, "health endpoint started");

    tokio::spawn(async move {
        if let Err(serve_error) = axum::serve(listener, router(state)).await {
            error!(error = %serve_error, "health endpoint terminated unexpectedly");
        }
    });

    Ok(())
}

/// Readiness follows the database alone. The WhatsApp link going down is an
/// expected runtime condition the outbox absorbs, so it is reported but
/// never flips the endpoint to 503.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let transport = state.transport_status.read().await.clone();
    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        whatsapp: WhatsAppHealth {
            state: connection_state_name(transport.state),
            pending_auth_challenge: transport.has_pending_auth_challenge,
            outbox_depth: state.outbox.depth().await,
        },
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(query_error) => HealthCheck {
            status: "degraded",
            detail: format!("database query failed: {query_error}"),
        },
    }
}

fn connection_state_name(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::AwaitingAuth => "awaiting_auth",
        ConnectionState::Ready => "ready",
        ConnectionState::Reconnecting => "reconnecting",
    }
}
