mod chat;
mod timetable;

use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db;
use crate::gemini::GeminiClient;

/// Room for multipart framing and the text fields around the file.
const UPLOAD_BODY_SLACK: usize = 64 * 1024;

pub struct ApiState {
    pub pool: PgPool,
    pub model: GeminiClient,
    pub config: Config,
}

pub fn router(state: Arc<ApiState>) -> Router {
    let upload_body_limit = state.config.max_upload_bytes + UPLOAD_BODY_SLACK;

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api/timetable", timetable::routes(upload_body_limit))
        .nest("/api/chat", chat::routes())
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: Arc<ApiState>) -> anyhow::Result<()> {
    let addr = state.config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
    database: &'static str,
    environment: String,
    timestamp: String,
}

async fn root(State(state): State<Arc<ApiState>>) -> Json<RootResponse> {
    let database = if db::ping(&state.pool).await {
        "connected"
    } else {
        "disconnected"
    };

    Json(RootResponse {
        message: "Timetable API is running!",
        database,
        environment: state.config.environment.clone(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
struct NotFoundResponse {
    error: &'static str,
    path: String,
}

async fn not_found(uri: Uri) -> (StatusCode, Json<NotFoundResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(NotFoundResponse {
            error: "Route not found",
            path: uri.path().to_string(),
        }),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use crate::config::GeminiConfig;

    pub(crate) fn state_with_pool(pool: PgPool, database_url: &str) -> Arc<ApiState> {
        let config = Config {
            database_url: database_url.to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            db_max_connections: 1,
            max_upload_bytes: 1024,
            gemini: GeminiConfig::default(),
        };
        let model = GeminiClient::new(config.gemini.clone()).unwrap();
        Arc::new(ApiState {
            pool,
            model,
            config,
        })
    }

    /// State whose pool never connects; only routes that answer before
    /// touching the database can be exercised with it.
    pub(crate) fn offline_state() -> Arc<ApiState> {
        let database_url = "postgres://offline@127.0.0.1:1/none";
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(database_url)
            .unwrap();
        state_with_pool(pool, database_url)
    }

    pub(crate) async fn send_to(
        state: Arc<ApiState>,
        request: Request<Body>,
    ) -> (StatusCode, serde_json::Value) {
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    pub(crate) async fn send(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        send_to(offline_state(), request).await
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = send(Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn unknown_route_returns_json_404() {
        let (status, body) = send(Request::get("/api/nope").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Route not found");
        assert_eq!(body["path"], "/api/nope");
    }
}
