use std::any::Any;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::{RelayError, EMPTY_MESSAGES};
use crate::models::{ChatResponse, HealthResponse};
use crate::provider::ChatProvider;
use crate::relay;

pub struct RouterState {
  pub started_at: Instant,
  pub config: Arc<RelayConfig>,
  pub provider: Arc<dyn ChatProvider>,
}

pub fn build_router(state: RouterState) -> anyhow::Result<Router> {
  let cors = CorsLayer::new()
    .allow_origin(AllowOrigin::list(state.config.origin_headers()?))
    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
    .allow_headers([CONTENT_TYPE]);

  Ok(
    Router::new()
      .route("/health", get(health))
      .route("/chat", post(chat))
      .route("/api/chat", post(chat))
      .layer(CatchPanicLayer::custom(panic_response))
      .layer(cors)
      .layer(TraceLayer::new_for_http())
      .with_state(Arc::new(state)),
  )
}

pub async fn run_router(listener: TcpListener, state: RouterState) -> anyhow::Result<()> {
  let app = build_router(state)?;

  listener.set_nonblocking(true)?;
  let listener = tokio::net::TcpListener::from_std(listener)?;
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(err) = tokio::signal::ctrl_c().await {
    error!("failed to listen for shutdown signal: {err}");
    std::future::pending::<()>().await;
  }
  info!("shutting down");
}

async fn health(State(state): State<Arc<RouterState>>) -> Json<HealthResponse> {
  Json(HealthResponse {
    status: "ok".to_string(),
    version: env!("CARGO_PKG_VERSION").to_string(),
    uptime_ms: state.started_at.elapsed().as_millis() as u64,
    model: state.provider.model().to_string(),
  })
}

async fn chat(State(state): State<Arc<RouterState>>, payload: Result<Json<Value>, JsonRejection>) -> Response {
  let span = tracing::info_span!("chat", request_id = %Uuid::new_v4());
  async move {
    let started = Instant::now();
    let result = match payload {
      Ok(Json(body)) => {
        info!("Processing request: {body}");
        relay::relay_turn(state.provider.as_ref(), &body).await
      }
      Err(rejection) => {
        warn!("unreadable request body: {}", rejection.body_text());
        Err(RelayError::validation(EMPTY_MESSAGES))
      }
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
      Ok(content) => {
        info!(elapsed_ms, "request completed");
        (StatusCode::OK, Json(ChatResponse { content })).into_response()
      }
      Err(err) => {
        match &err {
          RelayError::Validation(msg) => warn!(elapsed_ms, "rejected request: {msg}"),
          RelayError::Upstream(msg) => error!(elapsed_ms, "provider failure: {msg}"),
          RelayError::Internal(msg) => error!(elapsed_ms, "internal error: {msg}"),
        }
        err.into_response()
      }
    }
  }
  .instrument(span)
  .await
}

fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
  let err = RelayError::internal("handler panicked");
  error!("{err}");
  err.into_response()
}
