//! Renshuu · Japanese Practice Backend
//!
//! - Axum HTTP + WebSocket API (answer grading streams over SSE and WS)
//! - Optional OpenAI integration (via environment variables)
//! - JSON-file practice history
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                 : u16 (default 3000)
//!   HISTORY_PATH         : history JSON file (default ./data/history.json, "" = memory only)
//!   HISTORY_LIMIT        : max stored attempts (default 200)
//!   DEFAULT_LEVEL        : level used when a request names none (default "n5")
//!   PRACTICE_CONFIG_PATH : path to TOML config (prompts + optional sentence bank)
//!   OPENAI_API_KEY       : enables OpenAI integration if present
//!   OPENAI_BASE_URL      : default "https://api.openai.com/v1"
//!   OPENAI_FAST_MODEL    : default "gpt-4o-mini"
//!   OPENAI_STRONG_MODEL  : default "gpt-4o"
//!   OPENAI_TTS_MODEL     : default "gpt-4o-mini-tts"
//!   OPENAI_TTS_VOICE     : default "alloy"
//!   LOG_LEVEL            : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT           : "pretty" (default) or "json"

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use renshuu_backend::config::Settings;
use renshuu_backend::{build_router, telemetry, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let settings = Settings::from_env();

  // Shared application state (sentence pools, exercises, history, OpenAI client).
  let state = Arc::new(AppState::new(&settings).await);

  let app = build_router(state.clone());

  let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
  let listener = TcpListener::bind(addr).await?;
  info!(target: "renshuu_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "renshuu_backend", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "renshuu_backend", error = %e, "Failed to listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  info!(target: "renshuu_backend", "Shutdown requested");
}
