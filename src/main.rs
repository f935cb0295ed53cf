use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use restyle::backend::GeminiBackend;
use restyle::routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // A missing GEMINI_API_KEY is reported per call, not here; the
    // server must come up either way.
    let backend = Arc::new(GeminiBackend::from_env());
    let state = Arc::new(AppState::new(backend));

    let port: u16 = match std::env::var("PORT") {
        Ok(value) => value.parse().context("PORT is not a valid port number")?,
        Err(_) => 3000,
    };
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;

    tracing::info!("listening on http://localhost:{port}");
    axum::serve(listener, router(state))
        .await
        .context("server error")?;
    Ok(())
}
