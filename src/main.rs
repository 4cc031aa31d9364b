mod config;
mod directory;
mod http;
mod state;
mod storage;
mod webp;

use crate::config::Config;
use crate::directory::RemoteDirectory;
use crate::state::AppState;
use crate::storage::{FsObjectStore, ObjectStore};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::header;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::info;

fn build_app(state: Arc<AppState>) -> Router {
    let max_body_bytes = state.config.max_body_bytes;
    http::router(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().include_headers(false)),
        )
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION]))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(Config::from_env());
    info!(
        backend_configured = config.backend_host.is_some()
            && config.backend_module.is_some()
            && config.backend_token.is_some(),
        storage_configured = config.storage_dir.is_some(),
        cdn_configured = config.cdn_base_url.is_some(),
        max_image_bytes = config.max_image_bytes,
        "startup config summary"
    );

    let http_client = http::outbound_client(config.fetch_timeout_seconds)?;
    let store = config
        .storage_dir
        .clone()
        .map(|dir| Arc::new(FsObjectStore::new(dir)) as Arc<dyn ObjectStore>);
    let directory = Arc::new(RemoteDirectory::new(config.clone(), http_client.clone()));
    let state = Arc::new(AppState::new(config, directory, store, http_client));
    let app = build_app(state.clone());

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(address = %addr, "pfp service listening");
    axum::serve(listener, app).await?;
    Ok(())
}
