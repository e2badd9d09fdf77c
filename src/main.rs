use std::sync::Arc;

use devops_mcp_bridge::{
    build_app, config::Config, devops_client::AzureDevOpsClient, logging,
    mcp::session::SessionStore, AppState,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    logging::init_logging();

    let config = Config::from_env()?;
    if !config.has_credentials() {
        warn!("AZURE_DEVOPS_ORG_URL or AZURE_DEVOPS_PAT not set; tool calls will fail");
    }

    let client = Arc::new(AzureDevOpsClient::new(
        config.org_url.clone(),
        config.access_token.clone(),
    )?);
    let sessions = SessionStore::new(config.heartbeat_interval);
    let state = AppState::new(client, sessions.clone(), config.session_policy);
    let policy = state.dispatcher.policy();
    let app = build_app(state);

    let bind_socket = config.bind_socket()?;
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        heartbeat_secs = config.heartbeat_interval.as_secs(),
        policy = ?policy,
        "server starting"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(sessions))
        .await?;

    info!("server stopped");
    Ok(())
}

/// Open SSE streams would otherwise keep graceful shutdown waiting forever.
async fn shutdown_signal(sessions: SessionStore) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    info!(active_sessions = sessions.len(), "shutdown requested");
    sessions.close_all();
}
