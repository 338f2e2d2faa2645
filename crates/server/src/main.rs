mod error;
mod handlers;
mod router;
mod startup;
mod state;

use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    let state = startup::build_app_state().await?;
    startup::spawn_background_tasks(state.clone());

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = router::build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: std::sync::Arc<state::AppState>) {
    tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    info!("shutdown signal received");
    startup::shutdown(&state).await;
}
