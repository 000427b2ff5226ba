mod config;
mod db;
mod error;
mod frame;
mod logging;
mod pagination;
mod routes;
mod services;
mod state;
mod transaction;

#[tokio::main]
async fn main() {
    logging::init();

    let config = config::Config::from_env().expect("invalid configuration");
    let port = config.port;

    let pool = db::init_pool(&config.database_url, config.db_max_connections, config.run_migrations)
        .await
        .expect("database init failed");
    let state = state::AppState::new(pool, config);
    state.dirs.ensure().await.expect("failed to create public directories");

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "cf-sns listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
