mod config;
mod event;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::ServerConfig::from_env();
    let addr = config.bind_addr();
    let queue_capacity = config.client_queue_capacity;
    let state = state::AppState::new(config);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");

    tracing::info!(%addr, queue_capacity, "duochat listening");
    axum::serve(listener, app).await.expect("server failed");
}
