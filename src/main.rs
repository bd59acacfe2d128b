use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_scheduler::{
    config::{LISTEN_ADDR, LISTEN_PORT},
    handlers::routes,
    models::AppState,
    services::executor::Outbound,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = Arc::new(RwLock::new(AppState::new()));
    let outbound = Outbound::new();
    let routes = routes(state, outbound);

    info!(
        "API scheduler running on http://{}:{}",
        Ipv4Addr::from(LISTEN_ADDR),
        LISTEN_PORT
    );
    warp::serve(routes).run((LISTEN_ADDR, LISTEN_PORT)).await;
}
