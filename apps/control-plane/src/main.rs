// [apps/control-plane/src/main.rs]
use std::net::SocketAddr;

use anyhow::{Context, Result};
use wopr_control_plane::config::Config;
use wopr_control_plane::state::AppState;
use wopr_control_plane::{routes, services};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_target(true).init();

    let config = Config::from_env()?;
    let bind_addr: SocketAddr = config.bind_addr.parse().context("BIND_ADDR must be a valid socket address")?;

    let state = AppState::build(config).await.context("building application state")?;
    let _background = services::spawn_all(state.clone());

    let app = routes::build(state);

    tracing::info!("control plane listening on {bind_addr}");
    let listener = tokio::net::TcpListener::bind(bind_addr).await.context("binding listener")?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("serving control plane")?;

    Ok(())
}
