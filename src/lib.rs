#![allow(clippy::missing_errors_doc)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::time::Duration;

use axum::Router;
use axum::routing::{any, get, post};
use clap::Parser;
use state::SharedState;
use tokio::net::TcpListener;
use tracing::instrument;

pub mod bus;
pub mod endpoints;
pub mod hub;
pub mod ingress;
pub mod layers;
pub mod repository;
pub mod state;

#[derive(Parser, Clone, Debug)]
#[must_use]
pub struct Settings {
    #[arg(default_value_t = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000))]
    pub socket_addr: SocketAddr,

    #[arg(long, default_value = "sqlite://notification_hub.db?mode=rwc")]
    pub database_url: String,

    #[arg(long, default_value_t = 5)]
    pub database_max_connections: u32,

    #[arg(long, default_value = "256")]
    pub bus_channel_capacity: NonZeroUsize,

    /// Bus topic whose messages are broadcast to every connected client.
    #[arg(long, default_value = "notifications")]
    pub bus_topic: String,

    /// Outbound frames queued per connection before sends start waiting.
    #[arg(long, default_value = "64")]
    pub connection_buffer: NonZeroUsize,

    #[arg(long, default_value_t = 2000)]
    pub send_timeout_ms: u64,
}

impl Settings {
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

pub fn router(state: SharedState) -> Router {
    use endpoints::{hub, notifications, products};

    Router::new()
        .route("/notifications/broadcast", post(notifications::broadcast))
        .route("/hubs/notifications", any(hub::websocket))
        .route("/products", get(products::list).post(products::create))
        .route("/products/top/{count}", get(products::top))
        .route(
            "/products/{id}",
            get(products::get).put(products::update).delete(products::delete),
        )
        .layer(layers::trace_layer())
        .with_state(state)
}

#[instrument]
pub async fn run(settings: Settings) -> Result<(), color_eyre::eyre::Report> {
    let pool =
        repository::connect(&settings.database_url, settings.database_max_connections).await?;
    let bus = bus::InProcessBus::new(settings.bus_channel_capacity);
    let shared_state = SharedState::new(repository::Repository::new(pool.clone()), bus, &settings);

    let consumer = bus::spawn_consumer(
        &shared_state.bus,
        settings.bus_topic.clone(),
        shared_state.ingress.clone(),
    );
    let registry = shared_state.registry.clone();

    let listener = TcpListener::bind(settings.socket_addr).await?;
    tracing::info!(listen_addr = ?listener.local_addr()?, "Bound to local socket");

    let service = router(shared_state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, service)
        .with_graceful_shutdown(async move {
            self::shutdown_signal().await;
            registry.shutdown().await;
        })
        .await?;

    consumer.abort();
    pool.close().await;
    tracing::info!("Server stopped");

    Ok(())
}

#[instrument]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c()
        .await
        .inspect(|()| tracing::info!("Caught CTRL+C signal, shutting down"))
        .inspect_err(|error| tracing::error!(?error, "Failed to await CTRL+C signal"));
}
