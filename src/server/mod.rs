//! Admin HTTP API for catalog mutation and status queries.
//!
//! Read routes are open; mutating routes require the configured bearer
//! token. Every route answers both with and without a trailing slash.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Settings;
use crate::crawl::Crawler;
use crate::monitor::Monitor;
use crate::notifier::Notify;
use crate::repository::Db;

/// Shared state for the admin API.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub settings: Arc<Settings>,
    pub crawler: Crawler,
    pub monitor: Monitor,
}

impl AppState {
    pub fn new(
        db: Db,
        settings: Arc<Settings>,
        notifier: Arc<dyn Notify>,
        monitor: Monitor,
    ) -> anyhow::Result<Self> {
        let crawler = Crawler::new(db.clone(), settings.clone(), notifier, monitor.clone())?;
        Ok(Self {
            db,
            settings,
            crawler,
            monitor,
        })
    }
}

/// Start the admin API server.
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting admin API at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
