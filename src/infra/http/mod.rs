//! Admin HTTP surface.

mod admin;
mod middleware;

pub use admin::build_admin_router;
pub use middleware::RequestContext;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use crate::{application::registry::ServiceRegistry, infra::error::InfraError};

/// Serve the admin router until `shutdown` resolves.
pub async fn serve_admin<F>(
    addr: SocketAddr,
    registry: ServiceRegistry,
    shutdown: F,
) -> Result<(), InfraError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(target = "quire::http", addr = %addr, "admin server listening");
    axum::serve(listener, build_admin_router(registry).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
