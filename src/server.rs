use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use branchpass_config::GatewayConfig;
use branchpass_gate::{spawn_sweeper, AuthError, BranchAuthService, SystemInterfaces};
use tokio::net::TcpListener;
use tracing::info;

use crate::middleware::ServingSocket;
use crate::routes::router;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BranchAuthService>,
    /// Stands in for the socket address when connect info is unavailable.
    pub listen_addr: SocketAddr,
    pub sweep_interval: Duration,
}

impl AppState {
    pub fn new(service: BranchAuthService, listen_addr: SocketAddr) -> Self {
        Self {
            service: Arc::new(service),
            listen_addr,
            sweep_interval: Duration::from_secs(60),
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Builds state from configuration, reading interfaces from the OS.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, AuthError> {
        let service = BranchAuthService::from_config(config, Arc::new(SystemInterfaces))?;
        let listen_addr = config
            .socket_addr()
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        Ok(Self::new(service, listen_addr)
            .with_sweep_interval(Duration::from_secs(config.nonce_sweep_interval.max(1))))
    }
}

/// Serves the router on `listener` until the server stops, sweeping the
/// nonce ledger in the background.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "branchpass listening");
    let sweeper = spawn_sweeper(state.service.ledger(), state.sweep_interval);

    let app = router(state).into_make_service_with_connect_info::<ServingSocket>();
    let result = axum::serve(listener, app).await;

    sweeper.abort();
    result
}
