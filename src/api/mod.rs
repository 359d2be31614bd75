//! HTTP status surface for the advisor gateway

pub mod calls;
pub mod health;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::call::CallRegistry;
use crate::leads::LeadSink;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<CallRegistry>,
    pub leads: Arc<dyn LeadSink>,
}

/// Read-only HTTP server over the call registry and lead store
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(registry: Arc<CallRegistry>, leads: Arc<dyn LeadSink>, port: u16) -> Self {
        Self {
            state: Arc::new(ApiState { registry, leads }),
            port,
        }
    }

    /// Build the router
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .merge(health::router())
            .nest("/api", calls::router(Arc::clone(&self.state)))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server until `stop` flips to true
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be bound or the server fails
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = stop.wait_for(|stopping| *stopping).await;
            })
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self, stop: watch::Receiver<bool>) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(stop).await })
    }
}
