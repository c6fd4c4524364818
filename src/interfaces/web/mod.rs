mod handlers;
mod router;

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::core::config::ReceiverConfig;
use crate::core::runtask::dispatcher::RunTaskDispatcher;

use router::build_router;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) hmac_key: Arc<str>,
    pub(crate) dispatcher: Arc<dyn RunTaskDispatcher>,
}

impl AppState {
    pub(crate) fn new(hmac_key: &str, dispatcher: Arc<dyn RunTaskDispatcher>) -> Self {
        Self {
            hmac_key: Arc::from(hmac_key),
            dispatcher,
        }
    }
}

/// HTTP listener for run task callbacks.
pub struct ReceiverServer {
    bind_addr: String,
    state: AppState,
}

impl ReceiverServer {
    pub fn new(config: &ReceiverConfig, dispatcher: Arc<dyn RunTaskDispatcher>) -> Self {
        Self {
            bind_addr: config.bind_addr(),
            state: AppState::new(&config.hmac_key, dispatcher),
        }
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(&self.bind_addr)
            .await
            .with_context(|| format!("cannot bind {}", self.bind_addr))?;
        let local = listener
            .local_addr()
            .context("listener has no local address")?;
        info!("Run task receiver listening on http://{local}");

        axum::serve(listener, build_router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
            .context("run task receiver crashed")?;

        info!("Run task receiver stopped");
        Ok(())
    }
}
