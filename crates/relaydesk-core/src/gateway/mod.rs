//! Gateway: the HTTP bridge, the observer WebSocket and the watchdog, run
//! together over one [`Coordinator`].

pub mod http;
pub mod observers;
pub mod watchdog;

pub use http::{HttpSettings, routes};
pub use observers::serve_observers;
pub use watchdog::{SweepReport, WatchdogSettings, run_watchdog, sweep};

use crate::Coordinator;
use crate::config::Config;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Parse a `host:port` listen address, tolerating a `ws://`/`http://` prefix
/// and a trailing slash.
pub fn resolve_listen_addr(listen: &str) -> Result<SocketAddr> {
    let trimmed = listen.trim();
    let bare = ["ws://", "wss://", "http://", "https://"]
        .iter()
        .find_map(|scheme| trimmed.strip_prefix(scheme))
        .unwrap_or(trimmed)
        .trim_end_matches('/');
    bare.parse()
        .with_context(|| format!("Invalid listen address {}", listen))
}

/// Serve until `cancel` fires. Binding errors are returned before anything
/// starts accepting.
pub async fn run_gateway(
    config: Config,
    coordinator: Coordinator,
    cancel: CancellationToken,
) -> Result<()> {
    let http_addr = resolve_listen_addr(&config.gateway.http_listen)?;
    let ws_addr = resolve_listen_addr(&config.gateway.ws_listen)?;

    let settings = HttpSettings {
        ask_timeout: config.ask_user.http_timeout(),
    };
    let http_cancel = cancel.child_token();
    let (bound_http, http_server) = warp::serve(routes(coordinator.clone(), settings))
        .try_bind_with_graceful_shutdown(http_addr, async move {
            http_cancel.cancelled().await;
        })
        .with_context(|| format!("Failed to bind HTTP bridge to {}", http_addr))?;

    let listener = TcpListener::bind(ws_addr)
        .await
        .with_context(|| format!("Failed to bind observer socket to {}", ws_addr))?;

    info!(http = %bound_http, ws = %ws_addr, "gateway listening");

    let watchdog = tokio::spawn(run_watchdog(
        coordinator.clone(),
        WatchdogSettings::from_config(&config),
        cancel.child_token(),
    ));
    let http = tokio::spawn(http_server);
    let observers = serve_observers(listener, coordinator, cancel.child_token());

    let observer_result = observers.await;
    // Observers only stop early on an accept error; take the rest down too.
    cancel.cancel();
    http.await.context("HTTP bridge task panicked")?;
    watchdog.await.context("Watchdog task panicked")?;

    info!("gateway stopped");
    observer_result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_listen_addr() {
        let expected: SocketAddr = "127.0.0.1:7421".parse().unwrap();
        assert_eq!(resolve_listen_addr("127.0.0.1:7421").unwrap(), expected);
        assert_eq!(resolve_listen_addr(" ws://127.0.0.1:7421/ ").unwrap(), expected);
        assert_eq!(resolve_listen_addr("http://127.0.0.1:7421").unwrap(), expected);
        assert!(resolve_listen_addr("localhost").is_err());
    }

    #[tokio::test]
    async fn test_run_gateway_stops_on_cancel() {
        let mut config = Config::default();
        config.gateway.http_listen = "127.0.0.1:0".into();
        config.gateway.ws_listen = "127.0.0.1:0".into();
        let coordinator = Coordinator::in_memory().unwrap();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_gateway(config, coordinator, cancel.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
