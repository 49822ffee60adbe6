//! NATS connection factory.
//!
//! [`connect`] logs connection events through `tracing`;
//! [`connect_with_handlers`] hands them to caller callbacks instead:
//!
//! ```rust,ignore
//! let handlers = ConnectionHandlers::default()
//!     .on_disconnect(|| metrics::gauge!("nats_connected").set(0.0))
//!     .on_reconnect(|| metrics::gauge!("nats_connected").set(1.0));
//! let client = nats::connect_with_handlers(&NatsConfig::new(url, "orders"), handlers).await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_nats::{Client, ConnectOptions, Event};
use tracing::{info, warn};

use crate::error::KitResult;

const DEFAULT_RECONNECT_WAIT: Duration = Duration::from_secs(2);
const DEFAULT_MAX_RECONNECTS: usize = 60;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsConfig {
    /// Server URL, e.g. `nats://localhost:4222`
    pub url: String,
    /// Client name shown in server monitoring
    pub name: String,
    /// Delay between reconnect attempts
    pub reconnect_wait: Duration,
    /// Reconnect attempts before giving up; `None` retries forever
    pub max_reconnects: Option<usize>,
    /// Timeout for establishing a connection
    pub timeout: Duration,
    /// Interval between server pings
    pub ping_interval: Duration,
}

impl NatsConfig {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            reconnect_wait: DEFAULT_RECONNECT_WAIT,
            max_reconnects: Some(DEFAULT_MAX_RECONNECTS),
            timeout: DEFAULT_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }

    fn connect_options(&self) -> ConnectOptions {
        let reconnect_wait = self.reconnect_wait;

        ConnectOptions::new()
            .name(self.name.clone())
            .connection_timeout(self.timeout)
            .ping_interval(self.ping_interval)
            .max_reconnects(self.max_reconnects)
            .reconnect_delay_callback(move |_attempts| reconnect_wait)
    }
}

type Handler = Arc<dyn Fn() + Send + Sync>;

/// Callbacks for connection lifecycle events. Unset callbacks are skipped.
#[derive(Clone, Default)]
pub struct ConnectionHandlers {
    disconnect: Option<Handler>,
    reconnect: Option<Handler>,
    close: Option<Handler>,
}

impl ConnectionHandlers {
    /// Called when the connection to the server is lost.
    pub fn on_disconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.disconnect = Some(Arc::new(f));
        self
    }

    /// Called when a lost connection has been re-established.
    pub fn on_reconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.reconnect = Some(Arc::new(f));
        self
    }

    /// Called when the client is closed for good.
    pub fn on_close(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.close = Some(Arc::new(f));
        self
    }

    /// Route one event to its callback.
    ///
    /// `Connected` only counts as a reconnect after a `Disconnected`.
    fn dispatch(&self, event: &Event, disconnected: &AtomicBool) {
        let handler = match event {
            Event::Disconnected => {
                disconnected.store(true, Ordering::SeqCst);
                self.disconnect.as_ref()
            }
            Event::Connected if disconnected.swap(false, Ordering::SeqCst) => {
                self.reconnect.as_ref()
            }
            Event::Closed => self.close.as_ref(),
            _ => None,
        };

        if let Some(f) = handler {
            f();
        }
    }
}

/// Connect, logging lifecycle events.
///
/// # Errors
///
/// Returns `KitError::Nats` if the server cannot be reached.
pub async fn connect(cfg: &NatsConfig) -> KitResult<Client> {
    let name = cfg.name.clone();

    let client = cfg
        .connect_options()
        .event_callback(move |event| {
            let name = name.clone();
            async move {
                match event {
                    Event::Connected => info!(client = %name, "NATS connected"),
                    Event::Disconnected => warn!(client = %name, "NATS disconnected, reconnecting"),
                    Event::Closed => info!(client = %name, "NATS connection closed"),
                    other => warn!(client = %name, event = %other, "NATS event"),
                }
            }
        })
        .connect(cfg.url.as_str())
        .await?;

    info!(url = %cfg.url, client = %cfg.name, "Connected to NATS");
    Ok(client)
}

/// Connect, routing lifecycle events to `handlers`.
///
/// # Errors
///
/// Returns `KitError::Nats` if the server cannot be reached.
pub async fn connect_with_handlers(
    cfg: &NatsConfig,
    handlers: ConnectionHandlers,
) -> KitResult<Client> {
    let disconnected = Arc::new(AtomicBool::new(false));

    let client = cfg
        .connect_options()
        .event_callback(move |event| {
            handlers.dispatch(&event, &disconnected);
            async {}
        })
        .connect(cfg.url.as_str())
        .await?;

    Ok(client)
}

/// Like [`connect`] but panics on error. Meant for process startup.
pub async fn must_connect(cfg: &NatsConfig) -> Client {
    match connect(cfg).await {
        Ok(client) => client,
        Err(e) => panic!("{e}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::error::KitError;

    #[test]
    fn test_defaults() {
        let cfg = NatsConfig::new("nats://localhost:4222", "orders");

        assert_eq!(cfg.name, "orders");
        assert_eq!(cfg.reconnect_wait, Duration::from_secs(2));
        assert_eq!(cfg.max_reconnects, Some(60));
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert_eq!(cfg.ping_interval, Duration::from_secs(120));
    }

    fn counting_handlers() -> (ConnectionHandlers, [Arc<AtomicUsize>; 3]) {
        let counts = [
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        ];
        let [d, r, c] = counts.clone();
        let handlers = ConnectionHandlers::default()
            .on_disconnect(move || {
                d.fetch_add(1, Ordering::SeqCst);
            })
            .on_reconnect(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .on_close(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        (handlers, counts)
    }

    #[test]
    fn test_connected_is_reconnect_only_after_disconnect() {
        let (handlers, [disconnects, reconnects, closes]) = counting_handlers();
        let disconnected = AtomicBool::new(false);

        handlers.dispatch(&Event::Connected, &disconnected);
        assert_eq!(reconnects.load(Ordering::SeqCst), 0);

        handlers.dispatch(&Event::Disconnected, &disconnected);
        handlers.dispatch(&Event::Connected, &disconnected);
        handlers.dispatch(&Event::Closed, &disconnected);

        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unset_handlers_are_skipped() {
        let disconnected = AtomicBool::new(false);
        let handlers = ConnectionHandlers::default();

        // Must not panic
        handlers.dispatch(&Event::Disconnected, &disconnected);
        handlers.dispatch(&Event::Connected, &disconnected);
        handlers.dispatch(&Event::Closed, &disconnected);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_nats_error() {
        let mut cfg = NatsConfig::new("nats://127.0.0.1:1", "orders");
        cfg.timeout = Duration::from_millis(500);

        let err = connect(&cfg).await.unwrap_err();
        assert!(matches!(err, KitError::Nats(_)));
        assert!(err.to_string().starts_with("connecting to NATS: "));
    }
}
