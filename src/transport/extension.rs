//! Browser-extension transport over a long-lived runtime port.
//!
//! Port callbacks are synchronous, so inbound data is queued and drained
//! by a dedicated pump task. `close()` stops the pump and waits for it,
//! so no subscriber runs after `disconnect()` returns.
//!
//! Listener registrations are kept in a [`ListenerArena`] and drained on
//! teardown, which happens exactly once per session whether the page
//! disconnects or the extension drops the port.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TransportError};
use crate::identifiers::ListenerId;
use crate::protocol::Message;

use super::arena::ListenerArena;
use super::base::BaseTransport;
use super::channel::{Channel, InboundSink};
use super::options::ExtensionOptions;

// ============================================================================
// Provider Types
// ============================================================================

/// Callback for data arriving on a port.
pub type PortMessageListener = Arc<dyn Fn(Value) + Send + Sync>;

/// Callback for port disconnection, with the runtime's last error if any.
pub type PortDisconnectListener = Arc<dyn Fn(Option<String>) + Send + Sync>;

/// Failures surfaced by the extension runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    /// No extension runtime is available on this page.
    #[error("Extension runtime unavailable")]
    RuntimeUnavailable,

    /// The runtime refused the connection.
    #[error("Could not establish connection: {0}")]
    ConnectFailed(String),

    /// The port is already disconnected.
    #[error("Port disconnected")]
    Disconnected,
}

/// One long-lived runtime port.
///
/// Implementations must allow listeners to be removed from inside a
/// listener callback.
pub trait RuntimePort: Send + Sync {
    /// Posts `data` to the extension.
    fn post_message(&self, data: &Value) -> StdResult<(), PortError>;

    /// Registers an `onMessage` listener.
    fn on_message(&self, listener: PortMessageListener) -> ListenerId;

    /// Registers an `onDisconnect` listener.
    fn on_disconnect(&self, listener: PortDisconnectListener) -> ListenerId;

    /// Removes a listener. Returns `false` if it was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Disconnects the port from this side.
    fn disconnect(&self);
}

/// Entry point into the extension runtime.
pub trait RuntimeProvider: Send + Sync + 'static {
    /// Opens a port to `extension_id`.
    fn connect(&self, extension_id: &str) -> StdResult<Arc<dyn RuntimePort>, PortError>;
}

// ============================================================================
// PortSession
// ============================================================================

/// Resources held between `open` and teardown.
struct PortSession {
    port: Arc<dyn RuntimePort>,
    listeners: ListenerArena<ListenerId>,
    shutdown: Option<oneshot::Sender<()>>,
    pump: Option<JoinHandle<()>>,
}

impl PortSession {
    /// Stops the pump, removes every listener, and optionally disconnects
    /// the port. Returns the pump handle for the caller to await.
    fn teardown(mut self, disconnect_port: bool) -> Option<JoinHandle<()>> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        for (_, registration) in self.listeners.drain() {
            if !self.port.remove_listener(registration) {
                warn!(listener = %registration, "Port listener was already removed");
            }
        }

        if disconnect_port {
            self.port.disconnect();
        }

        self.pump.take()
    }
}

type SharedSession = Arc<Mutex<Option<PortSession>>>;

// ============================================================================
// ExtensionChannel
// ============================================================================

/// [`Channel`] over a runtime port.
pub struct ExtensionChannel<R: RuntimeProvider> {
    runtime: Arc<R>,
    options: ExtensionOptions,
    session: SharedSession,
}

impl<R: RuntimeProvider> ExtensionChannel<R> {
    /// Creates a channel; the port is opened by [`Channel::open`].
    #[must_use]
    pub fn new(runtime: Arc<R>, options: ExtensionOptions) -> Self {
        Self {
            runtime,
            options,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the target extension id.
    #[inline]
    #[must_use]
    pub fn extension_id(&self) -> &str {
        self.options.extension_id()
    }

    /// Returns `true` while a port is open.
    #[must_use]
    pub fn has_port(&self) -> bool {
        self.session.lock().is_some()
    }

    fn disconnect_listener(&self, inbound: InboundSink) -> PortDisconnectListener {
        let session: Weak<Mutex<Option<PortSession>>> = Arc::downgrade(&self.session);
        let extension_id = self.options.extension_id().to_string();

        Arc::new(move |last_error: Option<String>| {
            let Some(session) = session.upgrade() else {
                return;
            };
            let Some(current) = session.lock().take() else {
                trace!(%extension_id, "Port disconnect after teardown");
                return;
            };
            // Dropping the handle detaches the pump; the shutdown signal stops it.
            drop(current.teardown(false));

            let mut err = TransportError::connection_failed(format!(
                "Port to extension {extension_id} disconnected"
            ))
            .with_cause(PortError::Disconnected);
            if let Some(reason) = last_error {
                err = err.with_details(json!({ "reason": reason }));
            }
            inbound.connection_lost(err);
        })
    }
}

async fn run_pump(
    mut queue: mpsc::UnboundedReceiver<Value>,
    mut shutdown: oneshot::Receiver<()>,
    inbound: InboundSink,
) {
    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,

            next = queue.recv() => match next {
                Some(data) => inbound.deliver_value(data),
                None => break,
            },
        }
    }
    trace!("Port pump stopped");
}

#[async_trait]
impl<R: RuntimeProvider> Channel for ExtensionChannel<R> {
    fn kind(&self) -> &'static str {
        "extension"
    }

    async fn open(&self, inbound: InboundSink) -> Result<()> {
        let stale = self.session.lock().take();
        if let Some(stale) = stale
            && let Some(pump) = stale.teardown(true)
        {
            pump.abort();
        }

        let extension_id = self.options.extension_id();
        let port = self.runtime.connect(extension_id).map_err(|e| {
            TransportError::connection_failed(format!(
                "Failed to connect to extension {extension_id}"
            ))
            .with_cause(e)
        })?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let mut listeners = ListenerArena::new();
        listeners.insert(port.on_message(Arc::new(move |data: Value| {
            let _ = queue_tx.send(data);
        })));
        listeners.insert(port.on_disconnect(self.disconnect_listener(inbound.clone())));

        let pump = tokio::spawn(run_pump(queue_rx, shutdown_rx, inbound));

        *self.session.lock() = Some(PortSession {
            port,
            listeners,
            shutdown: Some(shutdown_tx),
            pump: Some(pump),
        });

        info!(%extension_id, "Extension port open");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let session = self.session.lock().take();
        let Some(session) = session else {
            return Ok(());
        };

        if let Some(pump) = session.teardown(true)
            && let Err(e) = pump.await
        {
            warn!(error = %e, "Port pump ended abnormally");
        }
        debug!(extension_id = %self.options.extension_id(), "Extension port closed");
        Ok(())
    }

    async fn post(&self, message: &Message<Value>) -> Result<()> {
        let port = self
            .session
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.port))
            .ok_or_else(TransportError::not_connected)?;
        let data = serde_json::to_value(message)?;

        port.post_message(&data).map_err(|e| {
            TransportError::send_failed(format!("Port rejected message {}", message.id))
                .with_cause(e)
        })
    }
}

// ============================================================================
// ExtensionTransport
// ============================================================================

/// Transport speaking to an extension background process.
pub type ExtensionTransport<R> = BaseTransport<ExtensionChannel<R>>;

impl<R: RuntimeProvider> BaseTransport<ExtensionChannel<R>> {
    /// Creates an extension transport from a runtime and options.
    #[must_use]
    pub fn from_runtime(runtime: Arc<R>, options: ExtensionOptions) -> Self {
        let transport_options = options.transport();
        Self::new(ExtensionChannel::new(runtime, options), transport_options)
    }
}

// ============================================================================
// Tests
// ============================================================================
