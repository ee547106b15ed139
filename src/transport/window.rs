//! `postMessage` transport for popups, tabs, and iframes.
//!
//! The browser is reached only through a [`WindowProvider`], so the
//! transport runs anywhere the provider can be implemented (wasm
//! bindings, a headless harness, or an in-memory double).
//!
//! # Connection Flow
//!
//! 1. Open the popup (or adopt an existing window/iframe)
//! 2. Register one message listener filtering on exact origin and source
//! 3. Post a liveness probe and wait for any message from the target
//! 4. Watch the target; report connection loss if it closes
//!
//! Inbound events whose `origin` differs from the configured target
//! origin are discarded before their data is inspected.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Result, TransportError};
use crate::identifiers::ListenerId;
use crate::protocol::{Message, validate_message_structure};

use super::base::BaseTransport;
use super::channel::{Channel, InboundSink};
use super::options::{PopupFeatures, WindowOptions, WindowTarget};

// ============================================================================
// Constants
// ============================================================================

/// How often to check for early closure while waiting for the probe.
const PROBE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Payload marker of the liveness probe.
const PROBE_MARKER: &str = "transport:probe";

// ============================================================================
// Provider Types
// ============================================================================

/// Opaque reference to a browser window or iframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(u64);

impl WindowHandle {
    /// Wraps a provider-assigned handle.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the provider-assigned value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// A `message` event as seen by the page.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    /// Origin of the sending document.
    pub origin: String,
    /// Sending window, if known. Events without one are never accepted.
    pub source: Option<WindowHandle>,
    /// Structured-clone data.
    pub data: Value,
}

/// Callback registered with [`WindowProvider::add_message_listener`].
pub type MessageListener = Arc<dyn Fn(MessageEvent) + Send + Sync>;

/// Failures surfaced by a [`WindowProvider`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// Access to the target window was denied by the same-origin policy.
    #[error("Cross-origin access denied: {0}")]
    CrossOrigin(String),

    /// The browser refused to open the popup.
    #[error("Popup blocked")]
    PopupBlocked,

    /// The target window is closed.
    #[error("Window closed")]
    Closed,

    /// Any other provider failure.
    #[error("Window error: {0}")]
    Other(String),
}

impl WindowError {
    /// Returns `true` for same-origin policy violations.
    #[inline]
    #[must_use]
    pub fn is_cross_origin(&self) -> bool {
        matches!(self, Self::CrossOrigin(_))
    }
}

/// Window capabilities the transport needs.
pub trait WindowProvider: Send + Sync + 'static {
    /// Opens a popup at `url`.
    fn open(&self, url: &Url, features: &PopupFeatures) -> StdResult<WindowHandle, WindowError>;

    /// Closes a window.
    fn close(&self, window: WindowHandle);

    /// Returns `true` once `window` is closed.
    fn is_closed(&self, window: WindowHandle) -> bool;

    /// Posts `data` to `window`, restricted to `target_origin`.
    fn post_message(
        &self,
        window: WindowHandle,
        data: &Value,
        target_origin: &str,
    ) -> StdResult<(), WindowError>;

    /// Registers a page-level `message` listener.
    fn add_message_listener(&self, listener: MessageListener) -> ListenerId;

    /// Removes a listener. Returns `false` if it was not registered.
    fn remove_message_listener(&self, id: ListenerId) -> bool;
}

// ============================================================================
// WindowSession
// ============================================================================

/// Resources held between `open` and `close`.
struct WindowSession {
    window: WindowHandle,
    /// `true` if the popup was opened by this channel.
    owned: bool,
    listener: ListenerId,
    watcher: Option<JoinHandle<()>>,
}

// ============================================================================
// WindowChannel
// ============================================================================

/// [`Channel`] posting [`Message`] objects to a window.
pub struct WindowChannel<P: WindowProvider> {
    provider: Arc<P>,
    options: WindowOptions,
    session: Mutex<Option<WindowSession>>,
}

impl<P: WindowProvider> WindowChannel<P> {
    /// Creates a channel; nothing is opened until [`Channel::open`].
    #[must_use]
    pub fn new(provider: Arc<P>, options: WindowOptions) -> Self {
        Self {
            provider,
            options,
            session: Mutex::new(None),
        }
    }

    /// Returns the configured target origin.
    #[inline]
    #[must_use]
    pub fn target_origin(&self) -> &str {
        self.options.target_origin()
    }

    /// Returns the target window while connected.
    #[must_use]
    pub fn window(&self) -> Option<WindowHandle> {
        self.session.lock().as_ref().map(|s| s.window)
    }

    fn resolve_window(&self) -> Result<(WindowHandle, bool)> {
        match self.options.target() {
            WindowTarget::Popup { url, features } => {
                let window = self.provider.open(url, features).map_err(|e| {
                    TransportError::connection_failed(format!("Failed to open popup at {url}"))
                        .with_cause(e)
                })?;
                debug!(window = window.as_u64(), %url, name = %features.name, "Popup opened");
                Ok((window, true))
            }
            WindowTarget::Existing(window) => Ok((*window, false)),
        }
    }

    fn register_listener(
        &self,
        window: WindowHandle,
        inbound: InboundSink,
        probe_tx: oneshot::Sender<()>,
    ) -> ListenerId {
        let target_origin = self.options.target_origin().to_string();
        let probe = Mutex::new(Some(probe_tx));

        let listener: MessageListener = Arc::new(move |event: MessageEvent| {
            if event.origin != target_origin {
                trace!(origin = %event.origin, "Ignoring message from unexpected origin");
                return;
            }
            if event.source != Some(window) {
                trace!("Ignoring message from unexpected source window");
                return;
            }

            let pending_probe = probe.lock().take();
            if let Some(probe_tx) = pending_probe {
                let _ = probe_tx.send(());
                // The first reply only proves liveness; it need not be a Message.
                match validate_message_structure(event.data) {
                    Ok(message) => inbound.deliver(message),
                    Err(err) => trace!(error = %err, "Liveness reply is not a message"),
                }
                return;
            }

            inbound.deliver_value(event.data);
        });

        self.provider.add_message_listener(listener)
    }

    async fn await_liveness(
        &self,
        window: WindowHandle,
        probe_rx: oneshot::Receiver<()>,
    ) -> Result<()> {
        let connect_timeout = self.options.connect_timeout();
        let provider = Arc::clone(&self.provider);
        let closed = async move {
            let mut ticker = interval(PROBE_POLL_INTERVAL);
            loop {
                ticker.tick().await;
                if provider.is_closed(window) {
                    break;
                }
            }
        };

        tokio::select! {
            reply = probe_rx => reply.map_err(|_| {
                TransportError::connection_failed("Liveness listener dropped")
            }),
            () = closed => Err(TransportError::connection_failed(
                "Target window closed before load",
            )
            .with_cause(WindowError::Closed)),
            () = sleep(connect_timeout) => Err(TransportError::connection_failed(format!(
                "Target window did not respond within {}ms",
                connect_timeout.as_millis()
            ))),
        }
    }

    fn spawn_watcher(&self, window: WindowHandle, inbound: InboundSink) -> JoinHandle<()> {
        let provider = Arc::clone(&self.provider);
        let every = self.options.watch_interval();

        tokio::spawn(async move {
            loop {
                sleep(every).await;
                if provider.is_closed(window) {
                    inbound.connection_lost(
                        TransportError::connection_failed("Target window was closed")
                            .with_cause(WindowError::Closed),
                    );
                    break;
                }
            }
        })
    }

    fn teardown(&self, session: WindowSession) {
        if let Some(watcher) = session.watcher {
            watcher.abort();
        }
        if !self.provider.remove_message_listener(session.listener) {
            warn!(listener = %session.listener, "Message listener was already removed");
        }
        if session.owned && !self.provider.is_closed(session.window) {
            self.provider.close(session.window);
        }
        debug!(window = session.window.as_u64(), "Window session torn down");
    }
}

#[async_trait]
impl<P: WindowProvider> Channel for WindowChannel<P> {
    fn kind(&self) -> &'static str {
        "window"
    }

    async fn open(&self, inbound: InboundSink) -> Result<()> {
        if let Some(stale) = self.session.lock().take() {
            self.teardown(stale);
        }

        let (window, owned) = self.resolve_window()?;
        let (probe_tx, probe_rx) = oneshot::channel();
        let listener = self.register_listener(window, inbound.clone(), probe_tx);
        let mut session = WindowSession {
            window,
            owned,
            listener,
            watcher: None,
        };

        let probe = serde_json::to_value(Message::notification(json!({ "type": PROBE_MARKER })))?;
        let probed = match self
            .provider
            .post_message(window, &probe, self.options.target_origin())
        {
            Ok(()) => self.await_liveness(window, probe_rx).await,
            Err(err @ WindowError::CrossOrigin(_)) => Err(TransportError::connection_failed(
                "Cross-origin access to target window denied",
            )
            .with_cause(err)),
            Err(err) => Err(
                TransportError::connection_failed("Failed to post liveness probe").with_cause(err),
            ),
        };

        if let Err(err) = probed {
            self.teardown(session);
            return Err(err);
        }

        session.watcher = Some(self.spawn_watcher(window, inbound));
        *self.session.lock() = Some(session);
        info!(window = window.as_u64(), origin = %self.options.target_origin(), "Window target is live");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let session = self.session.lock().take();
        if let Some(session) = session {
            self.teardown(session);
        }
        Ok(())
    }

    async fn post(&self, message: &Message<Value>) -> Result<()> {
        let window = self.window().ok_or_else(TransportError::not_connected)?;
        let data = serde_json::to_value(message)?;

        self.provider
            .post_message(window, &data, self.options.target_origin())
            .map_err(|e| {
                TransportError::send_failed(format!("postMessage failed for {}", message.id))
                    .with_cause(e)
            })
    }
}

// ============================================================================
// WindowTransport
// ============================================================================

/// Transport speaking to a popup, tab, or iframe.
pub type WindowTransport<P> = BaseTransport<WindowChannel<P>>;

impl<P: WindowProvider> BaseTransport<WindowChannel<P>> {
    /// Creates a window transport from a provider and options.
    #[must_use]
    pub fn from_provider(provider: Arc<P>, options: WindowOptions) -> Self {
        let transport_options = options.transport();
        Self::new(WindowChannel::new(provider, options), transport_options)
    }
}

// ============================================================================
// Tests
// ============================================================================


#[cfg(test)]
pub(crate) mod mock {
    //! In-memory [`WindowProvider`] with a scripted wallet page.

    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    use rustc_hash::FxHashSet;

    use super::*;
    use crate::protocol::MessageType;
    use crate::transport::arena::ListenerArena;

    pub(crate) const WALLET_ORIGIN: &str = "https://wallet.example";

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Script {
        /// Answers the probe and echoes every request.
        Echo,
        /// Answers the probe only.
        ProbeOnly,
        /// Never answers.
        Silent,
    }

    pub(crate) struct MockWindowProvider {
        script: Script,
        next_window: AtomicU64,
        listeners: Mutex<ListenerArena<MessageListener>>,
        closed_windows: Mutex<FxHashSet<WindowHandle>>,
        opened: Mutex<Vec<WindowHandle>>,
        closed: Mutex<Vec<WindowHandle>>,
        posts: Mutex<Vec<(WindowHandle, Value, String)>>,
        removals: AtomicUsize,
        close_on_open: AtomicBool,
        cross_origin: AtomicBool,
        blocked: AtomicBool,
    }

    impl MockWindowProvider {
        fn with_script(script: Script) -> Self {
            Self {
                script,
                next_window: AtomicU64::new(1),
                listeners: Mutex::new(ListenerArena::new()),
                closed_windows: Mutex::new(FxHashSet::default()),
                opened: Mutex::new(Vec::new()),
                closed: Mutex::new(Vec::new()),
                posts: Mutex::new(Vec::new()),
                removals: AtomicUsize::new(0),
                close_on_open: AtomicBool::new(false),
                cross_origin: AtomicBool::new(false),
                blocked: AtomicBool::new(false),
            }
        }

        pub(crate) fn echoing() -> Self {
            Self::with_script(Script::Echo)
        }

        pub(crate) fn silent_after_probe() -> Self {
            Self::with_script(Script::ProbeOnly)
        }

        pub(crate) fn unresponsive() -> Self {
            Self::with_script(Script::Silent)
        }

        pub(crate) fn close_on_open(&self) {
            self.close_on_open.store(true, Ordering::SeqCst);
        }

        pub(crate) fn deny_cross_origin(&self) {
            self.cross_origin.store(true, Ordering::SeqCst);
        }

        pub(crate) fn block_popups(&self) {
            self.blocked.store(true, Ordering::SeqCst);
        }

        /// Registers a window the page already has (e.g. an iframe).
        pub(crate) fn adopt(&self) -> WindowHandle {
            WindowHandle::new(self.next_window.fetch_add(1, Ordering::SeqCst))
        }

        pub(crate) fn user_closes(&self, window: WindowHandle) {
            self.closed_windows.lock().insert(window);
        }

        pub(crate) fn dispatch(&self, event: MessageEvent) {
            let listeners = self.listeners.lock().snapshot();
            for listener in listeners {
                listener(event.clone());
            }
        }

        pub(crate) fn opened(&self) -> Vec<WindowHandle> {
            self.opened.lock().clone()
        }

        pub(crate) fn closed(&self) -> Vec<WindowHandle> {
            self.closed.lock().clone()
        }

        pub(crate) fn posts(&self) -> Vec<(WindowHandle, Value, String)> {
            self.posts.lock().clone()
        }

        pub(crate) fn listener_count(&self) -> usize {
            self.listeners.lock().len()
        }

        pub(crate) fn removals(&self) -> usize {
            self.removals.load(Ordering::SeqCst)
        }

        fn answer(&self, data: &Value) -> Option<Value> {
            let is_probe = data["payload"]["type"] == json!(PROBE_MARKER);
            let reply = match (self.script, is_probe) {
                (Script::Silent, _) => return None,
                (_, true) => Message::notification(json!({ "type": "transport:ready" })),
                (Script::ProbeOnly, false) => return None,
                (Script::Echo, false) => {
                    if data["type"] != json!(MessageType::Request.as_str()) {
                        return None;
                    }
                    let id = data["id"].as_str().unwrap_or_default().to_string();
                    Message::response(id, json!({ "echo": data["payload"].clone() }))
                }
            };
            serde_json::to_value(reply).ok()
        }
    }

    impl WindowProvider for MockWindowProvider {
        fn open(&self, _url: &Url, _features: &PopupFeatures) -> StdResult<WindowHandle, WindowError> {
            if self.blocked.load(Ordering::SeqCst) {
                return Err(WindowError::PopupBlocked);
            }
            let window = self.adopt();
            self.opened.lock().push(window);
            if self.close_on_open.load(Ordering::SeqCst) {
                self.closed_windows.lock().insert(window);
            }
            Ok(window)
        }

        fn close(&self, window: WindowHandle) {
            self.closed_windows.lock().insert(window);
            self.closed.lock().push(window);
        }

        fn is_closed(&self, window: WindowHandle) -> bool {
            self.closed_windows.lock().contains(&window)
        }

        fn post_message(
            &self,
            window: WindowHandle,
            data: &Value,
            target_origin: &str,
        ) -> StdResult<(), WindowError> {
            if self.cross_origin.load(Ordering::SeqCst) {
                return Err(WindowError::CrossOrigin(target_origin.to_string()));
            }
            self.posts
                .lock()
                .push((window, data.clone(), target_origin.to_string()));

            if target_origin == WALLET_ORIGIN
                && let Some(reply) = self.answer(data)
            {
                self.dispatch(MessageEvent {
                    origin: WALLET_ORIGIN.to_string(),
                    source: Some(window),
                    data: reply,
                });
            }
            Ok(())
        }

        fn add_message_listener(&self, listener: MessageListener) -> ListenerId {
            self.listeners.lock().insert(listener)
        }

        fn remove_message_listener(&self, id: ListenerId) -> bool {
            let removed = self.listeners.lock().remove(id).is_some();
            if removed {
                self.removals.fetch_add(1, Ordering::SeqCst);
            }
            removed
        }
    }
}
