//! In-memory doubles shared by transport tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Result, TransportError, TransportErrorCode};
use crate::protocol::Message;

use super::{Channel, ErrorHandler, InboundSink, Transport};

// ============================================================================
// Tracing
// ============================================================================

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// ErrorLog
// ============================================================================

/// Records every error a transport reports.
#[derive(Clone, Default)]
pub(crate) struct ErrorLog(Arc<Mutex<Vec<TransportError>>>);

impl ErrorLog {
    pub(crate) fn attach<T: Transport + ?Sized>(transport: &T) -> Self {
        let log = Self::default();
        transport.add_error_handler(log.handler());
        log
    }

    pub(crate) fn handler(&self) -> ErrorHandler {
        let errors = Arc::clone(&self.0);
        Arc::new(move |err: &TransportError| errors.lock().push(err.clone()))
    }

    pub(crate) fn codes(&self) -> Vec<TransportErrorCode> {
        self.0.lock().iter().map(|e| e.code).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.lock().len()
    }
}

// ============================================================================
// LoopbackChannel
// ============================================================================

type Responder = Box<dyn Fn(&Message<Value>) -> Message<Value> + Send + Sync>;

/// Channel that records posts and can answer them synchronously.
#[derive(Default)]
pub(crate) struct LoopbackChannel {
    inbound: Mutex<Option<InboundSink>>,
    posted: Mutex<Vec<Message<Value>>>,
    open_error: Mutex<Option<TransportError>>,
    post_error: Mutex<Option<TransportError>>,
    responder: Option<Responder>,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl LoopbackChannel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn auto_reply(
        mut self,
        responder: impl Fn(&Message<Value>) -> Message<Value> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    pub(crate) fn fail_open(&self, err: TransportError) {
        *self.open_error.lock() = Some(err);
    }

    pub(crate) fn fail_open_clear(&self) {
        *self.open_error.lock() = None;
    }

    pub(crate) fn fail_post(&self, err: TransportError) {
        *self.post_error.lock() = Some(err);
    }

    pub(crate) fn posted(&self) -> Vec<Message<Value>> {
        self.posted.lock().clone()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for LoopbackChannel {
    fn kind(&self) -> &'static str {
        "loopback"
    }

    async fn open(&self, inbound: InboundSink) -> Result<()> {
        if let Some(err) = self.open_error.lock().clone() {
            return Err(err);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.inbound.lock() = Some(inbound);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inbound.lock().take();
        Ok(())
    }

    async fn post(&self, message: &Message<Value>) -> Result<()> {
        if let Some(err) = self.post_error.lock().clone() {
            return Err(err);
        }
        self.posted.lock().push(message.clone());

        if let Some(responder) = &self.responder {
            let reply = responder(message);
            let inbound = self.inbound.lock().clone();
            if let Some(inbound) = inbound {
                inbound.deliver(reply);
            }
        }
        Ok(())
    }
}
