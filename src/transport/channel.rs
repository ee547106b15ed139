//! Channel seam between the shared transport core and a concrete medium.
//!
//! A [`Channel`] supplies only what differs between media: how to open,
//! how to close, and how to post one outbound message. Inbound traffic
//! flows back through the [`InboundSink`] handed to [`Channel::open`].
//!
//! ```text
//! ┌───────────────┐  post()   ┌──────────┐
//! │ BaseTransport │──────────►│ Channel  │──► window / port / send fn
//! │  correlation  │           │          │
//! │  handlers     │◄──────────│          │◄── message events
//! └───────────────┘ InboundSink└──────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{trace, warn};

use crate::error::{Result, TransportError};
use crate::protocol::{Message, validate_message_structure};

use super::ConnectionState;
use super::base::TransportShared;

// ============================================================================
// Channel
// ============================================================================

/// Medium-specific half of a transport.
///
/// Implementations must make [`Channel::close`] idempotent and must never
/// panic inside listener callbacks; failures go through
/// [`InboundSink::report`] instead.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    /// Establishes the medium. Inbound traffic must be fed to `inbound`.
    async fn open(&self, inbound: InboundSink) -> Result<()>;

    /// Tears the medium down. Called by every `disconnect()` that leaves a
    /// state other than `Disconnected`, including the `Error` state after a
    /// failed `open`, so it must tolerate a medium that was never
    /// established.
    async fn close(&self) -> Result<()>;

    /// Hands one outbound message to the medium.
    async fn post(&self, message: &Message<Value>) -> Result<()>;
}

// ============================================================================
// InboundSink
// ============================================================================

/// Handle through which a channel reports inbound traffic and failures.
#[derive(Clone)]
pub struct InboundSink {
    shared: Arc<TransportShared>,
}

impl InboundSink {
    pub(crate) fn new(shared: Arc<TransportShared>) -> Self {
        Self { shared }
    }

    /// Validates a raw inbound value and delivers it.
    ///
    /// Malformed values are reported as `invalid_message` and dropped.
    pub fn deliver_value(&self, value: Value) {
        match validate_message_structure(value) {
            Ok(message) => self.deliver(message),
            Err(err) => self.report(TransportError::from(err)),
        }
    }

    /// Delivers a validated message.
    ///
    /// Replies settle their pending request; unmatched replies are dropped.
    /// Requests and notifications go to subscribers in arrival order.
    pub fn deliver(&self, message: Message<Value>) {
        if self.shared.state() == ConnectionState::Disconnected {
            trace!(transport = self.shared.kind(), id = %message.id, "Dropping inbound message while disconnected");
            return;
        }

        if message.message_type.is_reply() {
            self.shared.correlation().settle(message);
            return;
        }

        self.shared.dispatch(&message);
    }

    /// Reports a non-fatal failure to the error handlers.
    pub fn report(&self, err: TransportError) {
        warn!(transport = self.shared.kind(), error = %err, "Inbound failure");
        self.shared.notify(&err);
    }

    /// Reports that the medium went away on its own.
    ///
    /// Moves the transport to `Error`, rejects every pending request with
    /// `err`, and notifies handlers. Ignored unless the transport is
    /// connected or connecting, so repeated reports notify once.
    pub fn connection_lost(&self, err: TransportError) {
        self.shared.connection_lost(err);
    }

    /// Returns `true` while the transport is connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected
    }
}
