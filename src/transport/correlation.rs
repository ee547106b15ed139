//! Request/response correlation.
//!
//! One [`CorrelationEngine`] per transport maps outstanding request IDs
//! to the oneshot channel the caller is awaiting. Each entry is consumed
//! exactly once:
//!
//! - by a matching inbound Response/Error ([`CorrelationEngine::settle`])
//! - by timeout expiry ([`CorrelationEngine::wait`])
//! - by disconnection ([`CorrelationEngine::fail_all`])
//!
//! The timer is the `tokio::time::timeout` future owned by the waiting
//! caller, so no timer outlives its entry.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout};
use tracing::{debug, trace, warn};

use crate::error::{Result, TransportError};
use crate::identifiers::MessageId;
use crate::protocol::{Message, MessageType};

// ============================================================================
// Types
// ============================================================================

/// Outcome delivered to a waiting caller.
type Reply = Result<Message<Value>>;

/// A registered, not yet settled request.
struct PendingCorrelation {
    /// Channel back to the caller.
    reply_tx: oneshot::Sender<Reply>,
    /// Registration time, for diagnostics.
    registered_at: Instant,
}

/// Receiving half returned by [`CorrelationEngine::register`].
#[derive(Debug)]
pub struct PendingReply {
    id: MessageId,
    reply_rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    /// Returns the correlated message id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &MessageId {
        &self.id
    }
}

// ============================================================================
// CorrelationEngine
// ============================================================================

/// Pending-request table with timeout eviction.
pub struct CorrelationEngine {
    pending: Mutex<FxHashMap<MessageId, PendingCorrelation>>,
    max_pending: usize,
}

impl CorrelationEngine {
    /// Creates an engine that accepts at most `max_pending` entries.
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: Mutex::new(FxHashMap::default()),
            max_pending,
        }
    }

    /// Registers a pending request.
    ///
    /// # Errors
    ///
    /// - `invalid_message` if `id` is already pending (the existing entry is kept)
    /// - `send_failed` if the pending cap is reached
    pub fn register(&self, id: &MessageId) -> Result<PendingReply> {
        let mut pending = self.pending.lock();

        if pending.contains_key(id) {
            return Err(TransportError::invalid_message(format!(
                "Duplicate message id: {id}"
            ))
            .with_details(json!({ "id": id.as_str() })));
        }

        if pending.len() >= self.max_pending {
            warn!(
                pending = pending.len(),
                max = self.max_pending,
                "Too many pending requests"
            );
            return Err(TransportError::send_failed(format!(
                "Too many pending requests: {}/{}",
                pending.len(),
                self.max_pending
            )));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        pending.insert(
            id.clone(),
            PendingCorrelation {
                reply_tx,
                registered_at: Instant::now(),
            },
        );
        trace!(%id, "Correlation registered");

        Ok(PendingReply {
            id: id.clone(),
            reply_rx,
        })
    }

    /// Settles the entry matching an inbound Response or Error.
    ///
    /// Returns `false` if no entry matched (unknown or late reply) or the
    /// message is not a reply.
    pub fn settle(&self, message: Message<Value>) -> bool {
        let outcome = match message.message_type {
            MessageType::Response => None,
            MessageType::Error => Some(remote_error(&message.payload)),
            MessageType::Request | MessageType::Notification => return false,
        };

        let Some(entry) = self.pending.lock().remove(&message.id) else {
            debug!(id = %message.id, "Reply for unknown request");
            return false;
        };

        trace!(
            id = %message.id,
            elapsed_ms = entry.registered_at.elapsed().as_millis() as u64,
            "Correlation settled"
        );

        let reply = match outcome {
            None => Ok(message),
            Some(err) => Err(err),
        };
        let _ = entry.reply_tx.send(reply);
        true
    }

    /// Rejects one entry with `err`. Returns `false` if it was not pending.
    pub fn reject(&self, id: &MessageId, err: TransportError) -> bool {
        match self.pending.lock().remove(id) {
            Some(entry) => {
                let _ = entry.reply_tx.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Drops one entry without notifying its waiter.
    pub fn remove(&self, id: &MessageId) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    /// Rejects every entry with a clone of `err`. Returns how many were failed.
    pub fn fail_all(&self, err: &TransportError) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();

        for (_, entry) in drained {
            let _ = entry.reply_tx.send(Err(err.clone()));
        }

        if count > 0 {
            debug!(count, code = %err.code, "Failed pending requests");
        }
        count
    }

    /// Waits for the reply, evicting the entry on timeout.
    ///
    /// # Errors
    ///
    /// - `timeout` if no reply arrives within `request_timeout`
    /// - `connection_failed` if the entry was dropped without a reply
    /// - whatever error the entry was rejected with
    pub async fn wait(&self, reply: PendingReply, request_timeout: Duration) -> Reply {
        let PendingReply { id, reply_rx } = reply;

        match timeout(request_timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(TransportError::disconnected()),
            Err(_) => {
                self.remove(&id);
                let timeout_ms = request_timeout.as_millis() as u64;
                debug!(%id, timeout_ms, "Request timed out");
                Err(TransportError::timeout(format!(
                    "Request {id} timed out after {timeout_ms}ms"
                ))
                .with_details(json!({ "id": id.as_str(), "timeoutMs": timeout_ms })))
            }
        }
    }

    /// Returns `true` if `id` is pending.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.pending.lock().contains_key(id)
    }

    /// Returns the number of pending entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Builds the error a caller sees when the remote end answers with an Error.
///
/// Accepts `{code, message, data}` and `{error: {code, message, data}}`.
fn remote_error(payload: &Value) -> TransportError {
    let body = payload.get("error").filter(|e| e.is_object()).unwrap_or(payload);
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.as_str())
        .unwrap_or("Remote endpoint returned an error");

    TransportError::protocol(message).with_details(payload.clone())
}

// ============================================================================
// Tests
// ============================================================================
