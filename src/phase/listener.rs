//! Async phase listener.
//!
//! Bridges the synchronous observer registry to async code: each matching
//! transition is cloned into an unbounded channel that a task can await or
//! consume as a [`Stream`]. Dropping the listener removes its subscription.

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::error::PhaseError;
use crate::tag::MatchMode;

use super::observer::{PhaseEvent, SubscriptionId};
use super::subsystem::PhaseSubsystem;

/// Receives phase transitions matching a pattern.
///
/// Events arrive in the same order synchronous observers see them.
pub struct PhaseListener {
    rx: mpsc::UnboundedReceiver<PhaseEvent>,
    id: SubscriptionId,
    subsystem: Weak<PhaseSubsystem>,
}

impl PhaseListener {
    /// Subscription backing this listener.
    #[must_use]
    pub const fn subscription_id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next transition.
    ///
    /// Returns `None` once the subsystem has been dropped or deinitialized
    /// and every buffered event has been received.
    pub async fn recv(&mut self) -> Option<PhaseEvent> {
        self.rx.recv().await
    }

    /// Returns a buffered transition without waiting.
    pub fn try_recv(&mut self) -> Option<PhaseEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for PhaseListener {
    type Item = PhaseEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for PhaseListener {
    fn drop(&mut self) {
        if let Some(subsystem) = self.subsystem.upgrade() {
            // already gone after deinitialize
            let _ = subsystem.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for PhaseListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseListener")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl PhaseSubsystem {
    /// Creates an async listener for transitions matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns a tag error if `pattern` does not canonicalize.
    pub fn listen(self: &Arc<Self>, pattern: &str, mode: MatchMode) -> Result<PhaseListener, PhaseError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(pattern, mode, move |event: &PhaseEvent| {
            // receiver dropped; the listener's Drop will unsubscribe
            let _ = tx.send(event.clone());
        })?;
        Ok(PhaseListener {
            rx,
            id,
            subsystem: Arc::downgrade(self),
        })
    }
}
