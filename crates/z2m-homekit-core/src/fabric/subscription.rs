// ── Typed topics and subscriptions ──

use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use super::Role;

struct Subscriber<E> {
    handle_id: u64,
    role: Role,
    tx: mpsc::UnboundedSender<E>,
}

/// Fan-out point for one event type. Every subscriber has its own
/// unbounded queue, so a slow consumer never holds up the publisher or
/// its peers, and each publisher's events arrive in publish order.
pub(crate) struct Topic<E> {
    subscribers: Mutex<Vec<Subscriber<E>>>,
}

impl<E: Clone> Topic<E> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Deliver to every live subscriber. Returns the delivery count.
    pub(crate) fn publish(&self, event: &E) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers
            .iter()
            .filter(|s| s.tx.send(event.clone()).is_ok())
            .count()
    }

    pub(crate) fn subscribe(
        &self,
        handle_id: u64,
        role: Role,
        cancel: CancellationToken,
    ) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !cancel.is_cancelled() {
            self.subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Subscriber {
                    handle_id,
                    role,
                    tx,
                });
        }
        Subscription { rx, cancel }
    }

    /// Drop every subscriber registered through `handle_id`. Buffered
    /// events already queued for them stay in their receivers.
    pub(crate) fn remove_handle(&self, handle_id: u64) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s| s.handle_id != handle_id);
    }

    pub(crate) fn clear(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Live subscriber count for `role`.
    pub(crate) fn count_for(&self, role: Role) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.role == role && !s.tx.is_closed())
            .count()
    }
}

/// Receiving end of a fabric subscription.
///
/// Ends when the owning handle or the whole fabric is closed. Events
/// still buffered at that moment are discarded.
pub struct Subscription<E> {
    rx: mpsc::UnboundedReceiver<E>,
    cancel: CancellationToken,
}

impl<E> Subscription<E> {
    /// Wait for the next event. `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<E> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    /// Take an already-buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Convert into a `Stream`. The stream ends when the subscription is
    /// closed.
    pub fn into_stream(self) -> SubscriptionStream<E> {
        SubscriptionStream {
            inner: UnboundedReceiverStream::new(self.rx),
            cancel: self.cancel,
        }
    }
}

/// `Stream` adapter over a [`Subscription`].
pub struct SubscriptionStream<E> {
    inner: UnboundedReceiverStream<E>,
    cancel: CancellationToken,
}

impl<E> Stream for SubscriptionStream<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        // Closing a handle drops its senders, which wakes this receiver.
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
