//! Push subscriptions with explicit cancellation handles.

use std::collections::HashMap;
use std::hash::Hash;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Receiving end of a backend subscription.
///
/// Dropping the subscription cancels it. A [`SubscriptionHandle`] taken
/// before the subscription is moved into a task can cancel it from outside.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    token: CancellationToken,
}

/// Sending end held by the backend.
#[derive(Debug)]
pub struct SubscriptionSender<T> {
    tx: mpsc::UnboundedSender<T>,
    token: CancellationToken,
}

/// Cloneable cancellation handle for a subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    token: CancellationToken,
}

/// Create a connected sender/subscription pair.
pub fn subscription_channel<T>() -> (SubscriptionSender<T>, Subscription<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let token = CancellationToken::new();
    (
        SubscriptionSender {
            tx,
            token: token.clone(),
        },
        Subscription { rx, token },
    )
}

impl<T> Subscription<T> {
    /// Wait for the next delivered value. Returns `None` once cancelled or
    /// once the backend drops its sender.
    pub async fn next(&mut self) -> Option<T> {
        if self.token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            value = self.rx.recv() => value,
        }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            token: self.token.clone(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl<T> SubscriptionSender<T> {
    /// Deliver a value. Returns false if the subscriber is gone.
    pub fn send(&self, value: T) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(value).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }
}

impl SubscriptionHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// Subscription Set
// ---------------------------------------------------------------------------

/// At most one active subscription per key.
///
/// Inserting under an existing key cancels the previous subscription.
#[derive(Debug)]
pub struct SubscriptionSet<K: Eq + Hash> {
    handles: HashMap<K, SubscriptionHandle>,
}

impl<K: Eq + Hash> SubscriptionSet<K> {
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
        }
    }

    /// Track `handle` under `key`, cancelling whatever was there before.
    pub fn insert(&mut self, key: K, handle: SubscriptionHandle) {
        if let Some(previous) = self.handles.insert(key, handle) {
            previous.cancel();
        }
    }

    /// Cancel and forget the subscription under `key`.
    pub fn remove(&mut self, key: &K) -> bool {
        match self.handles.remove(key) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.handles
            .get(key)
            .is_some_and(|handle| !handle.is_cancelled())
    }

    /// Number of subscriptions that are still live.
    pub fn active(&self) -> usize {
        self.handles.values().filter(|h| !h.is_cancelled()).count()
    }

    pub fn clear(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.cancel();
        }
    }
}

impl<K: Eq + Hash> Default for SubscriptionSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> Drop for SubscriptionSet<K> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order() {
        let (tx, mut sub) = subscription_channel();
        assert!(tx.send(1));
        assert!(tx.send(2));
        assert_eq!(sub.next().await, Some(1));
        assert_eq!(sub.next().await, Some(2));
    }

    #[tokio::test]
    async fn cancel_ends_stream_and_closes_sender() {
        let (tx, mut sub) = subscription_channel::<u32>();
        let handle = sub.handle();
        handle.cancel();
        assert!(sub.is_cancelled());
        assert_eq!(sub.next().await, None);
        assert!(tx.is_closed());
        assert!(!tx.send(7));
    }

    #[test]
    fn dropping_subscription_closes_sender() {
        let (tx, sub) = subscription_channel::<u32>();
        drop(sub);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn next_returns_none_when_sender_dropped() {
        let (tx, mut sub) = subscription_channel::<u32>();
        drop(tx);
        assert_eq!(sub.next().await, None);
    }

    #[test]
    fn set_replaces_and_cancels_previous() {
        let (_tx1, sub1) = subscription_channel::<u32>();
        let (_tx2, sub2) = subscription_channel::<u32>();
        let mut set = SubscriptionSet::new();

        set.insert("u1", sub1.handle());
        set.insert("u1", sub2.handle());

        assert!(sub1.is_cancelled());
        assert!(!sub2.is_cancelled());
        assert_eq!(set.active(), 1);
        assert!(set.contains(&"u1"));
    }

    #[test]
    fn set_remove_and_clear_cancel() {
        let (_tx1, sub1) = subscription_channel::<u32>();
        let (_tx2, sub2) = subscription_channel::<u32>();
        let mut set = SubscriptionSet::new();
        set.insert("a", sub1.handle());
        set.insert("b", sub2.handle());

        assert!(set.remove(&"a"));
        assert!(!set.remove(&"a"));
        assert!(sub1.is_cancelled());

        set.clear();
        assert!(sub2.is_cancelled());
        assert_eq!(set.active(), 0);
    }
}
