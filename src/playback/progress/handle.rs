use super::PlaybackEvent;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tokio::sync::mpsc as tokio_mpsc;

type SubscriptionId = u64;

type Subscriptions = HashMap<SubscriptionId, tokio_mpsc::UnboundedSender<PlaybackEvent>>;

/// Fan-out of playback events to any number of subscribers
///
/// Emitting never blocks. A subscription is removed on the first emit after
/// its receiver was dropped.
#[derive(Clone, Default)]
pub struct EventHub {
    subscriptions: Arc<Mutex<Subscriptions>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscriptions> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to every event emitted from now on
    pub fn subscribe(&self) -> tokio_mpsc::UnboundedReceiver<PlaybackEvent> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(id, tx);
        rx
    }

    pub fn emit(&self, event: PlaybackEvent) {
        let mut subs = self.lock();
        if subs.is_empty() {
            return;
        }

        // If send fails, receiver was dropped
        subs.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out_and_prune() {
        let hub = EventHub::new();
        let mut first = hub.subscribe();
        let second = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(second);
        hub.emit(PlaybackEvent::Ended {
            asset: "bass".to_string(),
        });

        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(
            first.try_recv().unwrap(),
            PlaybackEvent::Ended {
                asset: "bass".to_string()
            }
        );
    }

    #[test]
    fn test_clones_share_subscribers() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();
        hub.clone().emit(PlaybackEvent::GroupStopped { offset: 1.5 });
        assert_eq!(
            rx.try_recv().unwrap(),
            PlaybackEvent::GroupStopped { offset: 1.5 }
        );
    }
}
