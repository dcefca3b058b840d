use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use log::debug;
use parking_lot::Mutex;
use types::{Block, Height};

/// A committed reorganization, or the terminal stop marker.
///
/// `incoming` is ordered fork point + 1 → new tip; `outgoing` is the popped
/// suffix in top-first order, matching the store's pop order.
#[derive(Clone, Debug)]
pub enum ReorganizeEvent {
    Reorganized {
        fork_height: Height,
        incoming: Arc<Vec<Arc<Block>>>,
        outgoing: Arc<Vec<Arc<Block>>>,
    },
    Stopped,
}

/// Fan-out of committed reorganizations.
///
/// Events are sent into unbounded per-subscriber channels directly from the
/// commit path, so delivery order always matches commit order and a slow
/// subscriber cannot stall the critical section. Subscribers arriving after
/// `stop` receive a single terminal event and are released.
#[derive(Default)]
pub struct ReorganizeSubscriber {
    subscribers: Mutex<Vec<UnboundedSender<ReorganizeEvent>>>,
    stopped: AtomicBool,
}

impl ReorganizeSubscriber {
    pub fn start(&self) {
        self.stopped.store(false, Ordering::Release);
    }

    /// Delivers the terminal event to every live subscriber exactly once
    /// and drops the subscription list.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);

        for subscriber in self.subscribers.lock().drain(..) {
            let _ = subscriber.unbounded_send(ReorganizeEvent::Stopped);
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> UnboundedReceiver<ReorganizeEvent> {
        let (sender, receiver) = unbounded();

        if self.stopped.load(Ordering::Acquire) {
            let _ = sender.unbounded_send(ReorganizeEvent::Stopped);
        } else {
            self.subscribers.lock().push(sender);
        }

        receiver
    }

    /// Relays an event to all subscribers, dropping the ones that went
    /// away.
    pub fn notify(&self, event: &ReorganizeEvent) {
        self.subscribers.lock().retain(|subscriber| {
            let delivered = subscriber.unbounded_send(event.clone()).is_ok();

            if !delivered {
                debug!("dropping reorganize subscriber whose receiver was dropped");
            }

            delivered
        });
    }
}
