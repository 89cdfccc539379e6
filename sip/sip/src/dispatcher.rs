//! Delivery of engine events to observers

use parking_lot::Mutex;
use sip_ua::{CallId, Event, EventKind};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Callback invoked for every event it subscribed to
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle of an observer, used to unsubscribe it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Observer {
    id: SubscriptionId,
    /// `None` receives every event
    kind: Option<EventKind>,
    callback: Callback,
}

/// Registered observers, shared between the client and the dispatcher task
#[derive(Default)]
pub(crate) struct Observers {
    next_id: AtomicU64,
    observers: Mutex<Vec<Observer>>,
}

impl Observers {
    pub(crate) fn subscribe(&self, kind: Option<EventKind>, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.observers.lock().push(Observer { id, kind, callback });

        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();

        observers.retain(|observer| observer.id != id);

        observers.len() != before
    }

    /// Invoke every matching observer in subscription order.
    ///
    /// The lock is not held while the callbacks run, so they may subscribe, unsubscribe or
    /// issue control operations themselves.
    fn dispatch(&self, event: &Event) {
        let kind = event.kind();

        let callbacks: Vec<Callback> = self
            .observers
            .lock()
            .iter()
            .filter(|observer| observer.kind.is_none_or(|k| k == kind))
            .map(|observer| observer.callback.clone())
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }
}

/// Client side knowledge about calls, updated without waiting for the reactor
#[derive(Debug, Default)]
pub(crate) struct LocalCalls {
    /// Mic state of every call it was changed for
    pub(crate) muted: HashMap<CallId, bool>,

    /// Calls created with `make_call` which are not in a published snapshot yet, cleared by
    /// the reactor
    pub(crate) pending: HashSet<CallId>,
}

impl LocalCalls {
    fn closed(&mut self, call: CallId) {
        self.muted.remove(&call);
        self.pending.remove(&call);
    }
}

/// Deliver events in the order the engine produced them until the reactor closes the channel
pub(crate) async fn run(
    mut events: mpsc::Receiver<Event>,
    observers: Arc<Observers>,
    local: Arc<Mutex<LocalCalls>>,
) {
    while let Some(event) = events.recv().await {
        if let Event::CallClosed { call, .. } = &event {
            local.lock().closed(*call);
        }

        observers.dispatch(&event);
    }

    log::debug!("event channel closed, dispatcher exiting");
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn filtered_and_catch_all_observers() {
        let observers = Observers::default();

        let all = Arc::new(AtomicUsize::new(0));
        let registered = Arc::new(AtomicUsize::new(0));

        let all_ = all.clone();
        observers.subscribe(
            None,
            Arc::new(move |_| {
                all_.fetch_add(1, Ordering::Relaxed);
            }),
        );

        let registered_ = registered.clone();
        let id = observers.subscribe(
            Some(EventKind::DidUnregister),
            Arc::new(move |_| {
                registered_.fetch_add(1, Ordering::Relaxed);
            }),
        );

        observers.dispatch(&Event::WillRegister);
        observers.dispatch(&Event::DidUnregister);

        assert_eq!(all.load(Ordering::Relaxed), 2);
        assert_eq!(registered.load(Ordering::Relaxed), 1);

        assert!(observers.unsubscribe(id));
        assert!(!observers.unsubscribe(id));

        observers.dispatch(&Event::DidUnregister);
        assert_eq!(registered.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn callbacks_may_subscribe_while_dispatched() {
        let observers = Arc::new(Observers::default());

        let observers_ = observers.clone();
        observers.subscribe(
            Some(EventKind::WillRegister),
            Arc::new(move |_| {
                observers_.subscribe(None, Arc::new(|_| {}));
            }),
        );

        observers.dispatch(&Event::WillRegister);

        assert_eq!(observers.observers.lock().len(), 2);
    }
}
