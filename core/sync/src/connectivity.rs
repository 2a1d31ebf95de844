//! Online/offline tracking with change and reconnect notifications.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Callback fired on every online/offline change with the new state.
pub type ChangeHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// Callback fired only on an offline -> online edge.
pub type ReconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// A state change reported to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: bool,
    pub current: bool,
}

impl Transition {
    /// True only for the offline -> online edge.
    pub fn is_reconnect(&self) -> bool {
        !self.previous && self.current
    }
}

/// Token returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

enum Listener {
    Change(ChangeHandler),
    Reconnect(ReconnectHandler),
}

struct State {
    online: bool,
    previous: bool,
}

/// Holds the online/offline flag for one client.
///
/// Starts optimistic (online). Handlers run synchronously inside
/// [`ConnectivityTracker::report`], change handlers first, then reconnect
/// handlers, each group in subscription order. Handlers may call back into
/// the tracker.
pub struct ConnectivityTracker {
    state: Mutex<State>,
    online: AtomicBool,
    listeners: Mutex<Vec<(Subscription, Arc<Listener>)>>,
    next_id: AtomicU64,
}

impl ConnectivityTracker {
    /// Create a tracker that assumes the server is reachable.
    pub fn new() -> Self {
        Self::with_initial(true)
    }

    /// Create a tracker with an explicit starting state.
    pub fn with_initial(online: bool) -> Self {
        Self {
            state: Mutex::new(State {
                online,
                previous: online,
            }),
            online: AtomicBool::new(online),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Current state. Never blocks on a running `report`.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Feed a probe result into the tracker.
    ///
    /// Repeating the current value is a no-op. A change fires the change
    /// handlers; the offline -> online edge additionally fires the reconnect
    /// handlers.
    ///
    /// # Returns
    /// The transition, if the state changed.
    pub fn report(&self, is_reachable: bool) -> Option<Transition> {
        let transition = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.online == is_reachable {
                return None;
            }
            state.previous = state.online;
            state.online = is_reachable;
            self.online.store(is_reachable, Ordering::SeqCst);
            Transition {
                previous: state.previous,
                current: state.online,
            }
        };

        if transition.current {
            info!("Connectivity restored");
        } else {
            info!("Connectivity lost");
        }

        // Snapshot so handlers can (un)subscribe without deadlocking.
        let listeners: Vec<Arc<Listener>> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in &listeners {
            if let Listener::Change(handler) = listener.as_ref() {
                handler(transition.current);
            }
        }

        if transition.is_reconnect() {
            debug!("Firing reconnect handlers");
            for listener in &listeners {
                if let Listener::Reconnect(handler) = listener.as_ref() {
                    handler();
                }
            }
        }

        Some(transition)
    }

    /// Subscribe to every online/offline change.
    pub fn on_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.add(Listener::Change(Arc::new(handler)))
    }

    /// Subscribe to the offline -> online edge only.
    pub fn on_reconnect<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.add(Listener::Reconnect(Arc::new(handler)))
    }

    /// Drop a subscription.
    ///
    /// # Returns
    /// `false` if the token was unknown (already removed).
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != subscription);
        listeners.len() != before
    }

    fn add(&self, listener: Listener) -> Subscription {
        let id = Subscription(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }
}

impl Default for ConnectivityTracker {
    fn default() -> Self {
        Self::new()
    }
}
