use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;

type Listener = Box<dyn Fn(bool) + Send + Sync>;

/// Tracks whether the remote is reachable.
///
/// Listeners and watch receivers only hear about genuine transitions; setting
/// the same state twice is silent. Listeners must not register new listeners
/// from inside the callback.
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
    listeners: Mutex<Vec<Listener>>,
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(reachable: bool) -> Self {
        let (state, _) = watch::channel(reachable);
        Self {
            state,
            listeners: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn is_reachable(&self) -> bool {
        *self.state.borrow()
    }

    /// Update the current state. Returns true if this was a transition.
    pub fn set_reachable(&self, reachable: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });

        if changed {
            if reachable {
                tracing::info!("remote reachable");
            } else {
                tracing::warn!("remote unreachable, writes will be queued");
            }
            let listeners = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for listener in listeners.iter() {
                listener(reachable);
            }
        }
        changed
    }

    pub fn on_change(&self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(listener));
    }

    /// A receiver that wakes on each transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}
