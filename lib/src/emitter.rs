use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use derivative::Derivative;

/// Ids are unique across all emitters
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// List of listeners for events of type `E`
///
/// Listeners are called without holding internal lock, so they can
/// subscribe or unsubscribe other listeners while being called.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Emitter<E> {
    #[derivative(Debug = "ignore")]
    listeners: Mutex<Vec<(ListenerId, Listener<E>)>>,
}

impl<E> Emitter<E> {
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(NEXT_ID.fetch_add(1, Ordering::SeqCst));
        self.lock().push((id, Arc::new(listener)));
        id
    }

    /// Removes listener, returns `false` if it was not subscribed
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let len = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != len
    }

    pub fn publish(&self, event: &E) {
        let listeners: Vec<_> = self.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Listener<E>)>> {
        // listener list stays consistent even if some listener panicked
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Emitter {
            listeners: Mutex::new(vec![]),
        }
    }
}
