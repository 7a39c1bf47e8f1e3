//! Reference counting for shared raster surfaces
//!
//! Every consumer of a surface holds a [`SurfaceReference`] token. The
//! [`ReferenceManager`] tracks the live count and notifies listeners on
//! every transition; the registry drives eviction off the zero transitions.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::DoubleReleaseError;

type Listener = Arc<dyn Fn(usize) + Send + Sync>;

struct RefCountState {
    count: usize,
    next_id: u64,
    live: HashSet<u64>,
    listeners: Vec<Listener>,
}

/// Shared reference counter for one resource.
///
/// Cloning yields another handle to the same counter. Listeners are invoked
/// synchronously, in registration order, on every count transition.
#[derive(Clone)]
pub struct ReferenceManager {
    state: Arc<Mutex<RefCountState>>,
}

impl ReferenceManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RefCountState {
                count: 0,
                next_id: 1,
                live: HashSet::new(),
                listeners: Vec::new(),
            })),
        }
    }

    /// Increment the live count and hand out a token for the new consumer.
    #[must_use]
    pub fn retain(&self) -> SurfaceReference {
        let (id, count, listeners) = {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.live.insert(id);
            state.count += 1;
            (id, state.count, state.listeners.clone())
        };
        notify(&listeners, count);
        SurfaceReference {
            manager: self.clone(),
            id,
            hooks: Vec::new(),
            released: false,
        }
    }

    /// Decrement the count for the token with the given id.
    ///
    /// Releasing an unknown or already-released id is a caller invariant
    /// violation; the count is never decremented below its current value.
    pub(crate) fn release_id(&self, id: u64) -> Result<usize, DoubleReleaseError> {
        let (count, listeners) = {
            let mut state = self.lock();
            if !state.live.remove(&id) {
                return Err(DoubleReleaseError { id });
            }
            state.count -= 1;
            (state.count, state.listeners.clone())
        };
        notify(&listeners, count);
        Ok(count)
    }

    /// Register a listener fired on every count transition.
    pub fn add_listener(&self, listener: impl Fn(usize) + Send + Sync + 'static) {
        self.lock().listeners.push(Arc::new(listener));
    }

    /// Current live count.
    #[must_use]
    pub fn count(&self) -> usize {
        self.lock().count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RefCountState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for ReferenceManager {
    fn default() -> Self {
        Self::new()
    }
}

fn notify(listeners: &[Listener], count: usize) {
    for listener in listeners {
        listener(count);
    }
}

/// Capability token proving one active consumer of a surface.
///
/// Must be released exactly once. `release` consumes the token, so a
/// consumer cannot release twice; dropping an unreleased token is a leak
/// and is reported through the log.
pub struct SurfaceReference {
    manager: ReferenceManager,
    id: u64,
    hooks: Vec<Box<dyn FnOnce() + Send>>,
    released: bool,
}

impl SurfaceReference {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Run `hook` when this token is released, before the count drops.
    pub(crate) fn on_release(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Release the token, decrementing the live count exactly once.
    pub fn release(mut self) -> Result<(), DoubleReleaseError> {
        self.released = true;
        for hook in self.hooks.drain(..) {
            hook();
        }
        self.manager.release_id(self.id).map(|_| ())
    }
}

impl Drop for SurfaceReference {
    fn drop(&mut self) {
        if !self.released {
            log::error!("surface reference {} dropped without release", self.id);
        }
    }
}

impl std::fmt::Debug for SurfaceReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceReference")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn retain_and_release_track_count() {
        let manager = ReferenceManager::new();
        assert_eq!(manager.count(), 0);

        let a = manager.retain();
        let b = manager.retain();
        assert_eq!(manager.count(), 2);

        a.release().unwrap();
        assert_eq!(manager.count(), 1);
        b.release().unwrap();
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn listeners_fire_on_every_transition() {
        let manager = ReferenceManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        manager.add_listener(move |count| seen_clone.lock().unwrap().push(count));

        let a = manager.retain();
        let b = manager.retain();
        b.release().unwrap();
        a.release().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 1, 0]);
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let manager = ReferenceManager::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            manager.add_listener(move |_| order.lock().unwrap().push(tag));
        }

        manager.retain().release().unwrap();
        assert_eq!(
            *order.lock().unwrap(),
            vec!["first", "second", "third", "first", "second", "third"]
        );
    }

    #[test]
    fn double_release_is_an_error_and_does_not_underflow() {
        let manager = ReferenceManager::new();
        let held = manager.retain();
        let token = manager.retain();
        let id = token.id();
        token.release().unwrap();
        assert_eq!(manager.count(), 1);

        let err = manager.release_id(id).unwrap_err();
        assert_eq!(err.id, id);
        assert_eq!(manager.count(), 1);
        held.release().unwrap();
    }

    #[test]
    fn unknown_id_is_an_error() {
        let manager = ReferenceManager::new();
        assert!(manager.release_id(42).is_err());
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn hooks_run_before_the_count_drops() {
        let manager = ReferenceManager::new();
        let count_at_hook = Arc::new(AtomicUsize::new(usize::MAX));

        let mut token = manager.retain();
        let manager_clone = manager.clone();
        let observed = count_at_hook.clone();
        token.on_release(move || {
            observed.store(manager_clone.count(), Ordering::SeqCst);
        });
        token.release().unwrap();

        assert_eq!(count_at_hook.load(Ordering::SeqCst), 1);
        assert_eq!(manager.count(), 0);
    }
}
