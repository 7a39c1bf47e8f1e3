//! Render jobs and completion latches
//!
//! Callers block on a [`Latch`] per in-flight operation; every caller
//! interested in the same page or surface shares the same latch, which is
//! what coalesces concurrent identical requests.

use std::sync::{Arc, Condvar, Mutex};

use crate::error::RenderError;
use crate::raster::{PageInfo, TextLine};
use crate::refcount::SurfaceReference;
use crate::registry::MainSurface;

/// One-shot completion latch, completed exactly once by the worker and
/// awaited by any number of callers.
pub(crate) struct Latch<T> {
    state: Mutex<Option<Result<T, RenderError>>>,
    cond: Condvar,
}

impl<T: Clone> Latch<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Complete the latch and wake all waiters. Later completions are
    /// ignored.
    pub(crate) fn complete(&self, result: Result<T, RenderError>) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.is_none() {
            *state = Some(result);
            self.cond.notify_all();
        }
    }

    /// Block until the latch completes.
    pub(crate) fn wait(&self) -> Result<T, RenderError> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if let Some(result) = state.as_ref() {
                return result.clone();
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Whether the latch has completed, without blocking.
    #[cfg(test)]
    pub(crate) fn is_complete(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }
}

/// Jobs sent to the render worker.
pub(crate) enum RenderJob {
    /// Resolve a page descriptor.
    ResolvePage {
        number: usize,
        slot: Arc<Latch<PageInfo>>,
    },

    /// Extract the text layout of a page.
    ResolveText {
        page: PageInfo,
        slot: Arc<Latch<Arc<Vec<TextLine>>>>,
    },

    /// Render a full page into the main surface's pixel buffer. `hold`
    /// keeps the surface referenced for the duration of the render and is
    /// released by the worker once the render gate opens.
    RenderMain {
        page: PageInfo,
        scale: f32,
        surface: Arc<MainSurface>,
        hold: SurfaceReference,
    },

    /// Stop the worker.
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn latch_delivers_to_multiple_waiters() {
        let latch = Arc::new(Latch::<u32>::new());
        let mut handles = Vec::new();
        for _ in 0..3 {
            let latch = latch.clone();
            handles.push(std::thread::spawn(move || latch.wait()));
        }
        std::thread::sleep(Duration::from_millis(20));
        latch.complete(Ok(7));
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), 7);
        }
    }

    #[test]
    fn latch_ignores_second_completion() {
        let latch = Latch::<u32>::new();
        latch.complete(Ok(1));
        latch.complete(Ok(2));
        assert_eq!(latch.wait().unwrap(), 1);
        assert!(latch.is_complete());
    }

    #[test]
    fn latch_propagates_errors() {
        let latch = Latch::<u32>::new();
        latch.complete(Err(RenderError::Disconnected));
        assert!(matches!(latch.wait(), Err(RenderError::Disconnected)));
    }
}
