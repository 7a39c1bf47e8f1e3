//! Per-document page cache
//!
//! Memoizes page descriptors and derived text layouts keyed by page
//! number. Entries are never evicted individually (the cache is bounded by
//! the page count) and live exactly as long as the document. Failures are
//! not cached: a failed resolution clears its entry so a later request can
//! retry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::RenderError;
use crate::raster::{PageInfo, TextLine};
use crate::request::Latch;

enum MemoEntry<T> {
    /// Resolution in flight; every concurrent request shares this latch.
    Pending(Arc<Latch<T>>),
    Ready(T),
}

/// Coalescing memo table keyed by page number.
struct MemoMap<T> {
    entries: Mutex<HashMap<usize, MemoEntry<T>>>,
}

impl<T: Clone> MemoMap<T> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value, join an in-flight resolution, or start a
    /// new one by calling `fire` with the latch the worker completes.
    fn resolve(
        &self,
        number: usize,
        fire: impl FnOnce(Arc<Latch<T>>) -> Result<(), RenderError>,
    ) -> Result<T, RenderError> {
        let (slot, owner) = {
            let mut entries = self.lock();
            match entries.get(&number) {
                Some(MemoEntry::Ready(value)) => return Ok(value.clone()),
                Some(MemoEntry::Pending(slot)) => (slot.clone(), false),
                None => {
                    let slot = Arc::new(Latch::new());
                    entries.insert(number, MemoEntry::Pending(slot.clone()));
                    (slot, true)
                }
            }
        };

        if owner {
            if let Err(err) = fire(slot.clone()) {
                self.lock().remove(&number);
                return Err(err);
            }
        }

        let result = slot.wait();

        if owner {
            let mut entries = self.lock();
            let still_ours = matches!(
                entries.get(&number),
                Some(MemoEntry::Pending(current)) if Arc::ptr_eq(current, &slot)
            );
            if still_ours {
                match &result {
                    Ok(value) => {
                        entries.insert(number, MemoEntry::Ready(value.clone()));
                    }
                    Err(_) => {
                        entries.remove(&number);
                    }
                }
            }
        }

        result
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<usize, MemoEntry<T>>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Page descriptors and derived artifacts for one document.
pub(crate) struct PageCache {
    pages: MemoMap<PageInfo>,
    text: MemoMap<Arc<Vec<TextLine>>>,
}

impl PageCache {
    pub(crate) fn new() -> Self {
        Self {
            pages: MemoMap::new(),
            text: MemoMap::new(),
        }
    }

    /// Resolve the descriptor for `number`, sharing any in-flight
    /// resolution.
    pub(crate) fn resolve_page(
        &self,
        number: usize,
        fire: impl FnOnce(Arc<Latch<PageInfo>>) -> Result<(), RenderError>,
    ) -> Result<PageInfo, RenderError> {
        self.pages.resolve(number, fire)
    }

    /// Resolve the text layout for `number`, sharing any in-flight
    /// resolution.
    pub(crate) fn resolve_text(
        &self,
        number: usize,
        fire: impl FnOnce(Arc<Latch<Arc<Vec<TextLine>>>>) -> Result<(), RenderError>,
    ) -> Result<Arc<Vec<TextLine>>, RenderError> {
        self.text.resolve(number, fire)
    }
}
