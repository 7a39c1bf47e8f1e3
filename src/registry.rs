//! Main-surface registry: reuse selection and grace-period eviction
//!
//! The registry owns, per page number, the set of main surfaces (full-page
//! renders at a fixed scale). Selection prefers an idle surface whose scale
//! is sufficient within a small tolerance; eviction happens only after a
//! surface's reference count has stayed at zero for the grace period.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};

use crate::config::EngineConfig;
use crate::refcount::{ReferenceManager, SurfaceReference};
use crate::request::Latch;
use crate::surface::RasterSurface;

/// A full-page raster at a fixed scale, shareable across section requests.
pub(crate) struct MainSurface {
    pub(crate) id: u64,
    pub(crate) page_number: usize,
    /// Immutable once created; a request with a smaller required scale may
    /// still reuse this surface.
    pub(crate) scale: f32,
    /// The worker holds the write lock exactly once, for the initial
    /// render. After `rendered` opens, all access is read-only.
    pub(crate) pixels: RwLock<RasterSurface>,
    pub(crate) manager: ReferenceManager,
    /// Opens when the surface contains valid pixels (or the render failed).
    pub(crate) rendered: Latch<()>,
    /// Token id of the current direct consumer, if any. A surface with an
    /// empty primary slot can be handed out whole ("main user" path).
    primary: Mutex<Option<u64>>,
    /// Bumped on every count transition; a pending eviction fires only if
    /// the generation it captured is still current.
    evict_generation: Arc<AtomicU64>,
}

impl MainSurface {
    fn primary_is_empty(&self) -> bool {
        self.primary
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_none()
    }
}

enum EvictionMsg {
    Schedule {
        page_number: usize,
        surface_id: u64,
        generation: u64,
        due: Instant,
    },
}

/// Outcome of surface selection for a `(page, scale)` request.
pub(crate) enum Acquired {
    /// An idle surface was claimed whole; the caller is now its primary
    /// user and crops visually itself.
    Main {
        surface: Arc<MainSurface>,
        reference: SurfaceReference,
    },
    /// All sufficient surfaces are busy; extract a secondary copy from
    /// this one. `hold` is the registry's temporary reference, released by
    /// the caller once its pixel copy completes.
    Busy {
        surface: Arc<MainSurface>,
        hold: SurfaceReference,
    },
    /// No surface satisfies the scale; a new main surface was registered
    /// with a zeroed buffer. The caller sends the render job carrying
    /// `hold`, which the worker releases once the render gate opens.
    Created {
        surface: Arc<MainSurface>,
        reference: SurfaceReference,
        hold: SurfaceReference,
    },
}

struct RegistryInner {
    surfaces: Mutex<HashMap<usize, Vec<Arc<MainSurface>>>>,
    evict_tx: Sender<EvictionMsg>,
    next_id: AtomicU64,
    config: EngineConfig,
}

/// Shared registry handle. Cloning is cheap.
#[derive(Clone)]
pub(crate) struct SurfaceRegistry {
    inner: Arc<RegistryInner>,
}

impl SurfaceRegistry {
    pub(crate) fn new(config: EngineConfig) -> Self {
        let (evict_tx, evict_rx) = flume::unbounded();
        let inner = Arc::new(RegistryInner {
            surfaces: Mutex::new(HashMap::new()),
            evict_tx,
            next_id: AtomicU64::new(1),
            config,
        });

        let weak = Arc::downgrade(&inner);
        std::thread::spawn(move || eviction_scheduler(&weak, &evict_rx));

        Self { inner }
    }

    /// Locate a reusable main surface for `(page_number, scale)`, or
    /// register a fresh one with a zeroed `width` x `height` buffer. One
    /// lock scope, so concurrent requests for the same page never create
    /// duplicate surfaces.
    ///
    /// Selection is deterministic and independent of map iteration order:
    /// among surfaces whose scale is sufficient within the tolerance,
    /// prefer one with an empty primary slot, then the smallest scale,
    /// then the lowest id.
    pub(crate) fn acquire_or_create(
        &self,
        page_number: usize,
        scale: f32,
        width: u32,
        height: u32,
    ) -> Acquired {
        let mut surfaces = self.lock_surfaces();

        let mut best: Option<(&Arc<MainSurface>, bool)> = None;
        for candidate in surfaces.get(&page_number).into_iter().flatten() {
            if candidate.scale + self.inner.config.scale_tolerance < scale {
                continue;
            }
            let idle = candidate.primary_is_empty();
            let better = match best {
                None => true,
                Some((current, current_idle)) => {
                    if idle != current_idle {
                        idle
                    } else if candidate.scale != current.scale {
                        candidate.scale < current.scale
                    } else {
                        candidate.id < current.id
                    }
                }
            };
            if better {
                best = Some((candidate, idle));
            }
        }

        match best.map(|(surface, idle)| (surface.clone(), idle)) {
            Some((surface, true)) => {
                let reference = self.claim_primary(&surface);
                Acquired::Main { surface, reference }
            }
            Some((surface, false)) => {
                let hold = surface.manager.retain();
                Acquired::Busy { surface, hold }
            }
            None => {
                let (surface, reference, hold) =
                    self.create_locked(&mut surfaces, page_number, scale, width, height);
                Acquired::Created {
                    surface,
                    reference,
                    hold,
                }
            }
        }
    }

    /// Create and register a new main surface. Returns the surface, the
    /// creator's primary reference, and the hold the render worker
    /// releases on completion.
    #[cfg(test)]
    pub(crate) fn create(
        &self,
        page_number: usize,
        scale: f32,
        width: u32,
        height: u32,
    ) -> (Arc<MainSurface>, SurfaceReference, SurfaceReference) {
        let mut surfaces = self.lock_surfaces();
        self.create_locked(&mut surfaces, page_number, scale, width, height)
    }

    fn create_locked(
        &self,
        surfaces: &mut HashMap<usize, Vec<Arc<MainSurface>>>,
        page_number: usize,
        scale: f32,
        width: u32,
        height: u32,
    ) -> (Arc<MainSurface>, SurfaceReference, SurfaceReference) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let surface = Arc::new(MainSurface {
            id,
            page_number,
            scale,
            pixels: RwLock::new(RasterSurface::new(width, height)),
            manager: ReferenceManager::new(),
            rendered: Latch::new(),
            primary: Mutex::new(None),
            evict_generation: Arc::new(AtomicU64::new(0)),
        });

        // Count transitions drive eviction: reaching zero schedules a
        // destruction after the grace period; any transition invalidates a
        // previously captured generation.
        let generation = surface.evict_generation.clone();
        let evict_tx = self.inner.evict_tx.clone();
        let grace = self.inner.config.eviction_grace;
        surface.manager.add_listener(move |count| {
            let current = generation.fetch_add(1, Ordering::SeqCst) + 1;
            if count == 0 {
                let _ = evict_tx.send(EvictionMsg::Schedule {
                    page_number,
                    surface_id: id,
                    generation: current,
                    due: Instant::now() + grace,
                });
            }
        });

        surfaces.entry(page_number).or_default().push(surface.clone());

        let primary = self.claim_primary(&surface);
        let hold = surface.manager.retain();
        log::debug!(
            "created main surface {id} for page {page_number} at scale {scale} ({width}x{height})"
        );
        (surface, primary, hold)
    }

    /// Take a primary reference on `surface` and occupy its primary slot
    /// until that reference is released.
    fn claim_primary(&self, surface: &Arc<MainSurface>) -> SurfaceReference {
        let mut reference = surface.manager.retain();
        let slot_owner = surface.clone();
        let token_id = reference.id();
        reference.on_release(move || {
            let mut primary = slot_owner
                .primary
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *primary == Some(token_id) {
                *primary = None;
            }
        });
        *surface
            .primary
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(token_id);
        reference
    }

    /// Remove a surface unconditionally (failed render). Idempotent.
    pub(crate) fn discard(&self, page_number: usize, surface_id: u64) {
        let mut surfaces = self.lock_surfaces();
        if let Some(list) = surfaces.get_mut(&page_number) {
            list.retain(|s| s.id != surface_id);
            if list.is_empty() {
                surfaces.remove(&page_number);
            }
            log::debug!("discarded main surface {surface_id} for page {page_number}");
        }
    }

    /// Destroy a surface whose count hit zero a grace period ago, unless a
    /// newer transition invalidated the captured generation.
    fn try_evict(&self, page_number: usize, surface_id: u64, generation: u64) {
        let mut surfaces = self.lock_surfaces();
        let Some(list) = surfaces.get_mut(&page_number) else {
            return;
        };
        let Some(pos) = list.iter().position(|s| s.id == surface_id) else {
            return;
        };
        let surface = &list[pos];
        if surface.evict_generation.load(Ordering::SeqCst) != generation
            || surface.manager.count() != 0
        {
            return;
        }
        list.remove(pos);
        if list.is_empty() {
            surfaces.remove(&page_number);
        }
        log::debug!("evicted main surface {surface_id} for page {page_number}");
    }

    /// Number of registered main surfaces for a page.
    #[cfg(test)]
    pub(crate) fn surface_count(&self, page_number: usize) -> usize {
        self.lock_surfaces()
            .get(&page_number)
            .map_or(0, std::vec::Vec::len)
    }

    fn lock_surfaces(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<usize, Vec<Arc<MainSurface>>>> {
        self.inner
            .surfaces
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Scheduler loop: sleeps until the earliest pending deadline, then asks
/// the registry to evict. Exits when the registry is gone.
fn eviction_scheduler(registry: &Weak<RegistryInner>, rx: &Receiver<EvictionMsg>) {
    let mut pending: BinaryHeap<Reverse<(Instant, usize, u64, u64)>> = BinaryHeap::new();

    loop {
        let now = Instant::now();
        while let Some(Reverse((due, page, id, generation))) = pending.peek().copied() {
            if due > now {
                break;
            }
            pending.pop();
            let Some(inner) = registry.upgrade() else {
                return;
            };
            SurfaceRegistry { inner }.try_evict(page, id, generation);
        }

        let timeout = pending
            .peek()
            .map_or(Duration::from_millis(500), |Reverse((due, ..))| {
                due.saturating_duration_since(Instant::now())
                    .min(Duration::from_millis(500))
            });

        match rx.recv_timeout(timeout) {
            Ok(EvictionMsg::Schedule {
                page_number,
                surface_id,
                generation,
                due,
            }) => {
                pending.push(Reverse((due, page_number, surface_id, generation)));
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                if registry.upgrade().is_none() {
                    return;
                }
            }
            Err(flume::RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry(grace: Duration) -> SurfaceRegistry {
        SurfaceRegistry::new(EngineConfig {
            scale_tolerance: 0.001,
            eviction_grace: grace,
        })
    }

    fn complete(surface: &Arc<MainSurface>) {
        surface.rendered.complete(Ok(()));
    }

    #[test]
    fn first_request_registers_a_surface() {
        let registry = test_registry(Duration::from_secs(10));
        match registry.acquire_or_create(0, 1.0, 10, 10) {
            Acquired::Created {
                surface,
                reference,
                hold,
            } => {
                assert_eq!(surface.page_number, 0);
                assert_eq!(registry.surface_count(0), 1);
                hold.release().unwrap();
                reference.release().unwrap();
            }
            _ => panic!("expected creation"),
        }
    }

    #[test]
    fn idle_surface_is_claimed_as_main() {
        let registry = test_registry(Duration::from_secs(10));
        let (surface, primary, hold) = registry.create(3, 2.0, 100, 100);
        complete(&surface);
        hold.release().unwrap();
        primary.release().unwrap();

        match registry.acquire_or_create(3, 1.5, 100, 100) {
            Acquired::Main { surface, reference } => {
                assert_eq!(surface.page_number, 3);
                assert!(!surface.primary_is_empty());
                reference.release().unwrap();
                assert!(surface.primary_is_empty());
            }
            _ => panic!("expected main-user path"),
        }
    }

    #[test]
    fn busy_surface_falls_back_to_extraction() {
        let registry = test_registry(Duration::from_secs(10));
        let (surface, primary, hold) = registry.create(0, 1.0, 10, 10);
        complete(&surface);
        hold.release().unwrap();

        match registry.acquire_or_create(0, 1.0, 10, 10) {
            Acquired::Busy { surface, hold } => {
                assert_eq!(surface.id, 1);
                hold.release().unwrap();
            }
            _ => panic!("expected busy fallback"),
        }
        primary.release().unwrap();
    }

    #[test]
    fn smaller_scale_never_serves_larger_request() {
        let registry = test_registry(Duration::from_secs(10));
        let (surface, primary, hold) = registry.create(0, 1.0, 10, 10);
        complete(&surface);
        hold.release().unwrap();
        primary.release().unwrap();

        match registry.acquire_or_create(0, 2.0, 20, 20) {
            Acquired::Created {
                surface,
                reference,
                hold,
            } => {
                assert_eq!(surface.scale, 2.0);
                hold.release().unwrap();
                reference.release().unwrap();
            }
            _ => panic!("a smaller-scale surface must not be reused"),
        }
        // within tolerance is allowed
        match registry.acquire_or_create(0, 1.0005, 10, 10) {
            Acquired::Main { reference, .. } => reference.release().unwrap(),
            _ => panic!("tolerance should admit the surface"),
        }
    }

    #[test]
    fn selection_prefers_idle_then_smallest_scale() {
        let registry = test_registry(Duration::from_secs(10));
        let (s1, p1, h1) = registry.create(0, 3.0, 10, 10);
        let (s2, p2, h2) = registry.create(0, 2.0, 10, 10);
        complete(&s1);
        complete(&s2);
        h1.release().unwrap();
        h2.release().unwrap();
        // only the larger-scale surface is idle
        p1.release().unwrap();

        match registry.acquire_or_create(0, 1.0, 10, 10) {
            Acquired::Main { surface, reference } => {
                assert_eq!(surface.id, s1.id);
                reference.release().unwrap();
            }
            _ => panic!("expected the idle surface"),
        }
        p2.release().unwrap();

        // both idle now: the smaller sufficient scale wins
        match registry.acquire_or_create(0, 1.0, 10, 10) {
            Acquired::Main { surface, reference } => {
                assert_eq!(surface.id, s2.id);
                reference.release().unwrap();
            }
            _ => panic!("expected the smaller-scale surface"),
        }
    }

    #[test]
    fn eviction_waits_for_grace_period() {
        let registry = test_registry(Duration::from_millis(50));
        let (surface, primary, hold) = registry.create(0, 1.0, 10, 10);
        complete(&surface);
        hold.release().unwrap();
        primary.release().unwrap();

        assert_eq!(registry.surface_count(0), 1);
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(registry.surface_count(0), 0);
    }

    #[test]
    fn new_reference_cancels_pending_eviction() {
        let registry = test_registry(Duration::from_millis(100));
        let (surface, primary, hold) = registry.create(0, 1.0, 10, 10);
        complete(&surface);
        hold.release().unwrap();
        primary.release().unwrap();

        // retake before the grace period elapses
        std::thread::sleep(Duration::from_millis(20));
        let keep = surface.manager.retain();
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(registry.surface_count(0), 1);
        keep.release().unwrap();
    }

    #[test]
    fn discard_removes_unconditionally() {
        let registry = test_registry(Duration::from_secs(10));
        let (surface, primary, hold) = registry.create(0, 1.0, 10, 10);
        registry.discard(0, surface.id);
        assert_eq!(registry.surface_count(0), 0);
        hold.release().unwrap();
        primary.release().unwrap();
    }

    #[test]
    fn stale_generation_does_not_evict() {
        let registry = test_registry(Duration::from_secs(10));
        let (surface, primary, hold) = registry.create(0, 1.0, 10, 10);
        complete(&surface);
        let stale = surface.evict_generation.load(Ordering::SeqCst);
        hold.release().unwrap();
        registry.try_evict(0, surface.id, stale);
        assert_eq!(registry.surface_count(0), 1);
        primary.release().unwrap();
    }
}
