//! Type-indexed pool registry with tracked fallback allocation.
//!
//! The [`Allocator`] owns one canonical [`ObjectPool`] per pooled type and a
//! tracked allocation path for everything else. Tracked allocations are
//! recorded in an id → size map so that [`Allocator::check_leaks`] can report
//! what was never returned. Byte and count statistics are atomics and can be
//! read at any time through [`Allocator::stats`].
//!
//! # Example
//!
//! ```
//! use kestrel_ecs::allocator::{Allocator, AllocatorConfig};
//!
//! let alloc = Allocator::new(AllocatorConfig::default());
//! alloc.prewarm_entities(32);
//!
//! let block = alloc.allocate([0u8; 64]).unwrap();
//! assert_eq!(alloc.stats().current_usage, 64);
//! alloc.deallocate(block);
//! assert!(alloc.check_leaks().is_none());
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::component::short_type_name;
use crate::entity::Entity;
use crate::pool::{ObjectPool, Poolable};
use crate::transform::Transform;
use crate::EcsError;

/// Capacity used for auto-created pools when none is configured.
pub const DEFAULT_POOL_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// AllocatorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Initial capacity of pools created without an explicit size.
    pub default_pool_capacity: usize,
    /// Record every tracked allocation for leak reporting.
    pub track_allocations: bool,
    /// When false, pool requests fall back to fresh instances.
    pub use_pools: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            default_pool_capacity: DEFAULT_POOL_CAPACITY,
            track_allocations: true,
            use_pools: true,
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStats
// ---------------------------------------------------------------------------

/// Point-in-time copy of the allocator's counters. Sizes are bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub total_allocated: usize,
    pub total_deallocated: usize,
    pub current_usage: usize,
    pub peak_usage: usize,
    pub allocation_count: usize,
    pub deallocation_count: usize,
}

#[derive(Debug, Default)]
struct MemoryCounters {
    total_allocated: AtomicUsize,
    total_deallocated: AtomicUsize,
    current_usage: AtomicUsize,
    peak_usage: AtomicUsize,
    allocation_count: AtomicUsize,
    deallocation_count: AtomicUsize,
}

impl MemoryCounters {
    fn record_alloc(&self, size: usize) {
        self.total_allocated.fetch_add(size, Ordering::Relaxed);
        let current = self.current_usage.fetch_add(size, Ordering::AcqRel) + size;
        self.peak_usage.fetch_max(current, Ordering::AcqRel);
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_free(&self, size: usize) {
        self.total_deallocated.fetch_add(size, Ordering::Relaxed);
        let _ = self
            .current_usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(size))
            });
        self.deallocation_count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MemoryStats {
        MemoryStats {
            total_allocated: self.total_allocated.load(Ordering::Relaxed),
            total_deallocated: self.total_deallocated.load(Ordering::Relaxed),
            current_usage: self.current_usage.load(Ordering::Acquire),
            peak_usage: self.peak_usage.load(Ordering::Acquire),
            allocation_count: self.allocation_count.load(Ordering::Relaxed),
            deallocation_count: self.deallocation_count.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.total_allocated,
            &self.total_deallocated,
            &self.current_usage,
            &self.peak_usage,
            &self.allocation_count,
            &self.deallocation_count,
        ] {
            counter.store(0, Ordering::Release);
        }
    }
}

// ---------------------------------------------------------------------------
// LeakReport
// ---------------------------------------------------------------------------

/// Tracked allocations still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakReport {
    pub count: usize,
    pub bytes: usize,
}

// ---------------------------------------------------------------------------
// Tracked
// ---------------------------------------------------------------------------

/// A value allocated through [`Allocator::allocate`].
///
/// Return it with [`Allocator::deallocate`]. Dropping it directly frees the
/// memory but leaves the tracking entry behind, which shows up as a leak.
#[derive(Debug)]
pub struct Tracked<T> {
    id: u64,
    value: Box<[T; 1]>,
}

impl<T> Tracked<T> {
    pub fn allocation_id(&self) -> u64 {
        self.id
    }

    pub fn into_inner(self) -> T {
        let [value] = *self.value;
        value
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value[0]
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value[0]
    }
}

// ---------------------------------------------------------------------------
// Allocator
// ---------------------------------------------------------------------------

type ErasedPool = Arc<dyn Any + Send + Sync>;

pub struct Allocator {
    config: AllocatorConfig,
    pools: Mutex<HashMap<TypeId, ErasedPool>>,
    tracked: Mutex<HashMap<u64, usize>>,
    next_allocation: AtomicU64,
    stats: MemoryCounters,
    use_pools: AtomicBool,
}

impl Allocator {
    pub fn new(config: AllocatorConfig) -> Self {
        let use_pools = config.use_pools;
        Self {
            config,
            pools: Mutex::new(HashMap::new()),
            tracked: Mutex::new(HashMap::new()),
            next_allocation: AtomicU64::new(1),
            stats: MemoryCounters::default(),
            use_pools: AtomicBool::new(use_pools),
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Create the entity pool at half and the transform pool at full
    /// default capacity.
    pub fn initialize_pools(&self) {
        let capacity = self.config.default_pool_capacity;
        self.pool_with_capacity::<Box<Entity>>((capacity / 2).max(1));
        self.pool_with_capacity::<Arc<Transform>>(capacity);
        info!(
            entities = (capacity / 2).max(1),
            transforms = capacity,
            "object pools initialized"
        );
    }

    // -- pools ----------------------------------------------------------------

    /// The canonical pool for `T`, created at the default capacity on first
    /// use.
    pub fn pool<T: Poolable>(&self) -> Arc<ObjectPool<T>> {
        self.pool_with_capacity(0)
    }

    /// The canonical pool for `T`, created with `capacity` on first use
    /// (`0` means the configured default). An existing pool is returned
    /// unchanged.
    pub fn pool_with_capacity<T: Poolable>(&self, capacity: usize) -> Arc<ObjectPool<T>> {
        let mut pools = self.pools.lock();
        if let Some(existing) = pools.get(&TypeId::of::<T>()) {
            if let Ok(pool) = Arc::clone(existing).downcast::<ObjectPool<T>>() {
                return pool;
            }
        }
        let capacity = if capacity == 0 {
            self.config.default_pool_capacity
        } else {
            capacity
        };
        let pool = Arc::new(ObjectPool::<T>::new(capacity));
        pools.insert(TypeId::of::<T>(), pool.clone() as ErasedPool);
        debug!(
            pool = short_type_name(std::any::type_name::<T>()),
            capacity, "object pool created"
        );
        pool
    }

    /// Whether a pool for `T` exists yet.
    pub fn has_pool<T: Poolable>(&self) -> bool {
        self.pools.lock().contains_key(&TypeId::of::<T>())
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    pub fn set_use_pools(&self, enabled: bool) {
        self.use_pools.store(enabled, Ordering::Release);
    }

    pub fn uses_pools(&self) -> bool {
        self.use_pools.load(Ordering::Acquire)
    }

    /// Take a `T` from its pool, or build a fresh one when pools are off.
    pub fn acquire_from_pool<T: Poolable>(&self) -> T {
        if self.uses_pools() {
            self.pool::<T>().acquire()
        } else {
            self.stats.record_alloc(std::mem::size_of::<T>());
            T::create()
        }
    }

    /// Counterpart to [`acquire_from_pool`](Self::acquire_from_pool).
    pub fn release_to_pool<T: Poolable>(&self, item: T) {
        if self.uses_pools() {
            self.pool::<T>().release(item);
        } else {
            self.stats.record_free(std::mem::size_of::<T>());
            drop(item);
        }
    }

    /// Account for a pooled `T` that left circulation without a release.
    pub fn forget_pooled<T: Poolable>(&self) {
        if self.uses_pools() {
            self.pool::<T>().forget();
        } else {
            self.stats.record_free(std::mem::size_of::<T>());
        }
    }

    /// Grow the entity pool to at least `n` instances.
    pub fn prewarm_entities(&self, n: usize) {
        self.pool_with_capacity::<Box<Entity>>(n).reserve(n);
    }

    /// Grow the transform component pool to at least `n` instances.
    pub fn prewarm_components(&self, n: usize) {
        self.pool_with_capacity::<Arc<Transform>>(n).reserve(n);
    }

    // -- tracked allocation ---------------------------------------------------

    /// Move `value` into a fresh heap allocation and track it.
    ///
    /// Fails with [`EcsError::AllocFailure`] instead of aborting when the
    /// system allocator refuses the request.
    pub fn allocate<T>(&self, value: T) -> Result<Tracked<T>, EcsError> {
        let size = std::mem::size_of::<T>();
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(1)
            .map_err(|_| EcsError::AllocFailure {
                type_name: short_type_name(std::any::type_name::<T>()),
                size,
            })?;
        storage.push(value);
        let value: Box<[T; 1]> =
            storage
                .into_boxed_slice()
                .try_into()
                .map_err(|_| EcsError::AllocFailure {
                    type_name: short_type_name(std::any::type_name::<T>()),
                    size,
                })?;

        let id = self.next_allocation.fetch_add(1, Ordering::Relaxed);
        if self.config.track_allocations {
            self.tracked.lock().insert(id, size);
        }
        self.stats.record_alloc(size);
        Ok(Tracked { id, value })
    }

    /// Release a tracked allocation.
    pub fn deallocate<T>(&self, tracked: Tracked<T>) {
        let size = std::mem::size_of::<T>();
        if self.config.track_allocations && self.tracked.lock().remove(&tracked.id).is_none() {
            warn!(allocation = tracked.id, "deallocating untracked allocation");
        }
        self.stats.record_free(size);
        drop(tracked);
    }

    /// Allocate `count` default values; all-or-nothing.
    pub fn allocate_batch<T: Default>(&self, count: usize) -> Result<Vec<Tracked<T>>, EcsError> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            match self.allocate(T::default()) {
                Ok(t) => out.push(t),
                Err(err) => {
                    self.deallocate_batch(out);
                    return Err(err);
                }
            }
        }
        Ok(out)
    }

    pub fn deallocate_batch<T>(&self, batch: Vec<Tracked<T>>) {
        for tracked in batch {
            self.deallocate(tracked);
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }

    // -- diagnostics ----------------------------------------------------------

    pub fn stats(&self) -> MemoryStats {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Report outstanding tracked allocations, logging when there are any.
    pub fn check_leaks(&self) -> Option<LeakReport> {
        if !self.config.track_allocations {
            return None;
        }
        let tracked = self.tracked.lock();
        if tracked.is_empty() {
            return None;
        }
        let report = LeakReport {
            count: tracked.len(),
            bytes: tracked.values().sum(),
        };
        warn!(
            leaked = report.count,
            bytes = report.bytes,
            "tracked allocations still outstanding"
        );
        Some(report)
    }

    /// Sanity check on the counters: current usage never above peak and
    /// never more frees than allocations.
    pub fn validate(&self) -> bool {
        let s = self.stats();
        s.current_usage <= s.peak_usage && s.deallocation_count <= s.allocation_count
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(AllocatorConfig::default())
    }
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("config", &self.config)
            .field("pools", &self.pool_count())
            .field("tracked", &self.tracked_count())
            .field("stats", &self.stats())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
