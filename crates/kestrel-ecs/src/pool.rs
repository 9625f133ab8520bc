//! Pre-sized, thread-safe reservoirs of reusable objects.
//!
//! An [`ObjectPool`] creates its whole capacity up front and hands instances
//! out of a FIFO free list. Released instances are reset through
//! [`Poolable::reset`] and queued again. If the free list runs dry the pool
//! grows by one instance instead of failing; growth is logged.
//!
//! Pooled values are moved in and out by value. For heap-backed types such as
//! `Box<T>` or `Arc<T>` that means the same allocation travels back and forth,
//! so after pre-warming, acquire/release performs no heap traffic.
//!
//! # Example
//!
//! ```
//! use kestrel_ecs::pool::{ObjectPool, Poolable};
//!
//! #[derive(Default)]
//! struct Particle { life: f32 }
//!
//! impl Poolable for Box<Particle> {
//!     fn create() -> Self { Box::default() }
//!     fn reset(&mut self) { self.life = 0.0; }
//! }
//!
//! let pool: ObjectPool<Box<Particle>> = ObjectPool::new(2);
//! let mut p = pool.acquire();
//! p.life = 1.0;
//! pool.release(p);
//! assert_eq!(pool.in_use(), 0);
//! assert_eq!(pool.total_created(), 2);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::component::short_type_name;
use crate::entity::Entity;
use crate::transform::Transform;

// ---------------------------------------------------------------------------
// Poolable
// ---------------------------------------------------------------------------

/// Types that can live in an [`ObjectPool`].
pub trait Poolable: Send + Sized + 'static {
    /// Build a fresh instance for the backing storage.
    fn create() -> Self;

    /// Return a released instance to a reusable state.
    fn reset(&mut self) {}
}

/// Pooled entities are cleared, keeping their component list capacity.
impl Poolable for Box<Entity> {
    fn create() -> Self {
        Box::new(Entity::new(""))
    }

    fn reset(&mut self) {
        self.recycle();
    }
}

/// Pooled transforms are detached, reactivated and reset to identity.
impl Poolable for Arc<Transform> {
    fn create() -> Self {
        Arc::new(Transform::pooled())
    }

    fn reset(&mut self) {
        self.recycle();
    }
}

// ---------------------------------------------------------------------------
// ObjectPool
// ---------------------------------------------------------------------------

/// Thread-safe pool of `T` instances.
///
/// `acquire`, `release` and `reserve` serialize on one mutex. The `in_use`
/// and `total_created` counters are atomics and can be read without it.
/// Releasing an instance that was not acquired from this pool breaks the
/// counter invariant `in_use + available == total_created`.
pub struct ObjectPool<T: Poolable> {
    free: Mutex<VecDeque<T>>,
    capacity: AtomicUsize,
    in_use: AtomicUsize,
    total_created: AtomicUsize,
    warned_growth: AtomicBool,
}

impl<T: Poolable> ObjectPool<T> {
    /// Create a pool and eagerly build `capacity` instances.
    pub fn new(capacity: usize) -> Self {
        let free: VecDeque<T> = (0..capacity).map(|_| T::create()).collect();
        Self {
            free: Mutex::new(free),
            capacity: AtomicUsize::new(capacity),
            in_use: AtomicUsize::new(0),
            total_created: AtomicUsize::new(capacity),
            warned_growth: AtomicBool::new(false),
        }
    }

    /// Take an instance, growing the pool by one if none is available.
    #[must_use]
    pub fn acquire(&self) -> T {
        let mut free = self.free.lock();
        let item = match free.pop_front() {
            Some(item) => item,
            None => {
                let total = self.total_created.fetch_add(1, Ordering::AcqRel) + 1;
                self.log_growth(total);
                T::create()
            }
        };
        self.in_use.fetch_add(1, Ordering::AcqRel);
        item
    }

    /// Reset `item` and return it to the free list.
    pub fn release(&self, mut item: T) {
        item.reset();
        let mut free = self.free.lock();
        free.push_back(item);
        // Saturating so a stray foreign release cannot wrap the counter.
        let _ = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
    }

    /// Write off an acquired instance that will never be released, keeping
    /// `in_use + available == total_created`.
    pub fn forget(&self) {
        let _free = self.free.lock();
        let _ = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
        let _ = self
            .total_created
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
    }

    /// Ensure at least `n` instances exist in total. Never shrinks.
    pub fn reserve(&self, n: usize) {
        let mut free = self.free.lock();
        let total = self.total_created.load(Ordering::Acquire);
        if n > total {
            let extra = n - total;
            free.reserve(extra);
            free.extend((0..extra).map(|_| T::create()));
            self.total_created.store(n, Ordering::Release);
            debug!(pool = Self::type_label(), added = extra, total = n, "pool reserved");
        }
        self.capacity.fetch_max(n, Ordering::AcqRel);
    }

    // -- accessors ------------------------------------------------------------

    #[inline]
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    #[inline]
    pub fn total_created(&self) -> usize {
        self.total_created.load(Ordering::Acquire)
    }

    /// Instances currently on the free list.
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Requested capacity (initial size or the largest reservation).
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// `in_use / total_created`, or 0 for an empty pool.
    pub fn utilization(&self) -> f32 {
        let total = self.total_created();
        if total == 0 {
            0.0
        } else {
            self.in_use() as f32 / total as f32
        }
    }

    fn type_label() -> &'static str {
        short_type_name(std::any::type_name::<T>())
    }

    fn log_growth(&self, total: usize) {
        let capacity = self.capacity();
        if !self.warned_growth.swap(true, Ordering::Relaxed) {
            warn!(
                pool = Self::type_label(),
                capacity,
                total,
                "object pool exhausted, growing past capacity"
            );
        } else {
            debug!(pool = Self::type_label(), capacity, total, "object pool grew");
        }
    }
}

impl<T: Poolable> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("type", &Self::type_label())
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .field("total_created", &self.total_created())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
