//! Pre-allocated object recycling for hot-path types.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::{Fill, Order};

/// Typed pool that hands out instances of `T` without touching the global
/// allocator on the hot path.
///
/// The free list grows in blocks of `block_size` and never shrinks. The pool
/// value itself is a cheap handle; clones share the same free list. Handles
/// release their slot back to the pool on drop, in default state.
pub struct ObjectPool<T> {
    shared: Arc<PoolShared<T>>,
}

struct PoolShared<T> {
    state: Mutex<PoolState<T>>,
    block_size: usize,
}

struct PoolState<T> {
    free: Vec<T>,
    total: usize,
}

impl<T> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Default> ObjectPool<T> {
    /// Create a pool growing in blocks of `block_size` objects.
    ///
    /// # Panics
    ///
    /// Panics when `block_size` is zero.
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        assert!(block_size > 0, "pool block size must be positive");
        let pool = Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    free: Vec::new(),
                    total: 0,
                }),
                block_size,
            }),
        };
        pool.shared.grow();
        pool
    }

    /// Take an object out of the pool, growing it when the free list is dry.
    #[must_use]
    pub fn acquire(&self) -> PoolHandle<T> {
        let value = loop {
            let mut state = self.shared.state.lock();
            if let Some(value) = state.free.pop() {
                break value;
            }
            drop(state);
            self.shared.grow();
        };
        PoolHandle {
            value: Some(value),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Objects currently held by live handles.
    #[must_use]
    pub fn in_use(&self) -> usize {
        let state = self.shared.state.lock();
        state.total - state.free.len()
    }

    /// Objects sitting in the free list.
    #[must_use]
    pub fn available(&self) -> usize {
        self.shared.state.lock().free.len()
    }

    /// Total objects ever allocated by this pool.
    #[must_use]
    pub fn total_allocated(&self) -> usize {
        self.shared.state.lock().total
    }
}

impl<T: Default> PoolShared<T> {
    fn grow(&self) {
        let mut state = self.state.lock();
        state.free.reserve(self.block_size);
        for _ in 0..self.block_size {
            state.free.push(T::default());
        }
        state.total += self.block_size;
    }
}

/// Owning handle to a pooled object; the slot returns to the pool on drop.
pub struct PoolHandle<T: Default> {
    value: Option<T>,
    shared: Arc<PoolShared<T>>,
}

impl<T: Default> PoolHandle<T> {
    /// Detach the value from the pool permanently.
    #[must_use]
    pub fn take(mut self) -> T {
        self.value.take().expect("pool handle already taken")
    }
}

impl<T: Default> Deref for PoolHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("pool handle value present")
    }
}

impl<T: Default> DerefMut for PoolHandle<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("pool handle value present")
    }
}

impl<T: Default> Drop for PoolHandle<T> {
    fn drop(&mut self) {
        // The slot comes back in default state, like destroy-and-reconstruct.
        if self.value.take().is_some() {
            self.shared.state.lock().free.push(T::default());
        }
    }
}

const ORDER_POOL_BLOCK: usize = 2048;
const FILL_POOL_BLOCK: usize = 2048;

static ORDER_POOL: Lazy<ObjectPool<Order>> = Lazy::new(|| ObjectPool::new(ORDER_POOL_BLOCK));
static FILL_POOL: Lazy<ObjectPool<Fill>> = Lazy::new(|| ObjectPool::new(FILL_POOL_BLOCK));

/// Process-wide pool for [`Order`] scratch values.
#[must_use]
pub fn order_pool() -> &'static ObjectPool<Order> {
    &ORDER_POOL
}

/// Process-wide pool for [`Fill`] scratch values.
#[must_use]
pub fn fill_pool() -> &'static ObjectPool<Fill> {
    &FILL_POOL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_round_trip() {
        let pool: ObjectPool<Vec<u8>> = ObjectPool::new(4);
        assert_eq!(pool.available(), 4);
        {
            let mut handle = pool.acquire();
            handle.push(1);
            assert_eq!(pool.in_use(), 1);
            assert_eq!(pool.available(), 3);
        }
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), 4);
        // Released slots come back in default state.
        let handle = pool.acquire();
        assert!(handle.is_empty());
    }

    #[test]
    fn pool_grows_in_blocks_and_never_shrinks() {
        let pool: ObjectPool<u64> = ObjectPool::new(2);
        let handles: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        assert_eq!(pool.in_use(), 5);
        assert!(pool.total_allocated() >= 6);
        drop(handles);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), pool.total_allocated());
    }

    #[test]
    fn take_detaches_from_the_pool() {
        let pool: ObjectPool<u64> = ObjectPool::new(2);
        let total = pool.total_allocated();
        let value = pool.acquire().take();
        assert_eq!(value, 0);
        assert_eq!(pool.in_use(), 1, "taken slot is never returned");
        assert_eq!(pool.total_allocated(), total);
    }

    #[test]
    fn clones_share_one_free_list() {
        let pool: ObjectPool<u64> = ObjectPool::new(4);
        let sibling = pool.clone();
        let handle = pool.acquire();
        assert_eq!(sibling.in_use(), 1);
        drop(handle);
        assert_eq!(sibling.in_use(), 0);
    }
}
