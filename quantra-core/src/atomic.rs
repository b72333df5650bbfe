//! Lock-free `f64` cell built on `AtomicU64` bit patterns.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic double for hot-path P&L aggregates.
///
/// Add and max are compare-and-set retry loops; contention on these cells is
/// low (one writer per fill, readers on every pre-trade check).
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[must_use]
    pub fn load(&self, ordering: Ordering) -> f64 {
        f64::from_bits(self.0.load(ordering))
    }

    pub fn store(&self, value: f64, ordering: Ordering) {
        self.0.store(value.to_bits(), ordering);
    }

    /// Add `delta`, returning the previous value.
    pub fn fetch_add(&self, delta: f64, ordering: Ordering) -> f64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, ordering, Ordering::Relaxed)
            {
                Ok(previous) => return f64::from_bits(previous),
                Err(actual) => current = actual,
            }
        }
    }

    /// Raise the cell to `value` if it is larger, returning the previous value.
    pub fn fetch_max(&self, value: f64, ordering: Ordering) -> f64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let observed = f64::from_bits(current);
            if value <= observed {
                return observed;
            }
            match self.0.compare_exchange_weak(
                current,
                value.to_bits(),
                ordering,
                Ordering::Relaxed,
            ) {
                Ok(previous) => return f64::from_bits(previous),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fetch_add_accumulates() {
        let cell = AtomicF64::new(1.5);
        assert_eq!(cell.fetch_add(2.0, Ordering::Relaxed), 1.5);
        assert_eq!(cell.load(Ordering::Relaxed), 3.5);
    }

    #[test]
    fn fetch_max_is_monotone() {
        let cell = AtomicF64::new(10.0);
        cell.fetch_max(5.0, Ordering::Relaxed);
        assert_eq!(cell.load(Ordering::Relaxed), 10.0);
        cell.fetch_max(12.5, Ordering::Relaxed);
        assert_eq!(cell.load(Ordering::Relaxed), 12.5);
    }

    #[test]
    fn concurrent_adds_do_not_lose_updates() {
        let cell = Arc::new(AtomicF64::new(0.0));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        cell.fetch_add(1.0, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }
        assert_eq!(cell.load(Ordering::Relaxed), 4000.0);
    }
}
