use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Blocking counting semaphore bounding how many runs are in flight.
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    cv: Condvar,
}

/// Returns its permit on drop, so a panicking run cannot leak one.
pub(crate) struct Permit<'a> {
    sem: &'a Semaphore,
    /// Time spent waiting for the permit.
    pub(crate) waited: Duration,
}

impl Semaphore {
    /// `permits` is clamped to at least one.
    pub(crate) fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits.max(1)),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.permits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn acquire(&self) -> Permit<'_> {
        let start = Instant::now();
        let mut waited = false;
        let mut g = self.lock();
        while *g == 0 {
            waited = true;
            g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
        *g -= 1;
        Permit {
            sem: self,
            waited: if waited { start.elapsed() } else { Duration::ZERO },
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut g = self.sem.lock();
        *g += 1;
        self.sem.cv.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permits_return_on_drop() {
        let sem = Semaphore::new(1);
        {
            let p = sem.acquire();
            assert_eq!(p.waited, Duration::ZERO);
        }
        let _again = sem.acquire();
        assert_eq!(*sem.lock(), 0);
    }

    #[test]
    fn zero_permits_is_clamped() {
        let sem = Semaphore::new(0);
        let _p = sem.acquire();
    }
}
