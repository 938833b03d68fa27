//! Lightweight counting semaphore for the wait back-off strategy.
//!
//! The permit count lives in an atomic so uncontended posts and waits
//! never touch the kernel; only a wait that finds no permit falls back to
//! the mutex/condvar pair.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

pub(crate) struct Semaphore {
    /// Available permits; negative values count threads gone to sleep.
    count: CachePadded<AtomicIsize>,
    /// Wakeups handed out by posters but not yet consumed by sleepers.
    wakeups: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub(crate) fn new(permits: isize) -> Self {
        Self {
            count: CachePadded::new(AtomicIsize::new(permits)),
            wakeups: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    fn lock_wakeups(&self) -> MutexGuard<'_, usize> {
        self.wakeups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Releases one permit, waking a sleeping waiter if any.
    pub(crate) fn post(&self) {
        let previous = self.count.fetch_add(1, Ordering::Release);
        if previous < 0 {
            let mut wakeups = self.lock_wakeups();
            *wakeups += 1;
            self.cond.notify_one();
        }
    }

    /// Acquires one permit, blocking until one is posted.
    pub(crate) fn wait(&self) {
        let previous = self.count.fetch_sub(1, Ordering::Acquire);
        if previous > 0 {
            return;
        }

        let mut wakeups = self.lock_wakeups();
        while *wakeups == 0 {
            wakeups = self
                .cond
                .wait(wakeups)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *wakeups -= 1;
    }

    /// Acquires one permit only if one is immediately available.
    pub(crate) fn try_wait(&self) -> bool {
        let mut current = self.count.load(Ordering::Relaxed);
        while current > 0 {
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_posted_permits_are_consumed_without_blocking() {
        let sem = Semaphore::new(0);
        sem.post();
        sem.post();
        sem.wait();
        sem.wait();
        assert!(!sem.try_wait());
    }

    #[test]
    fn test_try_wait_does_not_go_negative() {
        let sem = Semaphore::new(1);
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
        assert!(!sem.try_wait());
        sem.post();
        assert!(sem.try_wait());
    }

    #[test]
    fn test_post_wakes_blocked_waiter() {
        let sem = Arc::new(Semaphore::new(0));
        let woke = Arc::new(AtomicBool::new(false));

        let waiter = {
            let sem = sem.clone();
            let woke = woke.clone();
            thread::spawn(move || {
                sem.wait();
                woke.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!woke.load(Ordering::SeqCst));

        sem.post();
        waiter.join().unwrap();
        assert!(woke.load(Ordering::SeqCst));
    }

    #[test]
    fn test_many_waiters_many_posts() {
        const WAITERS: usize = 4;
        let sem = Arc::new(Semaphore::new(0));

        let handles: Vec<_> = (0..WAITERS)
            .map(|_| {
                let sem = sem.clone();
                thread::spawn(move || sem.wait())
            })
            .collect();

        for _ in 0..WAITERS {
            sem.post();
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!sem.try_wait());
    }
}
