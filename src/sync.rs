//! Small blocking synchronization primitives shared by the log writer and
//! the checkpoint copier.

use std::sync::{Arc, Condvar, Mutex};

/// Counting semaphore with RAII permits and an idle barrier.
#[derive(Debug)]
pub(crate) struct Semaphore {
    capacity: usize,
    available: Mutex<usize>,
    cvar: Condvar,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            capacity,
            available: Mutex::new(capacity),
            cvar: Condvar::new(),
        })
    }

    /// Blocks until a permit is available.
    pub fn acquire(self: &Arc<Self>) -> Permit {
        let mut available = self.available.lock().expect("semaphore poisoned");
        while *available == 0 {
            available = self.cvar.wait(available).expect("semaphore poisoned");
        }
        *available -= 1;
        Permit {
            sem: Arc::clone(self),
        }
    }

    /// Blocks until every permit has been returned.
    pub fn wait_idle(&self) {
        let mut available = self.available.lock().expect("semaphore poisoned");
        while *available != self.capacity {
            available = self.cvar.wait(available).expect("semaphore poisoned");
        }
    }

    fn release(&self) {
        let mut available = self.available.lock().expect("semaphore poisoned");
        *available += 1;
        debug_assert!(*available <= self.capacity);
        self.cvar.notify_all();
    }
}

#[derive(Debug)]
pub(crate) struct Permit {
    sem: Arc<Semaphore>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.sem.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn permits_bound_concurrency() {
        let sem = Semaphore::new(1);
        let first = sem.acquire();

        let sem2 = Arc::clone(&sem);
        let handle = thread::spawn(move || {
            let _p = sem2.acquire();
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        drop(first);
        handle.join().unwrap();
        sem.wait_idle();
    }

    #[test]
    fn wait_idle_returns_once_all_released() {
        let sem = Semaphore::new(2);
        {
            let _a = sem.acquire();
            let _b = sem.acquire();
        }
        sem.wait_idle();
    }
}
