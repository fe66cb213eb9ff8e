//! A minimal reentrant mutex.
//!
//! `std` has no stable reentrant lock, but [`crate::manager::Manager`] needs
//! one: the clock thread calls into `Inner::tick`, which may call a tick
//! component's `stop()`, which may itself call back into the `Manager` (e.g. a
//! `Sequencer` reaching its end and notifying, whose notifier handler turns
//! around and calls `Manager::stop`) while the tick's own lock is still held
//! (§9 Design Notes). A plain `std::sync::Mutex` would deadlock the clock
//! thread against itself in that case.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

struct LockState {
    owner: Option<ThreadId>,
    count: usize,
}

pub struct ReentrantMutex<T> {
    state: Mutex<LockState>,
    cvar: Condvar,
    data: UnsafeCell<T>,
}

// Safety: `data` is only ever accessed through a `ReentrantGuard`, and
// `state` serializes which thread may hold one at a time (recursively, on the
// owning thread only).
unsafe impl<T: Send> Send for ReentrantMutex<T> {}
unsafe impl<T: Send> Sync for ReentrantMutex<T> {}

impl<T> ReentrantMutex<T> {
    pub fn new(value: T) -> Self {
        ReentrantMutex {
            state: Mutex::new(LockState {
                owner: None,
                count: 0,
            }),
            cvar: Condvar::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> ReentrantGuard<'_, T> {
        let this_thread = thread::current().id();
        let mut state = self.state.lock().unwrap();
        loop {
            match state.owner {
                Some(owner) if owner == this_thread => break,
                None => {
                    state.owner = Some(this_thread);
                    break;
                }
                Some(_) => {
                    state = self.cvar.wait(state).unwrap();
                }
            }
        }
        state.count += 1;
        ReentrantGuard { lock: self }
    }
}

pub struct ReentrantGuard<'a, T> {
    lock: &'a ReentrantMutex<T>,
}

impl<T> Deref for ReentrantGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for ReentrantGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for ReentrantGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap();
        state.count -= 1;
        if state.count == 0 {
            state.owner = None;
            self.lock.cvar.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_thread_can_lock_recursively() {
        let m = ReentrantMutex::new(0);
        let g1 = m.lock();
        let g2 = m.lock();
        drop(g2);
        drop(g1);
        let g3 = m.lock();
        assert_eq!(*g3, 0);
    }

    #[test]
    fn mutation_through_recursive_locks_is_visible() {
        let m = ReentrantMutex::new(vec![1, 2, 3]);
        {
            let mut g1 = m.lock();
            g1.push(4);
            {
                let mut g2 = m.lock();
                g2.push(5);
            }
        }
        let g = m.lock();
        assert_eq!(*g, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn other_thread_blocks_until_released() {
        use std::sync::Arc;
        let m = Arc::new(ReentrantMutex::new(0));
        let guard = m.lock();
        let m2 = m.clone();
        let handle = thread::spawn(move || {
            let mut g = m2.lock();
            *g += 1;
        });
        thread::sleep(std::time::Duration::from_millis(20));
        drop(guard);
        handle.join().unwrap();
        assert_eq!(*m.lock(), 1);
    }
}
