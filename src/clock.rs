//! [`Clock`]: the background tick source described in §4.1 and
//! `original_source/include/timer.h` — a dedicated thread sleeping to an
//! absolute deadline (so small per-tick scheduling jitter never accumulates
//! into drift) that calls back into the [`crate::manager::Manager`] once per
//! resolution period.
//!
//! Start/stop is refcounted (`num_open`): several independent tick components
//! can each "want" the clock running without racing to start or stop the
//! shared thread out from under one another. [`Clock::hard_stop`] bypasses the
//! refcount for shutdown.

#[cfg(feature = "std")]
mod imp {
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    /// Default tick resolution, matching `original_source/include/timer.h`'s
    /// `DEFAULT_RESOLUTION` (10 ms).
    pub const DEFAULT_RESOLUTION_MS: u32 = 10;

    struct Shared {
        running: AtomicBool,
        elapsed_ms: AtomicU32,
        num_open: AtomicUsize,
    }

    /// A free-running millisecond clock driving a callback on a background
    /// thread. Owned by the [`crate::manager::Manager`]; components never talk
    /// to it directly.
    pub struct Clock {
        resolution_ms: u32,
        shared: Arc<Shared>,
        handle: Option<JoinHandle<()>>,
        callback: Option<Arc<dyn Fn(u32) + Send + Sync>>,
    }

    impl Clock {
        pub fn new(resolution_ms: u32) -> Self {
            Clock {
                resolution_ms,
                shared: Arc::new(Shared {
                    running: AtomicBool::new(false),
                    elapsed_ms: AtomicU32::new(0),
                    num_open: AtomicUsize::new(0),
                }),
                handle: None,
                callback: None,
            }
        }

        /// Installs the per-tick callback. Must be called before the first
        /// [`Clock::start`] — the `Manager` does this once at construction.
        pub fn set_callback(&mut self, callback: impl Fn(u32) + Send + Sync + 'static) {
            self.callback = Some(Arc::new(callback));
        }

        pub fn resolution_ms(&self) -> u32 {
            self.resolution_ms
        }

        /// Changes the tick resolution (§4.1: "changing it hard-stops first").
        /// The clock is left stopped afterward; callers that still need it
        /// running call [`Clock::start`] again.
        pub fn set_resolution(&mut self, resolution_ms: u32) {
            self.hard_stop();
            self.resolution_ms = resolution_ms;
        }

        /// Blocks the calling thread for `ms` milliseconds (§4.1), using the
        /// same spin-assisted sleep the tick loop uses for its own deadlines.
        pub fn wait(&self, ms: u32) {
            spin_sleep::sleep(Duration::from_millis(ms as u64));
        }

        pub fn is_running(&self) -> bool {
            self.shared.running.load(Ordering::Acquire)
        }

        /// Milliseconds elapsed since the clock last transitioned from stopped
        /// to running.
        pub fn sys_time_ms(&self) -> u32 {
            self.shared.elapsed_ms.load(Ordering::Acquire)
        }

        /// Increments the refcount; spawns the tick thread on the 0->1
        /// transition. Returns `true` if this call started the thread.
        pub fn start(&mut self) -> bool {
            let prev = self.shared.num_open.fetch_add(1, Ordering::AcqRel);
            if prev != 0 {
                return false;
            }
            let Some(callback) = self.callback.clone() else {
                log::error!("clock started with no callback installed");
                self.shared.num_open.store(0, Ordering::Release);
                return false;
            };
            self.shared.running.store(true, Ordering::Release);
            self.shared.elapsed_ms.store(0, Ordering::Release);
            let shared = self.shared.clone();
            let period = Duration::from_millis(self.resolution_ms as u64);
            self.handle = Some(thread::spawn(move || {
                let start = Instant::now();
                let mut next_deadline = start + period;
                while shared.running.load(Ordering::Acquire) {
                    let elapsed = Instant::now().saturating_duration_since(start);
                    shared
                        .elapsed_ms
                        .store(elapsed.as_millis() as u32, Ordering::Release);
                    callback(elapsed.as_millis() as u32);
                    let now = Instant::now();
                    if next_deadline > now {
                        spin_sleep::sleep(next_deadline - now);
                    }
                    next_deadline += period;
                }
            }));
            debug_assert!(self.handle.is_some());
            log::debug!("clock started at {}ms resolution", self.resolution_ms);
            true
        }

        /// Decrements the refcount; joins the tick thread on the 1->0
        /// transition. Returns `true` if this call stopped the thread.
        pub fn stop(&mut self) -> bool {
            let prev = self.shared.num_open.fetch_sub(1, Ordering::AcqRel);
            if prev == 0 {
                self.shared.num_open.store(0, Ordering::Release);
                return false;
            }
            if prev > 1 {
                return false;
            }
            self.join_thread();
            true
        }

        /// Stops the clock unconditionally, ignoring the refcount. Used during
        /// `Manager` teardown (§5).
        pub fn hard_stop(&mut self) {
            self.shared.num_open.store(0, Ordering::Release);
            self.join_thread();
        }

        fn join_thread(&mut self) {
            self.shared.running.store(false, Ordering::Release);
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
            log::debug!("clock stopped");
        }
    }

    impl Drop for Clock {
        fn drop(&mut self) {
            self.hard_stop();
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::sync::atomic::AtomicU32 as TestCounter;
        use std::sync::Arc as TestArc;

        #[test]
        fn refcounted_start_stop_only_spawns_once() {
            let mut clock = Clock::new(5);
            let ticks = TestArc::new(TestCounter::new(0));
            let ticks2 = ticks.clone();
            clock.set_callback(move |_| {
                ticks2.fetch_add(1, Ordering::Relaxed);
            });
            assert!(clock.start());
            assert!(!clock.start());
            std::thread::sleep(Duration::from_millis(30));
            assert!(!clock.stop());
            assert!(clock.stop());
            assert!(ticks.load(Ordering::Relaxed) > 0);
        }

        #[test]
        fn hard_stop_ignores_refcount() {
            let mut clock = Clock::new(5);
            clock.set_callback(|_| {});
            clock.start();
            clock.start();
            clock.hard_stop();
            assert!(!clock.is_running());
        }

        #[test]
        fn set_resolution_hard_stops_first() {
            let mut clock = Clock::new(5);
            clock.set_callback(|_| {});
            clock.start();
            assert!(clock.is_running());
            clock.set_resolution(20);
            assert!(!clock.is_running());
            assert_eq!(clock.resolution_ms(), 20);
        }

        #[test]
        fn wait_blocks_for_roughly_the_requested_duration() {
            let clock = Clock::new(5);
            let start = Instant::now();
            clock.wait(20);
            assert!(start.elapsed() >= Duration::from_millis(15));
        }
    }
}

#[cfg(feature = "std")]
pub use imp::{Clock, DEFAULT_RESOLUTION_MS};

#[cfg(not(feature = "std"))]
pub struct Clock;

#[cfg(not(feature = "std"))]
impl Clock {
    pub fn new(_resolution_ms: u32) -> Self {
        Clock
    }

    pub fn start(&mut self) -> bool {
        todo!("no_std clock backend not implemented")
    }

    pub fn set_resolution(&mut self, _resolution_ms: u32) {
        todo!("no_std clock backend not implemented")
    }

    pub fn wait(&self, _ms: u32) {
        todo!("no_std clock backend not implemented")
    }
}
