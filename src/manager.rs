//! [`Manager`]: the top-level owner of drivers and tick components (§4.1).
//! Generalizes the original's `MIDIManager` singleton into an explicit,
//! independently-constructible object, per the Design Notes (§9).

use std::sync::Arc;

use crate::clock::Clock;
use crate::driver::{InputDriver, OutputDriver};
use crate::error::DriverError;
use crate::message::Message;
use crate::notify::{Group, NotifierEvent, Notifier, NullNotifier, Subgroup};
use crate::reentrant::ReentrantMutex;
use crate::tick::{Priority, TickComponent};

struct Inner {
    out_drivers: Vec<Box<dyn OutputDriver>>,
    in_drivers: Vec<Box<dyn InputDriver>>,
    components: Vec<Box<dyn TickComponent>>,
    notifier: Arc<dyn Notifier>,
}

impl Inner {
    /// Inserts `component` keeping `components` ordered by [`Priority`], ties
    /// broken by insertion order. Exactly one [`Priority::Sequencer`] component
    /// may be registered at a time (§4.1) — inserting a second one evicts the
    /// first, rather than running two sequencers against the same drivers.
    fn insert_component(&mut self, component: Box<dyn TickComponent>) {
        if component.priority() == Priority::Sequencer {
            self.components
                .retain(|c| c.priority() != Priority::Sequencer);
        }
        let pos = self
            .components
            .partition_point(|c| c.priority() <= component.priority());
        self.components.insert(pos, component);
    }

    fn tick(&mut self, sys_time_ms: u32) {
        for component in self.components.iter_mut() {
            if component.is_running() {
                component.tick(sys_time_ms);
            }
        }
    }

    fn all_notes_off(&mut self) {
        for driver in self.out_drivers.iter_mut() {
            if !driver.is_open() {
                continue;
            }
            for channel in 0..16u8 {
                for note in 0..128u8 {
                    if let Err(e) = driver.send(&Message::note_off(channel, note, 0, 0)) {
                        log::error!("all-notes-off send failed on {}: {e}", driver.name());
                    }
                }
            }
        }
    }

    /// Silences one driver, optionally restricted to a single channel — the
    /// "emit all-notes-off on the affected outgoing channel" step [`crate::thru::Thru`]
    /// and [`crate::recorder::Recorder`] run on stop/channel-change (§4.8).
    fn all_notes_off_on(&mut self, driver_index: usize, channel: Option<u8>) {
        let Some(driver) = self.out_drivers.get_mut(driver_index) else {
            return;
        };
        if !driver.is_open() {
            return;
        }
        let channels: &[u8] = match &channel {
            Some(c) => std::slice::from_ref(c),
            None => &ALL_CHANNELS,
        };
        for &ch in channels {
            for note in 0..128u8 {
                if let Err(e) = driver.send(&Message::note_off(ch, note, 0, 0)) {
                    log::error!("all-notes-off send failed on {}: {e}", driver.name());
                }
            }
            if let Err(e) = driver.send(&Message::control_change(ch, crate::message::CC_ALL_NOTES_OFF, 0, 0)) {
                log::error!("all-notes-off CC send failed on {}: {e}", driver.name());
            }
        }
    }
}

const ALL_CHANNELS: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];

/// Owns every [`OutputDriver`]/[`InputDriver`] and every [`TickComponent`] in a
/// running engine, and drives them all from one [`Clock`] (§4.1, §5).
///
/// Cloning a `Manager` (via [`Manager::handle`]) is cheap and shares the same
/// underlying state — the clock thread itself holds such a handle internally.
pub struct Manager {
    inner: Arc<ReentrantMutex<Inner>>,
    clock: Clock,
}

impl Manager {
    pub fn new(resolution_ms: u32) -> Self {
        Self::with_notifier(resolution_ms, Arc::new(NullNotifier))
    }

    pub fn with_notifier(resolution_ms: u32, notifier: Arc<dyn Notifier>) -> Self {
        let inner = Arc::new(ReentrantMutex::new(Inner {
            out_drivers: Vec::new(),
            in_drivers: Vec::new(),
            components: Vec::new(),
            notifier,
        }));
        let mut clock = Clock::new(resolution_ms);
        let cb_inner = inner.clone();
        clock.set_callback(move |sys_time_ms| {
            cb_inner.lock().tick(sys_time_ms);
        });
        Manager { inner, clock }
    }

    pub fn start(&mut self) -> bool {
        let started = self.clock.start();
        if started {
            self.inner.lock().notifier.notify(NotifierEvent::new(
                Group::Transport,
                Subgroup::Start,
                None,
            ));
        }
        started
    }

    pub fn stop(&mut self) -> bool {
        let stopped = self.clock.stop();
        if stopped {
            self.inner.lock().all_notes_off();
            self.inner.lock().notifier.notify(NotifierEvent::new(
                Group::Transport,
                Subgroup::Stop,
                None,
            ));
        }
        stopped
    }

    pub fn hard_stop(&mut self) {
        self.clock.hard_stop();
        self.inner.lock().all_notes_off();
    }

    pub fn is_running(&self) -> bool {
        self.clock.is_running()
    }

    pub fn sys_time_ms(&self) -> u32 {
        self.clock.sys_time_ms()
    }

    pub fn add_out_driver(&self, driver: Box<dyn OutputDriver>) -> usize {
        let mut inner = self.inner.lock();
        inner.out_drivers.push(driver);
        inner.out_drivers.len() - 1
    }

    pub fn add_in_driver(&self, driver: Box<dyn InputDriver>) -> usize {
        let mut inner = self.inner.lock();
        inner.in_drivers.push(driver);
        inner.in_drivers.len() - 1
    }

    pub fn num_out_drivers(&self) -> usize {
        self.inner.lock().out_drivers.len()
    }

    pub fn num_in_drivers(&self) -> usize {
        self.inner.lock().in_drivers.len()
    }

    /// Opens every registered output and input driver, logging (rather than
    /// failing the whole call) on any individual driver that can't open — a
    /// single missing hardware port shouldn't prevent the rest of the engine
    /// from running (§4.1's dummy-driver fallback philosophy).
    pub fn open_in_out_ports(&self) {
        let mut inner = self.inner.lock();
        for driver in inner.out_drivers.iter_mut() {
            if let Err(e) = driver.open() {
                log::error!("failed to open output driver {}: {e}", driver.name());
            }
        }
        for driver in inner.in_drivers.iter_mut() {
            if let Err(e) = driver.open() {
                log::error!("failed to open input driver {}: {e}", driver.name());
            }
        }
    }

    pub fn close_in_out_ports(&self) {
        let mut inner = self.inner.lock();
        for driver in inner.out_drivers.iter_mut() {
            driver.close();
        }
        for driver in inner.in_drivers.iter_mut() {
            driver.close();
        }
    }

    pub fn send_on(&self, driver_index: usize, msg: &Message) -> Result<(), DriverError> {
        let mut inner = self.inner.lock();
        let driver = inner
            .out_drivers
            .get_mut(driver_index)
            .ok_or(DriverError::NotOpen("unknown output driver"))?;
        driver.send(msg)
    }

    pub fn poll_in(&self, driver_index: usize) -> Vec<crate::driver::RawMidiMessage> {
        let mut inner = self.inner.lock();
        inner
            .in_drivers
            .get_mut(driver_index)
            .map(|d| d.poll())
            .unwrap_or_default()
    }

    pub fn add_tick_component(&self, component: Box<dyn TickComponent>) {
        self.inner.lock().insert_component(component);
    }

    /// Removes every component at `priority`, returning how many were removed.
    /// Since only one [`Priority::Sequencer`] component is ever registered,
    /// this is how callers detach the current sequencer.
    pub fn remove_tick_components(&self, priority: Priority) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.components.len();
        inner.components.retain(|c| c.priority() != priority);
        before - inner.components.len()
    }

    pub fn num_tick_components(&self) -> usize {
        self.inner.lock().components.len()
    }

    pub fn all_notes_off(&self) {
        self.inner.lock().all_notes_off();
    }

    /// A cheaply-cloneable handle sharing this manager's drivers and notifier,
    /// without the clock thread — what [`crate::metronome::Metronome`],
    /// [`crate::thru::Thru`], and [`crate::recorder::Recorder`] hold to reach
    /// drivers from inside their own `tick()` (they're registered as tick
    /// components themselves, not owners of the `Manager`).
    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            inner: self.inner.clone(),
        }
    }
}

/// See [`Manager::handle`].
#[derive(Clone)]
pub struct ManagerHandle {
    inner: Arc<ReentrantMutex<Inner>>,
}

impl ManagerHandle {
    pub fn send_on(&self, driver_index: usize, msg: &Message) -> Result<(), DriverError> {
        let mut inner = self.inner.lock();
        let driver = inner
            .out_drivers
            .get_mut(driver_index)
            .ok_or(DriverError::NotOpen("unknown output driver"))?;
        driver.send(msg)
    }

    pub fn poll_in(&self, driver_index: usize) -> Vec<crate::driver::RawMidiMessage> {
        let mut inner = self.inner.lock();
        inner
            .in_drivers
            .get_mut(driver_index)
            .map(|d| d.poll())
            .unwrap_or_default()
    }

    pub fn all_notes_off_on(&self, driver_index: usize, channel: Option<u8>) {
        self.inner.lock().all_notes_off_on(driver_index, channel);
    }

    pub fn notify(&self, event: NotifierEvent) {
        self.inner.lock().notifier.notify(event);
    }

    pub fn num_out_drivers(&self) -> usize {
        self.inner.lock().out_drivers.len()
    }

    pub fn num_in_drivers(&self) -> usize {
        self.inner.lock().in_drivers.len()
    }
}
