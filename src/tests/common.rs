//! Shared in-memory test fixture: a driver backed by buffers the test itself
//! can still reach, playing the role of the teacher's `DebugMidiConnection`
//! (`examples/MF-Room-mseq/src/tests/common.rs`) — something assertions can
//! inspect without a real MIDI backend.

use std::sync::{Arc, Mutex};

use crate::driver::{InputDriver, OutputDriver, RawMidiMessage};
use crate::error::DriverError;
use crate::message::Message;

/// A driver registerable as both an [`OutputDriver`] and an [`InputDriver`],
/// whose sent/incoming buffers stay reachable through [`SharedPort::driver`]'s
/// clone after the `Box<dyn Trait>` itself has been handed to a `Manager`.
#[derive(Clone, Default)]
pub(super) struct SharedPort {
    open: Arc<Mutex<bool>>,
    sent: Arc<Mutex<Vec<Message>>>,
    incoming: Arc<Mutex<Vec<RawMidiMessage>>>,
}

impl SharedPort {
    pub(super) fn new() -> Self {
        SharedPort::default()
    }

    pub(super) fn driver(&self) -> SharedPortDriver {
        SharedPortDriver(self.clone())
    }

    pub(super) fn push_input(&self, msg: RawMidiMessage) {
        self.incoming.lock().unwrap().push(msg);
    }

    pub(super) fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

pub(super) struct SharedPortDriver(SharedPort);

impl OutputDriver for SharedPortDriver {
    fn open(&mut self) -> Result<(), DriverError> {
        *self.0.open.lock().unwrap() = true;
        Ok(())
    }

    fn close(&mut self) {
        *self.0.open.lock().unwrap() = false;
    }

    fn is_open(&self) -> bool {
        *self.0.open.lock().unwrap()
    }

    fn send(&mut self, msg: &Message) -> Result<(), DriverError> {
        if !self.is_open() {
            return Err(DriverError::NotOpen("shared"));
        }
        self.0.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "shared"
    }
}

impl InputDriver for SharedPortDriver {
    fn open(&mut self) -> Result<(), DriverError> {
        *self.0.open.lock().unwrap() = true;
        Ok(())
    }

    fn close(&mut self) {
        *self.0.open.lock().unwrap() = false;
    }

    fn is_open(&self) -> bool {
        *self.0.open.lock().unwrap()
    }

    fn poll(&mut self) -> Vec<RawMidiMessage> {
        std::mem::take(&mut *self.0.incoming.lock().unwrap())
    }

    fn name(&self) -> &str {
        "shared"
    }
}

/// Keeps a [`crate::manager::Manager`] alive past the end of a test scope
/// without returning it — the `Manager` isn't `Clone`-free to stash
/// alongside its `ManagerHandle`-holding components, and tests here only ever
/// need the handle.
pub(super) fn leak_manager(manager: crate::manager::Manager) {
    std::mem::forget(manager);
}
