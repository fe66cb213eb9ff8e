//! [`Thru`]: a free-running [`TickComponent`] that forwards live input to an
//! output, independent of whatever [`crate::sequencer::Sequencer`] is playing
//! (§4.8), grounded on `original_source/src/thru.cpp`.

use crate::manager::ManagerHandle;
use crate::message::Message;
use crate::processor::ExtraProcessor;
use crate::tick::{Priority, TickComponent};

/// Forwards polled input to an output, optionally filtering/remapping a
/// channel and running an [`ExtraProcessor`] (§4.8).
///
/// Unlike `original_source/src/thru.cpp`, which only ever forwards channel
/// messages, §8's worked scenarios are explicit that non-channel input (e.g.
/// sysex) passes through unmodified — this crate follows the spec's
/// behavior rather than the original's narrower one.
pub struct Thru {
    handle: ManagerHandle,
    in_port: usize,
    out_port: usize,
    in_channel: Option<u8>,
    out_channel: Option<u8>,
    processor: Option<Box<dyn ExtraProcessor>>,
    running: bool,
}

impl Thru {
    pub fn new(handle: ManagerHandle) -> Self {
        Thru {
            handle,
            in_port: 0,
            out_port: 0,
            in_channel: None,
            out_channel: None,
            processor: None,
            running: false,
        }
    }

    pub fn set_in_port(&mut self, port: usize) {
        self.in_port = port;
    }

    pub fn set_out_port(&mut self, port: usize) {
        self.out_port = port;
    }

    /// `None` accepts every incoming channel unmodified; `Some(c)` (0..=15)
    /// drops channel messages on any other channel (§4.8, §8).
    pub fn set_in_channel(&mut self, channel: Option<u8>) -> bool {
        if channel.is_some_and(|c| c > 15) {
            return false;
        }
        self.in_channel = channel;
        true
    }

    /// `None` leaves the channel untouched; `Some(c)` (0..=15) rewrites every
    /// forwarded channel message onto channel `c`.
    pub fn set_out_channel(&mut self, channel: Option<u8>) -> bool {
        if channel.is_some_and(|c| c > 15) {
            return false;
        }
        self.out_channel = channel;
        true
    }

    pub fn set_processor(&mut self, processor: Option<Box<dyn ExtraProcessor>>) {
        self.processor = processor;
    }

    fn silence_out(&self) {
        self.handle.all_notes_off_on(self.out_port, self.out_channel);
    }

    /// Applies the channel filter/remap to one polled message, returning
    /// `None` if it should be dropped.
    fn remap(&self, msg: Message) -> Option<Message> {
        let Some(ch) = msg.channel() else {
            return Some(msg);
        };
        if let Some(want) = self.in_channel {
            if ch != want {
                return None;
            }
        }
        let mut msg = msg;
        if let Some(out_ch) = self.out_channel {
            msg.set_channel(out_ch);
        }
        Some(msg)
    }
}

impl TickComponent for Thru {
    fn priority(&self) -> Priority {
        Priority::PreSequencer
    }

    fn start(&mut self) -> bool {
        let was = self.running;
        self.running = true;
        !was
    }

    fn stop(&mut self) -> bool {
        let was = self.running;
        self.running = false;
        if was {
            self.silence_out();
        }
        was
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn tick(&mut self, _sys_time_ms: u32) {
        for raw in self.handle.poll_in(self.in_port) {
            let msg = raw.into_message(0);
            let Some(msg) = self.remap(msg) else { continue };
            let mut msg = msg;
            if let Some(processor) = self.processor.as_mut() {
                match processor.process(msg) {
                    Some(m) => msg = m,
                    None => continue,
                }
            }
            if let Err(e) = self.handle.send_on(self.out_port, &msg) {
                log::error!("thru send failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DummyDriver, RawMidiMessage};
    use crate::manager::Manager;
    use crate::message::NOTE_ON;
    use std::sync::{Arc, Mutex};

    struct SharedDriver {
        open: bool,
        incoming: Arc<Mutex<Vec<RawMidiMessage>>>,
        sent: Arc<Mutex<Vec<Message>>>,
    }

    impl crate::driver::OutputDriver for SharedDriver {
        fn open(&mut self) -> Result<(), crate::error::DriverError> {
            self.open = true;
            Ok(())
        }
        fn close(&mut self) {
            self.open = false;
        }
        fn is_open(&self) -> bool {
            self.open
        }
        fn send(&mut self, msg: &Message) -> Result<(), crate::error::DriverError> {
            self.sent.lock().unwrap().push(msg.clone());
            Ok(())
        }
        fn name(&self) -> &str {
            "shared"
        }
    }

    impl crate::driver::InputDriver for SharedDriver {
        fn open(&mut self) -> Result<(), crate::error::DriverError> {
            self.open = true;
            Ok(())
        }
        fn close(&mut self) {
            self.open = false;
        }
        fn is_open(&self) -> bool {
            self.open
        }
        fn poll(&mut self) -> Vec<RawMidiMessage> {
            std::mem::take(&mut *self.incoming.lock().unwrap())
        }
        fn name(&self) -> &str {
            "shared"
        }
    }

    fn raw_note_on(channel: u8, note: u8, velocity: u8) -> RawMidiMessage {
        RawMidiMessage {
            status: NOTE_ON | (channel & 0x0F),
            data1: note,
            data2: velocity,
            sysex: None,
        }
    }

    fn thru_with_ports() -> (Thru, Arc<Mutex<Vec<RawMidiMessage>>>, Arc<Mutex<Vec<Message>>>) {
        let manager = Manager::new(5);
        let incoming = Arc::new(Mutex::new(Vec::new()));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let in_port = manager.add_in_driver(Box::new(SharedDriver {
            open: false,
            incoming: incoming.clone(),
            sent: sent.clone(),
        }));
        let out_port = manager.add_out_driver(Box::new(DummyDriver::new()));
        let shared_out = manager.add_out_driver(Box::new(SharedDriver {
            open: false,
            incoming: incoming.clone(),
            sent: sent.clone(),
        }));
        manager.open_in_out_ports();
        let mut thru = Thru::new(manager.handle());
        thru.set_in_port(in_port);
        thru.set_out_port(shared_out);
        let _ = out_port;
        std::mem::forget(manager);
        (thru, incoming, sent)
    }

    #[test]
    fn forwards_note_on_unchanged_by_default() {
        let (mut thru, incoming, sent) = thru_with_ports();
        thru.start();
        incoming.lock().unwrap().push(raw_note_on(2, 64, 90));
        thru.tick(0);
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel(), Some(2));
        assert_eq!(sent[0].data1(), 64);
        assert_eq!(sent[0].data2(), 90);
    }

    #[test]
    fn remaps_channel_when_out_channel_set() {
        let (mut thru, incoming, sent) = thru_with_ports();
        thru.set_in_channel(None);
        thru.set_out_channel(Some(5));
        thru.start();
        incoming.lock().unwrap().push(raw_note_on(2, 64, 90));
        thru.tick(0);
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel(), Some(5));
    }

    #[test]
    fn drops_input_on_other_channels_when_in_channel_set() {
        let (mut thru, incoming, sent) = thru_with_ports();
        thru.set_in_channel(Some(0));
        thru.start();
        incoming.lock().unwrap().push(raw_note_on(2, 64, 90));
        thru.tick(0);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn invalid_channel_setters_are_rejected() {
        let (mut thru, _incoming, _sent) = thru_with_ports();
        assert!(!thru.set_in_channel(Some(16)));
        assert!(!thru.set_out_channel(Some(16)));
    }
}
