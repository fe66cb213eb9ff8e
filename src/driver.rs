//! Output/input driver traits (§6) and the always-available [`DummyDriver`]
//! fallback. Real hardware bindings live behind the `driver-midir` feature so
//! the core engine never requires a working MIDI backend to run or test.

use crate::error::DriverError;
use crate::message::Message;

/// A raw inbound MIDI message as read from a driver, before it has been
/// associated with a clock time by the `Manager`/`Recorder` (§4.9).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMidiMessage {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
    pub sysex: Option<Vec<u8>>,
}

impl RawMidiMessage {
    /// Stamps this raw triple with `time`, producing the core's own [`Message`]
    /// type. The one place a [`crate::thru::Thru`] or [`crate::recorder::Recorder`]
    /// turns driver input into something a [`crate::track::Track`] can hold.
    pub fn into_message(self, time: u32) -> Message {
        Message::from_raw(self.status, self.data1, self.data2, self.sysex, time)
    }
}

/// A sink tracks can be routed to for playback (§6).
pub trait OutputDriver: Send {
    fn open(&mut self) -> Result<(), DriverError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn send(&mut self, msg: &Message) -> Result<(), DriverError>;
    fn name(&self) -> &str;
}

/// A source tracks can be routed from for recording/thru (§6).
pub trait InputDriver: Send {
    fn open(&mut self) -> Result<(), DriverError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    /// Drains whatever has arrived since the last poll. Called once per tick by
    /// the `Manager` (§4.1) — drivers are expected to buffer internally (e.g. in
    /// a lock-free queue fed by a hardware callback) rather than block here.
    fn poll(&mut self) -> Vec<RawMidiMessage>;
    fn name(&self) -> &str;
}

/// A no-op sink/source, named for and grounded on the "dummy ... driver"
/// fallback spec.md calls for in §4.1: used when real driver construction
/// fails (so the engine degrades instead of refusing to start) and in unit
/// tests that don't exercise a real backend.
#[derive(Debug, Default)]
pub struct DummyDriver {
    open: bool,
}

impl DummyDriver {
    pub fn new() -> Self {
        DummyDriver { open: false }
    }
}

impl OutputDriver for DummyDriver {
    fn open(&mut self) -> Result<(), DriverError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn send(&mut self, _msg: &Message) -> Result<(), DriverError> {
        if !self.open {
            return Err(DriverError::NotOpen("dummy"));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "dummy"
    }
}

impl InputDriver for DummyDriver {
    fn open(&mut self) -> Result<(), DriverError> {
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
        Vec::new()
    }

    fn name(&self) -> &str {
        "dummy"
    }
}

/// An in-memory output driver that records everything sent to it, standing in
/// for the teacher's `DebugMidiConnection` (`src/tests/common.rs`). Lives here
/// rather than under `src/tests/` since both unit tests across modules and the
/// integration tests want it.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    open: bool,
    pub sent: Vec<Message>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        RecordingDriver {
            open: false,
            sent: Vec::new(),
        }
    }
}

impl OutputDriver for RecordingDriver {
    fn open(&mut self) -> Result<(), DriverError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn send(&mut self, msg: &Message) -> Result<(), DriverError> {
        if !self.open {
            return Err(DriverError::NotOpen("recording"));
        }
        self.sent.push(msg.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[cfg(feature = "driver-midir")]
pub mod midir_driver {
    //! Real hardware binding, feature-gated behind `driver-midir`. Uses `midir`
    //! the way the teacher's own `std`-feature driver does (`examples/MF-Room-mseq`
    //! links against `midir` for its live ports) — this module is the one seam
    //! where that dependency is actually exercised.
    use super::*;
    use midir::{MidiOutput, MidiOutputConnection};

    pub struct MidirOutputDriver {
        port_name: String,
        conn: Option<MidiOutputConnection>,
    }

    impl MidirOutputDriver {
        pub fn new(port_name: impl Into<String>) -> Self {
            MidirOutputDriver {
                port_name: port_name.into(),
                conn: None,
            }
        }
    }

    impl OutputDriver for MidirOutputDriver {
        fn open(&mut self) -> Result<(), DriverError> {
            let out = MidiOutput::new("midiseq")
                .map_err(|_| DriverError::Open("midir output"))?;
            let ports = out.ports();
            let port = ports
                .iter()
                .find(|p| out.port_name(p).map(|n| n == self.port_name).unwrap_or(false))
                .ok_or(DriverError::Open("midir output port"))?;
            self.conn = Some(
                out.connect(port, "midiseq-out")
                    .map_err(|_| DriverError::Open("midir output connect"))?,
            );
            Ok(())
        }

        fn close(&mut self) {
            self.conn = None;
        }

        fn is_open(&self) -> bool {
            self.conn.is_some()
        }

        fn send(&mut self, msg: &Message) -> Result<(), DriverError> {
            let conn = self
                .conn
                .as_mut()
                .ok_or(DriverError::NotOpen("midir output"))?;
            let mut bytes = vec![msg.status(), msg.data1(), msg.data2()];
            if let Some(sysex) = msg.sysex_data() {
                bytes = sysex.to_vec();
            }
            conn.send(&bytes)
                .map_err(|_| DriverError::SendFailed("midir output"))
        }

        fn name(&self) -> &str {
            &self.port_name
        }
    }
}
