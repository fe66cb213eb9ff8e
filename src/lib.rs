//! # midiseq
//!
//! `midiseq` is the scheduling core, sequencer state machine, and MIDI
//! routing/recording fabric for a real-time multitrack sequencer.
//!
//! A [`Manager`] owns a set of [`OutputDriver`]/[`InputDriver`] trait objects
//! and a set of [`TickComponent`]s, and drives them all from one background
//! [`Clock`]. The three components that ship here are [`SequencerComponent`]
//! (multitrack playback via a [`Sequencer`]), [`Metronome`] (a free-running
//! click generator), [`Thru`] (live input forwarding), and [`Recorder`] (live
//! input capture into a running sequencer's tracks). Applications compose
//! these the way they need — adding their own [`TickComponent`] or
//! [`ExtraProcessor`] implementations alongside them.
//!
//! ## Usage
//!
//! ```no_run
//! use midiseq::{Manager, Multitrack, Sequencer, SequencerComponent, DummyDriver};
//! use std::sync::{Arc, Mutex};
//!
//! let manager = Manager::new(10);
//! let out_port = manager.add_out_driver(Box::new(DummyDriver::new()));
//! manager.open_in_out_ports();
//!
//! let mut multitrack = Multitrack::new(480);
//! multitrack.push_track(Default::default());
//! multitrack.track_mut(0).unwrap().set_out_port(Some(out_port));
//!
//! let seq = Arc::new(Mutex::new(Sequencer::new(multitrack).unwrap()));
//! let handle = manager.handle();
//! let component = SequencerComponent::new(seq, move |port, msg| {
//!     let _ = handle.send_on(port, msg);
//! });
//! manager.add_tick_component(Box::new(component));
//! manager.start();
//! ```
//!
//! ## Features
//!
//! - `std` (default): the clock's absolute-deadline sleep (`spin_sleep`).
//! - `driver-midir`: a real hardware [`OutputDriver`] binding via `midir`.
//! - `file`: Standard MIDI File load/write via `midly`.
//! - `serde`: (de)serialization of [`Message`]/[`Track`] for fixtures and
//!   checkpointing.

#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

mod clock;
mod driver;
mod error;
mod manager;
mod message;
mod metronome;
mod multitrack;
mod notify;
mod processor;
mod reentrant;
mod recorder;
mod running_state;
mod sequencer;
mod thru;
mod tick;
mod track;

#[cfg(feature = "file")]
mod file;

#[cfg(test)]
mod tests;

pub use clock::Clock;
pub use driver::{DummyDriver, InputDriver, OutputDriver, RawMidiMessage, RecordingDriver};
pub use error::{DriverError, SeqError};
pub use manager::{Manager, ManagerHandle};
pub use message::{Message, CC_ALL_NOTES_OFF, CC_BANK_SELECT, CC_CHORUS, CC_DAMPER_PEDAL, CC_MAIN_VOLUME, CC_PAN, CC_REVERB};
pub use metronome::Metronome;
pub use multitrack::{Multitrack, MultitrackIter};
pub use notify::{Group, Notifier, NotifierEvent, NullNotifier, Subgroup};
pub use processor::{ExtraProcessor, Solo, TrackProcessor};
pub use recorder::{RecMode, Recorder};
pub use running_state::{NoteMatrix, RunningState};
pub use sequencer::{Sequencer, SequencerComponent};
pub use thru::Thru;
pub use tick::{Priority, TickComponent};
pub use track::{Track, TrackKind};

#[cfg(feature = "file")]
pub use file::{load_file, load_path, write_file, write_path};
