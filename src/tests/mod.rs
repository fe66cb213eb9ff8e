//! Integration-style tests exercising the full `Manager`/`Sequencer`/
//! `Metronome`/`Thru`/`Recorder` stack together, the way
//! `examples/MF-Room-mseq/src/tests/` exercises its own `Conductor`/
//! `MidiController` pairing end to end rather than module-by-module.

mod common;
