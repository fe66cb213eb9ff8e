//! GUI-facing notification fabric (§6): a synchronous callback the `Manager`
//! and tick components invoke whenever something a host UI would want to
//! redraw changes — transport state, track content, recorder status.

/// Coarse category of a notification (§6: `group ∈ {ALL, CONDUCTOR, TRANSPORT,
/// TRACK, RECORDER}`). The metronome and thru components piggyback on
/// `Transport` the same way the original's `Metronome::TickProc` posts
/// `GROUP_TRANSPORT` beat/measure events through the sequencer's own notifier
/// (`original_source/src/metronome.cpp`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Group {
    /// A whole-sequencer operation completed (load, seek) — redraw everything.
    All,
    /// Tempo, time signature, key signature, or marker text changed.
    Conductor,
    Transport,
    Track,
    Recorder,
}

/// Finer detail within a [`Group`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subgroup {
    /// `CONDUCTOR`: tempo changed.
    Tempo,
    /// `CONDUCTOR`: time signature changed.
    TimeSig,
    /// `CONDUCTOR`: key signature changed.
    KeySig,
    /// `CONDUCTOR`: marker text encountered.
    Marker,
    /// `TRANSPORT`: play started.
    Start,
    /// `TRANSPORT`: play stopped.
    Stop,
    /// `TRANSPORT`: a beat-marker event was emitted.
    Beat,
    /// `TRANSPORT`: a measure boundary was crossed.
    Measure,
    /// `TRANSPORT`: repeat-play mode toggled.
    Mode,
    /// `TRANSPORT`: playback ran off the end of the song.
    EndOfSong,
    /// `TRACK`: name, program, volume, pan, reverb, chorus, or note changed.
    Name,
    Program,
    Volume,
    Pan,
    Reverb,
    Chorus,
    Note,
    /// `RECORDER`: recording window entered/left, or state reset.
    RecStart,
    RecStop,
    RecReset,
    /// Mute/solo/processor settings changed.
    Settings,
    /// Track content changed (insert/delete/replace).
    Content,
    /// Everything (used with [`Group::All`]).
    All,
}

/// A single notification: `item` is the track/driver index the event concerns,
/// when applicable, or `None` for whole-sequencer events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotifierEvent {
    pub group: Group,
    pub subgroup: Subgroup,
    pub item: Option<usize>,
}

impl NotifierEvent {
    pub fn new(group: Group, subgroup: Subgroup, item: Option<usize>) -> Self {
        NotifierEvent {
            group,
            subgroup,
            item,
        }
    }
}

/// Dispatched synchronously, on whatever thread produced the event — almost
/// always the `Manager`'s clock thread (§5). Implementations must not block or
/// call back into the `Manager`/`Sequencer` without going through the
/// reentrant lock they expose (§9 Design Notes).
pub trait Notifier: Send + Sync {
    fn notify(&self, event: NotifierEvent);
}

/// A `Notifier` that does nothing, used when no host UI is attached.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: NotifierEvent) {}
}
