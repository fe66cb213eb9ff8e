//! The [`Message`] type: a single timestamped MIDI event.
//!
//! Modeled directly on §3's data model: a status byte, up to two data bytes, an
//! optional owned sysex payload, and a clock-time stamp. Unlike the teacher's
//! `MidiMessage` enum (`mseq_core/src/midi.rs`), which only needs to express the
//! handful of messages a live sequencer emits, this type has to stand for every
//! byte sequence a Standard MIDI File track can hold, so it keeps the raw status
//! byte around rather than re-encoding it into a closed enum.

/// Status nibble for note-off messages (channel in the low nibble).
pub const NOTE_OFF: u8 = 0x80;
/// Status nibble for note-on messages (channel in the low nibble).
pub const NOTE_ON: u8 = 0x90;
/// Status nibble for polyphonic key pressure.
pub const POLY_PRESSURE: u8 = 0xA0;
/// Status nibble for control change.
pub const CONTROL_CHANGE: u8 = 0xB0;
/// Status nibble for program change.
pub const PROGRAM_CHANGE: u8 = 0xC0;
/// Status nibble for channel pressure.
pub const CHANNEL_PRESSURE: u8 = 0xD0;
/// Status nibble for pitch bend.
pub const PITCH_BEND: u8 = 0xE0;
/// System exclusive start.
pub const SYSEX_START: u8 = 0xF0;
/// System exclusive continuation/escape.
pub const SYSEX_CONT: u8 = 0xF7;
/// Meta event marker (only valid inside a Standard MIDI File, never on the wire).
pub const META: u8 = 0xFF;

/// Controller numbers the running state (§3, "per-track running state") tracks by
/// name, matching `original_source/src/process.cpp`'s notion of "known
/// controllers" that get replayed on catch-events-before (§8, Mute+unmute).
pub const CC_BANK_SELECT: u8 = 0x00;
pub const CC_MAIN_VOLUME: u8 = 0x07;
pub const CC_PAN: u8 = 0x0A;
pub const CC_REVERB: u8 = 0x5B;
pub const CC_CHORUS: u8 = 0x5D;
pub const CC_DAMPER_PEDAL: u8 = 0x40;
pub const CC_ALL_NOTES_OFF: u8 = 0x7B;

/// Meta event type bytes (§3: "meta type byte present iff status is 0xFF").
pub const META_TRACK_NAME: u8 = 0x03;
pub const META_MARKER: u8 = 0x06;
pub const META_END_OF_TRACK: u8 = 0x2F;
pub const META_TEMPO: u8 = 0x51;
pub const META_TIME_SIGNATURE: u8 = 0x58;
pub const META_KEY_SIGNATURE: u8 = 0x59;
/// Synthetic "beat marker" meta type (§4.4, §9 Glossary): never present in a
/// Standard MIDI File, only ever produced in-memory by [`crate::sequencer::Sequencer`]
/// to mark a beat boundary. Uses a meta type byte (`0x7C`) outside the
/// standard-defined range so it can never collide with a file-loaded event.
pub const META_BEAT_MARKER: u8 = 0x7C;

/// A single MIDI event plus the clock time at which it occurs.
///
/// Invariants (§3): `status` is never `0`; for channel messages the low nibble is
/// the channel (0..=15); `sysex` is `Some` iff `status` is `SYSEX_START` or
/// `SYSEX_CONT`; the meta type byte (`data1`) is only meaningful when `status` is
/// `META`. `Message` is a plain value type — sysex payloads are owned `Vec<u8>`,
/// copied on clone, never shared by reference (Design Notes §9: the original's
/// ref-counted sysex buffers are a correctness hazard this crate has no need for).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    status: u8,
    data1: u8,
    data2: u8,
    sysex: Option<Vec<u8>>,
    /// Meta event text payload (track name, marker, ...). Kept separate from
    /// `sysex` because a meta event's type byte lives in `data1`, not folded into
    /// `status` the way a sysex's continuation byte is.
    text: Option<String>,
    time: u32,
}

impl Message {
    fn raw(status: u8, data1: u8, data2: u8, time: u32) -> Self {
        Message {
            status,
            data1,
            data2,
            sysex: None,
            text: None,
            time,
        }
    }

    /// Builds a `Message` straight from a driver's raw status/data1/data2
    /// triple plus its sysex payload, as received from an [`crate::driver::InputDriver`]
    /// (§6: "input messages arrive raw; parsing into the internal Message type
    /// is the core's responsibility"). Used by [`crate::thru::Thru`] and
    /// [`crate::recorder::Recorder`] to stamp polled input with a clock time.
    pub fn from_raw(status: u8, data1: u8, data2: u8, sysex: Option<Vec<u8>>, time: u32) -> Self {
        Message {
            status,
            data1,
            data2,
            sysex,
            text: None,
            time,
        }
    }

    /// Builds a channel message, clamping `channel` into 0..=15 by masking.
    fn channel_msg(kind: u8, channel: u8, data1: u8, data2: u8, time: u32) -> Self {
        Self::raw(kind | (channel & 0x0F), data1, data2, time)
    }

    /// Note-on. `velocity == 0` is a valid note-on in the MIDI spec (meaning
    /// note-off); callers that want an unambiguous note-off should use
    /// [`Message::note_off`].
    pub fn note_on(channel: u8, note: u8, velocity: u8, time: u32) -> Self {
        Self::channel_msg(NOTE_ON, channel, note & 0x7F, velocity & 0x7F, time)
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8, time: u32) -> Self {
        Self::channel_msg(NOTE_OFF, channel, note & 0x7F, velocity & 0x7F, time)
    }

    pub fn poly_pressure(channel: u8, note: u8, pressure: u8, time: u32) -> Self {
        Self::channel_msg(POLY_PRESSURE, channel, note & 0x7F, pressure & 0x7F, time)
    }

    pub fn control_change(channel: u8, controller: u8, value: u8, time: u32) -> Self {
        Self::channel_msg(CONTROL_CHANGE, channel, controller & 0x7F, value & 0x7F, time)
    }

    pub fn program_change(channel: u8, program: u8, time: u32) -> Self {
        Self::channel_msg(PROGRAM_CHANGE, channel, program & 0x7F, 0, time)
    }

    pub fn channel_pressure(channel: u8, pressure: u8, time: u32) -> Self {
        Self::channel_msg(CHANNEL_PRESSURE, channel, pressure & 0x7F, 0, time)
    }

    /// `value` is a signed 14-bit bend, 0 at the center (callers work in
    /// `-8192..=8191`, internally remapped to the 0..16383 wire range).
    pub fn pitch_bend(channel: u8, value: i16, time: u32) -> Self {
        let raw = (value as i32 + 8192).clamp(0, 16383) as u16;
        Self::channel_msg(
            PITCH_BEND,
            channel,
            (raw & 0x7F) as u8,
            ((raw >> 7) & 0x7F) as u8,
            time,
        )
    }

    pub fn sysex(payload: Vec<u8>, time: u32) -> Self {
        let mut msg = Self::raw(SYSEX_START, 0, 0, time);
        msg.sysex = Some(payload);
        msg
    }

    fn meta_raw(meta_type: u8, time: u32) -> Self {
        Self::raw(META, meta_type, 0, time)
    }

    pub fn meta_tempo(usecs_per_quarter: u32, time: u32) -> Self {
        let mut msg = Self::meta_raw(META_TEMPO, time);
        msg.sysex = Some(usecs_per_quarter.to_be_bytes()[1..].to_vec());
        msg
    }

    pub fn meta_time_signature(numerator: u8, denominator_pow2: u8, time: u32) -> Self {
        let mut msg = Self::meta_raw(META_TIME_SIGNATURE, time);
        msg.data2 = numerator;
        msg.sysex = Some(vec![denominator_pow2]);
        msg
    }

    pub fn meta_key_signature(sharps_flats: i8, minor: bool, time: u32) -> Self {
        let mut msg = Self::meta_raw(META_KEY_SIGNATURE, time);
        msg.data2 = sharps_flats as u8;
        msg.sysex = Some(vec![minor as u8]);
        msg
    }

    pub fn meta_marker(text: String, time: u32) -> Self {
        let mut msg = Self::meta_raw(META_MARKER, time);
        msg.text = Some(text);
        msg
    }

    pub fn meta_track_name(text: String, time: u32) -> Self {
        let mut msg = Self::meta_raw(META_TRACK_NAME, time);
        msg.text = Some(text);
        msg
    }

    pub fn meta_end_of_track(time: u32) -> Self {
        Self::meta_raw(META_END_OF_TRACK, time)
    }

    /// A synthetic beat marker (§4.4). Never consumes a real track event and
    /// never reaches an [`crate::driver::OutputDriver`] (meta events are never
    /// sent, §6) — it exists purely to drive beat/measure counters and the
    /// GUI notifier.
    pub fn beat_marker(time: u32) -> Self {
        Self::meta_raw(META_BEAT_MARKER, time)
    }

    pub fn is_beat_marker(&self) -> bool {
        self.is_meta_type(META_BEAT_MARKER)
    }

    // -- accessors ------------------------------------------------------

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn data1(&self) -> u8 {
        self.data1
    }

    pub fn data2(&self) -> u8 {
        self.data2
    }

    pub fn time(&self) -> u32 {
        self.time
    }

    pub fn set_time(&mut self, time: u32) {
        self.time = time;
    }

    pub fn sysex_data(&self) -> Option<&[u8]> {
        self.sysex.as_deref()
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Channel 0..=15 for channel messages; `None` for meta/sysex/system messages.
    pub fn channel(&self) -> Option<u8> {
        self.is_channel_msg().then_some(self.status & 0x0F)
    }

    pub fn set_channel(&mut self, channel: u8) {
        if self.is_channel_msg() {
            self.status = (self.status & 0xF0) | (channel & 0x0F);
        }
    }

    // -- predicates -------------------------------------------------------

    pub fn is_channel_msg(&self) -> bool {
        matches!(self.status & 0xF0, 0x80..=0xE0)
    }

    pub fn is_note_on(&self) -> bool {
        self.status & 0xF0 == NOTE_ON && self.data2 > 0
    }

    pub fn is_note_off(&self) -> bool {
        (self.status & 0xF0 == NOTE_OFF) || (self.status & 0xF0 == NOTE_ON && self.data2 == 0)
    }

    pub fn is_poly_pressure(&self) -> bool {
        self.status & 0xF0 == POLY_PRESSURE
    }

    pub fn is_control_change(&self) -> bool {
        self.status & 0xF0 == CONTROL_CHANGE
    }

    pub fn is_program_change(&self) -> bool {
        self.status & 0xF0 == PROGRAM_CHANGE
    }

    pub fn is_pitch_bend(&self) -> bool {
        self.status & 0xF0 == PITCH_BEND
    }

    pub fn is_sysex(&self) -> bool {
        self.status == SYSEX_START || self.status == SYSEX_CONT
    }

    pub fn is_meta(&self) -> bool {
        self.status == META
    }

    pub fn is_meta_type(&self, meta_type: u8) -> bool {
        self.is_meta() && self.data1 == meta_type
    }

    pub fn is_tempo(&self) -> bool {
        self.is_meta_type(META_TEMPO)
    }

    pub fn is_time_signature(&self) -> bool {
        self.is_meta_type(META_TIME_SIGNATURE)
    }

    pub fn is_key_signature(&self) -> bool {
        self.is_meta_type(META_KEY_SIGNATURE)
    }

    pub fn is_marker(&self) -> bool {
        self.is_meta_type(META_MARKER)
    }

    pub fn is_track_name(&self) -> bool {
        self.is_meta_type(META_TRACK_NAME)
    }

    pub fn is_end_of_track(&self) -> bool {
        self.is_meta_type(META_END_OF_TRACK)
    }

    /// Decodes a [`Message::meta_tempo`] payload back into microseconds per
    /// quarter note.
    pub fn tempo_usecs_per_quarter(&self) -> Option<u32> {
        if !self.is_tempo() {
            return None;
        }
        let bytes = self.sysex.as_deref()?;
        if bytes.len() != 3 {
            return None;
        }
        Some(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    pub fn tempo_bpm(&self) -> Option<f64> {
        self.tempo_usecs_per_quarter()
            .map(|usecs| 60_000_000.0 / usecs as f64)
    }

    pub fn time_signature(&self) -> Option<(u8, u8)> {
        if !self.is_time_signature() {
            return None;
        }
        let denom_pow2 = *self.sysex.as_deref()?.first()?;
        Some((self.data2, 1u8 << denom_pow2))
    }

    pub fn key_signature(&self) -> Option<(i8, bool)> {
        if !self.is_key_signature() {
            return None;
        }
        let minor = *self.sysex.as_deref()?.first()? != 0;
        Some((self.data2 as i8, minor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_roundtrip() {
        let m = Message::note_on(2, 60, 100, 480);
        assert!(m.is_note_on());
        assert!(!m.is_note_off());
        assert_eq!(m.channel(), Some(2));
        assert_eq!(m.data1(), 60);
        assert_eq!(m.data2(), 100);
        assert_eq!(m.time(), 480);
    }

    #[test]
    fn zero_velocity_note_on_is_note_off() {
        let m = Message::note_on(0, 60, 0, 0);
        assert!(!m.is_note_on());
        assert!(m.is_note_off());
    }

    #[test]
    fn sysex_payload_present_only_for_sysex_status() {
        let m = Message::sysex(vec![0x41, 0x10, 0xF7], 0);
        assert!(m.is_sysex());
        assert_eq!(m.sysex_data(), Some(&[0x41, 0x10, 0xF7][..]));

        let note = Message::note_on(0, 1, 1, 0);
        assert!(note.sysex_data().is_none());
    }

    #[test]
    fn meta_type_present_only_when_status_is_meta() {
        let tempo = Message::meta_tempo(500_000, 0);
        assert!(tempo.is_meta());
        assert!(tempo.is_tempo());
        assert_eq!(tempo.tempo_bpm(), Some(120.0));

        let note = Message::note_on(0, 1, 1, 0);
        assert!(!note.is_meta());
        assert_eq!(note.tempo_bpm(), None);
    }

    #[test]
    fn time_signature_decodes() {
        let ts = Message::meta_time_signature(3, 2, 0); // 3/4
        assert_eq!(ts.time_signature(), Some((3, 4)));
    }

    #[test]
    fn beat_marker_is_meta_but_not_end_of_track() {
        let bm = Message::beat_marker(240);
        assert!(bm.is_beat_marker());
        assert!(bm.is_meta());
        assert!(!bm.is_end_of_track());
    }

    #[test]
    fn channel_is_masked_into_low_nibble() {
        let m = Message::control_change(17, 7, 100, 0);
        assert_eq!(m.channel(), Some(1));
    }
}
