//! Per-track "running state": the minimal snapshot of a track's controller and
//! note state needed to reposition playback without replaying from zero (§3,
//! §4.5's "catch events before" semantics on unmute/solo).

/// Sentinel for "no program change has been seen yet".
pub const NO_PROGRAM: i16 = -1;

/// Tracks which notes are currently held down and how many overlapping damper
/// pedal presses are active, per channel. A note matrix instead of a simple
/// bitset because overlapping note-on events for the same pitch (a common
/// pattern in generative/live tracks) need a count, not a flag, to know when the
/// note has really gone silent.
#[derive(Clone, Debug)]
pub struct NoteMatrix {
    /// `[channel][note] = how many outstanding note-ons are holding it down`.
    counts: [[u8; 128]; 16],
    /// Damper pedal (`CC_DAMPER_PEDAL`) depress count per channel — counted the
    /// same way so a pedal released while another press is still active doesn't
    /// prematurely clear sustain.
    damper: [u8; 16],
}

impl Default for NoteMatrix {
    fn default() -> Self {
        NoteMatrix {
            counts: [[0; 128]; 16],
            damper: [0; 16],
        }
    }
}

impl NoteMatrix {
    pub fn note_on(&mut self, channel: u8, note: u8) {
        self.counts[channel as usize & 0x0F][note as usize & 0x7F] += 1;
    }

    /// Returns `true` if the note transitioned from held to silent.
    pub fn note_off(&mut self, channel: u8, note: u8) -> bool {
        let c = &mut self.counts[channel as usize & 0x0F][note as usize & 0x7F];
        if *c > 0 {
            *c -= 1;
        }
        *c == 0
    }

    pub fn is_on(&self, channel: u8, note: u8) -> bool {
        self.counts[channel as usize & 0x0F][note as usize & 0x7F] > 0
    }

    pub fn damper_down(&mut self, channel: u8) {
        self.damper[channel as usize & 0x0F] += 1;
    }

    pub fn damper_up(&mut self, channel: u8) -> bool {
        let c = &mut self.damper[channel as usize & 0x0F];
        if *c > 0 {
            *c -= 1;
        }
        *c == 0
    }

    pub fn damper_is_down(&self, channel: u8) -> bool {
        self.damper[channel as usize & 0x0F] > 0
    }

    /// Every currently-held `(channel, note)` pair, in no particular order. Used
    /// to emit note-offs when jumping playback position or stopping.
    pub fn held_notes(&self) -> Vec<(u8, u8)> {
        let mut out = Vec::new();
        for (ch, row) in self.counts.iter().enumerate() {
            for (note, &count) in row.iter().enumerate() {
                if count > 0 {
                    out.push((ch as u8, note as u8));
                }
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.counts = [[0; 128]; 16];
        self.damper = [0; 16];
    }
}

/// The reconstructable controller state of a single track, rebuilt by scanning
/// every event up to a target time rather than replaying them audibly (§4.5).
#[derive(Clone, Debug, Default)]
pub struct RunningState {
    /// Last program change per channel seen so far, `NO_PROGRAM` if none.
    pub program: [i16; 16],
    pub main_volume: [u8; 16],
    pub pan: [u8; 16],
    pub reverb: [u8; 16],
    pub chorus: [u8; 16],
    /// Signed pitch bend, `-8192..=8191`, matching [`crate::message::Message::pitch_bend`].
    pub pitch_bend: [i16; 16],
    pub notes: NoteMatrix,
    /// `true` once any note has sounded on this track — lets the `Sequencer`
    /// distinguish "silent because nothing has played yet" from "silent because
    /// every note has resolved".
    pub notes_on: bool,
    pub track_name: Option<String>,
    /// Whether `track_name` came from an explicit track-name meta event, as
    /// opposed to a fallback the conductor synthesized (§3's "got-good-name").
    pub got_good_name: bool,
}

impl RunningState {
    pub fn new() -> Self {
        RunningState {
            program: [NO_PROGRAM; 16],
            main_volume: [100; 16],
            pan: [64; 16],
            reverb: [0; 16],
            chorus: [0; 16],
            pitch_bend: [0; 16],
            notes: NoteMatrix::default(),
            notes_on: false,
            track_name: None,
            got_good_name: false,
        }
    }

    /// Folds one event into the running state without emitting any sound.
    /// Mirrors the transitions `Sequencer::scan_running_state` performs while
    /// fast-forwarding to a seek target.
    pub fn apply(&mut self, msg: &crate::message::Message) {
        use crate::message::*;
        let Some(ch) = msg.channel() else {
            if msg.is_track_name() {
                self.track_name = msg.text().map(str::to_owned);
                self.got_good_name = true;
            }
            return;
        };
        let ch = ch as usize;
        if msg.is_note_on() {
            self.notes.note_on(ch as u8, msg.data1());
            self.notes_on = true;
        } else if msg.is_note_off() {
            self.notes.note_off(ch as u8, msg.data1());
        } else if msg.is_program_change() {
            self.program[ch] = msg.data1() as i16;
        } else if msg.is_pitch_bend() {
            let raw = (msg.data1() as i32) | ((msg.data2() as i32) << 7);
            self.pitch_bend[ch] = (raw - 8192) as i16;
        } else if msg.is_control_change() {
            match msg.data1() {
                CC_MAIN_VOLUME => self.main_volume[ch] = msg.data2(),
                CC_PAN => self.pan[ch] = msg.data2(),
                CC_REVERB => self.reverb[ch] = msg.data2(),
                CC_CHORUS => self.chorus[ch] = msg.data2(),
                CC_DAMPER_PEDAL => {
                    if msg.data2() >= 64 {
                        self.notes.damper_down(ch as u8);
                    } else {
                        self.notes.damper_up(ch as u8);
                    }
                }
                _ => {}
            }
        }
    }

    /// Emits the messages needed to bring a driver up to date with this state
    /// without sounding any notes — used when un-muting or un-soloing a track
    /// mid-playback (§4.5, "catch events before").
    pub fn catch_up_messages(&self, time: u32) -> Vec<crate::message::Message> {
        use crate::message::{CC_CHORUS, CC_MAIN_VOLUME, CC_PAN, CC_REVERB};
        let mut out = Vec::new();
        for ch in 0..16u8 {
            let idx = ch as usize;
            if self.program[idx] != NO_PROGRAM {
                out.push(crate::message::Message::program_change(
                    ch,
                    self.program[idx] as u8,
                    time,
                ));
            }
            out.push(crate::message::Message::control_change(
                ch,
                CC_MAIN_VOLUME,
                self.main_volume[idx],
                time,
            ));
            out.push(crate::message::Message::control_change(
                ch, CC_PAN, self.pan[idx], time,
            ));
            out.push(crate::message::Message::control_change(
                ch, CC_REVERB, self.reverb[idx], time,
            ));
            out.push(crate::message::Message::control_change(
                ch, CC_CHORUS, self.chorus[idx], time,
            ));
            if self.pitch_bend[idx] != 0 {
                out.push(crate::message::Message::pitch_bend(
                    ch,
                    self.pitch_bend[idx],
                    time,
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn overlapping_note_ons_need_matching_offs() {
        let mut m = NoteMatrix::default();
        m.note_on(0, 60);
        m.note_on(0, 60);
        assert!(!m.note_off(0, 60));
        assert!(m.is_on(0, 60));
        assert!(m.note_off(0, 60));
        assert!(!m.is_on(0, 60));
    }

    #[test]
    fn running_state_tracks_program_and_volume() {
        let mut rs = RunningState::new();
        rs.apply(&Message::program_change(2, 40, 0));
        rs.apply(&Message::control_change(2, crate::message::CC_MAIN_VOLUME, 90, 10));
        assert_eq!(rs.program[2], 40);
        assert_eq!(rs.main_volume[2], 90);
    }

    #[test]
    fn damper_pedal_tracks_depress_and_release() {
        let mut rs = RunningState::new();
        rs.apply(&Message::control_change(0, crate::message::CC_DAMPER_PEDAL, 127, 0));
        assert!(rs.notes.damper_is_down(0));
        rs.apply(&Message::control_change(0, crate::message::CC_DAMPER_PEDAL, 0, 10));
        assert!(!rs.notes.damper_is_down(0));
    }

    #[test]
    fn track_name_meta_sets_got_good_name() {
        let mut rs = RunningState::new();
        rs.apply(&Message::meta_track_name("Bass".to_string(), 0));
        assert_eq!(rs.track_name.as_deref(), Some("Bass"));
        assert!(rs.got_good_name);
    }
}
