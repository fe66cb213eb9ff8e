//! [`TrackProcessor`]: the per-track transform chain a [`crate::sequencer::Sequencer`]
//! runs every outgoing event through (§4.5).

use crate::message::Message;

/// Solo state, mirroring the original's three-way flag rather than a plain
/// bool: a track can be soloed, explicitly excluded by another track's solo, or
/// simply not participating in any solo at all. Needed because "is this track
/// audible" depends on whether *any* track in the multitrack is soloed, which
/// `TrackProcessor` alone can't know — `Sequencer` resolves it (§4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Solo {
    #[default]
    NoSolo,
    Soloed,
    NotSoloed,
}

/// Per-track callback for effects the built-in transforms don't cover (e.g. an
/// arpeggiator or a custom scale-quantizer). Mirrors the teacher's
/// `Conductor`-supplied per-step hooks, generalized from "decide what plays" to
/// "transform what already plays".
pub trait ExtraProcessor: Send {
    fn process(&mut self, msg: Message) -> Option<Message>;
}

/// The mute/solo/velocity/rechannel/transpose pipeline a single track's output
/// passes through before reaching a driver.
///
/// Transform order (§4.5): mute/solo gate first (nothing downstream runs on a
/// gated-out event), then velocity scaling, then transpose, then rechannel,
/// then the optional extra processor last so user code always sees the final
/// channel/pitch the driver will receive.
#[derive(Default)]
pub struct TrackProcessor {
    pub mute: bool,
    pub solo: Solo,
    /// Multiplier applied to note-on/note-off velocity, clamped into 0..=127.
    pub velocity_scale: f32,
    /// Semitone shift applied to note-on/note-off/poly-pressure pitch.
    pub transpose: i8,
    /// Remap this track's channel messages to a fixed output channel.
    pub rechannel: Option<u8>,
    pub extra_proc: Option<Box<dyn ExtraProcessor>>,
}

impl TrackProcessor {
    pub fn new() -> Self {
        TrackProcessor {
            mute: false,
            solo: Solo::NoSolo,
            velocity_scale: 1.0,
            transpose: 0,
            rechannel: None,
            extra_proc: None,
        }
    }

    /// Whether this track's events should reach the output, given whether any
    /// track at all is currently soloed.
    pub fn is_audible(&self, any_track_soloed: bool) -> bool {
        if self.mute {
            return false;
        }
        match self.solo {
            Solo::Soloed => true,
            Solo::NotSoloed => false,
            Solo::NoSolo => !any_track_soloed,
        }
    }

    /// Runs `msg` through the pipeline, returning `None` if the extra
    /// processor or an out-of-range transpose drops it. The mute/solo gate is
    /// the caller's responsibility via [`TrackProcessor::is_audible`] since it
    /// depends on sibling tracks; everything downstream of that gate runs in
    /// the order the original's `MIDISequencerTrackProcessor::Process` does
    /// (`original_source/src/sequencer.cpp`): extra processor first, then
    /// rechannel, then velocity scaling (note-on only), then transpose last so
    /// an out-of-range result is the final word on whether the event survives.
    pub fn process(&mut self, mut msg: Message) -> Option<Message> {
        if let Some(p) = &mut self.extra_proc {
            msg = p.process(msg)?;
        }

        if msg.is_channel_msg() {
            if let Some(ch) = self.rechannel {
                msg.set_channel(ch);
            }

            if msg.is_note_on() {
                let scaled = (msg.data2() as f32 * self.velocity_scale).round().clamp(0.0, 127.0) as u8;
                msg = Message::note_on(msg.channel().unwrap_or(0), msg.data1(), scaled, msg.time());
            }

            if msg.is_note_on() || msg.is_note_off() || msg.is_poly_pressure() {
                let new_note = msg.data1() as i16 + self.transpose as i16;
                if !(0..=127).contains(&new_note) {
                    return None;
                }
                msg = match () {
                    _ if msg.is_note_on() => {
                        Message::note_on(msg.channel().unwrap_or(0), new_note as u8, msg.data2(), msg.time())
                    }
                    _ if msg.is_note_off() => {
                        Message::note_off(msg.channel().unwrap_or(0), new_note as u8, msg.data2(), msg.time())
                    }
                    _ => Message::poly_pressure(msg.channel().unwrap_or(0), new_note as u8, msg.data2(), msg.time()),
                };
            }
        }

        Some(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mute_silences_regardless_of_solo() {
        let mut p = TrackProcessor::new();
        p.mute = true;
        p.solo = Solo::Soloed;
        assert!(!p.is_audible(true));
    }

    #[test]
    fn solo_takes_priority_over_other_tracks() {
        let mut soloed = TrackProcessor::new();
        soloed.solo = Solo::Soloed;
        assert!(soloed.is_audible(true));

        let mut bystander = TrackProcessor::new();
        assert!(!bystander.is_audible(true));
        assert!(bystander.is_audible(false));
    }

    #[test]
    fn transpose_and_velocity_scale_apply_to_notes() {
        let mut p = TrackProcessor::new();
        p.transpose = 12;
        p.velocity_scale = 0.5;
        let out = p.process(Message::note_on(0, 60, 100, 0)).unwrap();
        assert_eq!(out.data1(), 72);
        assert_eq!(out.data2(), 50);
    }

    #[test]
    fn rechannel_overrides_channel() {
        let mut p = TrackProcessor::new();
        p.rechannel = Some(9);
        let out = p.process(Message::note_on(0, 60, 100, 0)).unwrap();
        assert_eq!(out.channel(), Some(9));
    }

    #[test]
    fn out_of_range_transpose_drops_the_note() {
        let mut p = TrackProcessor::new();
        p.transpose = -100;
        assert!(p.process(Message::note_on(0, 60, 100, 0)).is_none());
    }

    #[test]
    fn velocity_scale_does_not_touch_note_off() {
        let mut p = TrackProcessor::new();
        p.velocity_scale = 0.1;
        let out = p.process(Message::note_off(0, 60, 64, 0)).unwrap();
        assert_eq!(out.data2(), 64);
    }
}
