//! [`Track`]: an ordered sequence of timestamped [`Message`]s plus the
//! bookkeeping a [`crate::multitrack::Multitrack`] and the routing fabric need to
//! treat it as a playable/recordable unit (§3).

use crate::message::Message;

/// How a track's channel content classifies, used by the GUI-facing notifier and
/// by the recorder to decide whether a track is a sane "main"/conductor track.
/// Matches the five-way split spec.md calls out in §3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackKind {
    /// No channel events at all — only meta/sysex, or nothing but the sentinel.
    Empty,
    /// No channel events, but carries tempo/timesig/keysig/marker meta events.
    /// Conventionally track 0.
    Main,
    /// Every channel event in the track uses the same channel.
    SingleChannel(u8),
    /// Channel events use more than one channel, but each of a track's
    /// note-on/note-off pairs stays on one channel (well-formed multi-channel
    /// track, e.g. merged from several single-channel tracks).
    MixedChannel,
    /// Channel content doesn't fit either of the above — e.g. channel changes
    /// mid-stream in a way that isn't simply "several channels coexisting".
    IrregularChannel,
}

/// A single track: messages in non-decreasing time order, always terminated by
/// an end-of-track meta event (§3, "always-present end-of-track sentinel").
///
/// Invariant: `events` is never empty (the sentinel alone satisfies that) and
/// `events.last()` is always `is_end_of_track()`. Every insert/delete operation
/// re-establishes this before returning.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Track {
    events: Vec<Message>,
    /// Output driver this track is routed to when played (`None` = unassigned,
    /// silently dropped by the `Manager`).
    out_port: Option<usize>,
    /// Input driver this track records from, and the channel recorded input is
    /// rechannelized to, if any (§4.9 Recorder).
    rec_in_port: Option<usize>,
    rec_channel: Option<u8>,
}

impl Track {
    /// A fresh track holding only the end-of-track sentinel at time 0.
    pub fn new() -> Self {
        Track {
            events: vec![Message::meta_end_of_track(0)],
            out_port: None,
            rec_in_port: None,
            rec_channel: None,
        }
    }

    pub fn events(&self) -> &[Message] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty_of_events(&self) -> bool {
        self.events.len() <= 1
    }

    pub fn end_time(&self) -> u32 {
        self.events.last().map(Message::time).unwrap_or(0)
    }

    pub fn out_port(&self) -> Option<usize> {
        self.out_port
    }

    pub fn set_out_port(&mut self, port: Option<usize>) {
        self.out_port = port;
    }

    pub fn rec_in_port(&self) -> Option<usize> {
        self.rec_in_port
    }

    pub fn rec_channel(&self) -> Option<u8> {
        self.rec_channel
    }

    pub fn set_recording(&mut self, in_port: Option<usize>, channel: Option<u8>) {
        self.rec_in_port = in_port;
        self.rec_channel = channel;
    }

    /// Classifies the track's channel content per [`TrackKind`].
    pub fn kind(&self) -> TrackKind {
        let mut channel = None;
        let mut mixed = false;
        let mut has_channel_events = false;

        for ev in &self.events {
            let Some(ch) = ev.channel() else { continue };
            has_channel_events = true;
            match channel {
                None => channel = Some(ch),
                Some(c) if c == ch => {}
                Some(_) => mixed = true,
            }
        }

        if !has_channel_events {
            return if self.has_meta_events() {
                TrackKind::Main
            } else {
                TrackKind::Empty
            };
        }

        if mixed {
            TrackKind::MixedChannel
        } else {
            TrackKind::SingleChannel(channel.unwrap())
        }
    }

    fn has_meta_events(&self) -> bool {
        self.events
            .iter()
            .any(|e| e.is_meta() && !e.is_end_of_track())
    }

    /// Inserts `msg` keeping `events` in non-decreasing time order. Ties are
    /// broken by insertion order (new event goes after existing events with the
    /// same timestamp), matching the multitrack iterator's own stability rule
    /// (§4.3) so a freshly-inserted event never jumps ahead of same-tick events
    /// already present.
    ///
    /// The end-of-track sentinel is never displaced: if `msg.time()` is at or
    /// past it, the sentinel's time is pushed forward to stay last.
    pub fn insert(&mut self, msg: Message) {
        if msg.is_end_of_track() {
            return;
        }
        let sentinel_idx = self.events.len() - 1;
        let pos = self.events[..sentinel_idx]
            .partition_point(|e| e.time() <= msg.time());
        self.events.insert(pos, msg);
        let last = self.events.len() - 1;
        if self.events[last - 1].time() > self.events[last].time() {
            let t = self.events[last - 1].time();
            self.events[last].set_time(t);
        }
    }

    /// Removes the event at `index`. Refuses to remove the sentinel.
    pub fn delete(&mut self, index: usize) -> bool {
        if index >= self.events.len() - 1 {
            return false;
        }
        self.events.remove(index);
        true
    }

    /// Replaces every event with `start <= time() < end` with `replacement`,
    /// re-sorting so the non-decreasing invariant holds. Used by the recorder's
    /// "prepare track" step (§4.9) to punch a clean hole before splicing in new
    /// material.
    pub fn replace_interval(&mut self, start: u32, end: u32, replacement: Vec<Message>) {
        self.clear_interval(start, end);
        for m in replacement {
            self.insert(m);
        }
    }

    /// Removes every event with `start <= time() < end`, sentinel excluded.
    pub fn clear_interval(&mut self, start: u32, end: u32) {
        let sentinel = self.events.len() - 1;
        let mut i = 0;
        while i < sentinel.min(self.events.len().saturating_sub(1)) {
            let t = self.events[i].time();
            if t >= start && t < end {
                self.events.remove(i);
            } else {
                i += 1;
            }
        }
    }

    /// Finds every still-open note-on (no matching note-off yet) and every
    /// sustained damper pedal at `time`, returning the note-offs / pedal-up
    /// events needed to cleanly truncate playback there. Used when recording
    /// punches in mid-track (§4.9, "truncation of open notes/pedal/pitch-bend").
    pub fn open_notes_before(&self, time: u32) -> Vec<Message> {
        let mut on = hashbrown::HashMap::<(u8, u8), bool>::new();
        for ev in &self.events {
            if ev.time() >= time {
                break;
            }
            if let Some(ch) = ev.channel() {
                if ev.is_note_on() {
                    on.insert((ch, ev.data1()), true);
                } else if ev.is_note_off() {
                    on.insert((ch, ev.data1()), false);
                }
            }
        }
        on.into_iter()
            .filter_map(|((ch, note), is_on)| {
                is_on.then(|| Message::note_off(ch, note, 0, time))
            })
            .collect()
    }

    /// Like [`Track::open_notes_before`], but also closes any sustained damper
    /// pedal and non-center pitch bend active at `time`, matching
    /// `original_source/src/recorder.cpp`'s `CloseOpenEvents` (truncating a
    /// track at a recording window boundary must not leave a stuck pedal or a
    /// bent note behind).
    pub fn close_open_events(&self, time: u32) -> Vec<Message> {
        let mut on = hashbrown::HashMap::<(u8, u8), bool>::new();
        let mut damper = [false; 16];
        let mut bend = [0i16; 16];
        for ev in &self.events {
            if ev.time() >= time {
                break;
            }
            let Some(ch) = ev.channel() else { continue };
            if ev.is_note_on() {
                on.insert((ch, ev.data1()), true);
            } else if ev.is_note_off() {
                on.insert((ch, ev.data1()), false);
            } else if ev.is_control_change() && ev.data1() == crate::message::CC_DAMPER_PEDAL {
                damper[ch as usize] = ev.data2() >= 64;
            } else if ev.is_pitch_bend() {
                let raw = (ev.data1() as i32) | ((ev.data2() as i32) << 7);
                bend[ch as usize] = (raw - 8192) as i16;
            }
        }
        let mut out: Vec<Message> = on
            .into_iter()
            .filter_map(|((ch, note), is_on)| is_on.then(|| Message::note_off(ch, note, 0, time)))
            .collect();
        for (ch, &down) in damper.iter().enumerate() {
            if down {
                out.push(Message::control_change(ch as u8, crate::message::CC_DAMPER_PEDAL, 0, time));
            }
        }
        for (ch, &value) in bend.iter().enumerate() {
            if value != 0 {
                out.push(Message::pitch_bend(ch as u8, 0, time));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_track_has_only_sentinel() {
        let t = Track::new();
        assert_eq!(t.len(), 1);
        assert!(t.events()[0].is_end_of_track());
        assert!(t.is_empty_of_events());
    }

    #[test]
    fn insert_keeps_non_decreasing_order() {
        let mut t = Track::new();
        t.insert(Message::note_on(0, 60, 100, 100));
        t.insert(Message::note_off(0, 60, 0, 50));
        let times: Vec<u32> = t.events().iter().map(Message::time).collect();
        assert_eq!(times, vec![50, 100, 100]);
        assert!(t.events().last().unwrap().is_end_of_track());
    }

    #[test]
    fn classification_single_channel() {
        let mut t = Track::new();
        t.insert(Message::note_on(3, 60, 100, 0));
        t.insert(Message::note_off(3, 60, 0, 10));
        assert_eq!(t.kind(), TrackKind::SingleChannel(3));
    }

    #[test]
    fn classification_main_track() {
        let mut t = Track::new();
        t.insert(Message::meta_tempo(500_000, 0));
        assert_eq!(t.kind(), TrackKind::Main);
    }

    #[test]
    fn classification_mixed_channel() {
        let mut t = Track::new();
        t.insert(Message::note_on(0, 60, 100, 0));
        t.insert(Message::note_on(1, 61, 100, 0));
        assert_eq!(t.kind(), TrackKind::MixedChannel);
    }

    #[test]
    fn clear_interval_leaves_sentinel() {
        let mut t = Track::new();
        t.insert(Message::note_on(0, 60, 100, 10));
        t.clear_interval(0, 20);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn open_notes_before_reports_unclosed_note() {
        let mut t = Track::new();
        t.insert(Message::note_on(0, 60, 100, 0));
        let open = t.open_notes_before(50);
        assert_eq!(open.len(), 1);
        assert!(open[0].is_note_off());
        assert_eq!(open[0].data1(), 60);
    }

    #[test]
    fn close_open_events_releases_pedal_and_bend() {
        let mut t = Track::new();
        t.insert(Message::control_change(0, crate::message::CC_DAMPER_PEDAL, 127, 0));
        t.insert(Message::pitch_bend(0, 2000, 0));
        let closers = t.close_open_events(100);
        assert!(closers.iter().any(|m| m.is_control_change()
            && m.data1() == crate::message::CC_DAMPER_PEDAL
            && m.data2() == 0));
        assert!(closers.iter().any(|m| m.is_pitch_bend()));
    }
}
