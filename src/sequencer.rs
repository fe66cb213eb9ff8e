//! [`Sequencer`]: the composite that ties a [`Multitrack`], per-track
//! [`RunningState`], and per-track [`TrackProcessor`] together into a single
//! navigable, playable unit (§4.4), plus [`SequencerComponent`], the
//! [`TickComponent`] adapter a [`crate::manager::Manager`] actually drives.

use std::sync::{Arc, Mutex};

use crate::error::SeqError;
use crate::message::Message;
use crate::multitrack::Multitrack;
use crate::notify::{Group, Notifier, NotifierEvent, NullNotifier, Subgroup};
use crate::processor::{Solo, TrackProcessor};
use crate::running_state::RunningState;
use crate::tick::{Priority, TickComponent};

#[derive(Clone, Copy, Debug)]
struct Cursor {
    next_index: usize,
    next_time: u32,
}

const DEFAULT_TEMPO_USECS: u32 = 500_000; // 120 BPM
const DEFAULT_TIMESIG: (u8, u8) = (4, 4);

/// Walks every track of a [`Multitrack`] in time order while keeping each
/// track's [`RunningState`] up to date, and maps between MIDI ticks and
/// wall-clock milliseconds via the tempo events found on track 0 (§4.6).
///
/// Beyond the per-track state, `Sequencer` also tracks the conductor-level
/// "sequencer state" of §3: current tempo, time signature, key signature,
/// marker text, and the beat/measure counters synthesized from
/// [`Sequencer::get_next_event`]'s beat-marker logic (§4.4 step 4).
pub struct Sequencer {
    multitrack: Multitrack,
    processors: Vec<TrackProcessor>,
    running_states: Vec<RunningState>,
    cursors: Vec<Cursor>,
    clock: u32,
    cur_time_ms: f64,
    last_event_track: usize,

    cur_tempo_usecs: u32,
    /// Global tempo scale as a percent, 100 = identity (§4.6). Applied to
    /// every tempo encountered while converting between ticks and
    /// milliseconds, on top of whatever BPM track 0's tempo map says.
    tempo_scale: u32,
    cur_timesig: (u8, u8),
    cur_keysig: Option<(i8, bool)>,
    cur_marker: Option<String>,
    cur_beat: u32,
    cur_measure: u32,
    next_beat_time: u32,

    /// Inclusive/exclusive measure range for repeat-play (§8 scenario 6). `None`
    /// means play straight through with no looping.
    repeat_range: Option<(u32, u32)>,

    /// `(time, usecs_per_quarter)`, ascending, scanned from track 0.
    tempo_map: Vec<(u32, u32)>,
    /// `(time, numerator, denominator)`, ascending, scanned from track 0.
    /// Empty means 4/4 throughout (§4, Conductor-track timesig fallback).
    timesig_map: Vec<(u32, u8, u8)>,

    notifier: Arc<dyn Notifier>,
}

impl Sequencer {
    pub fn new(multitrack: Multitrack) -> Result<Self, SeqError> {
        Self::with_notifier(multitrack, Arc::new(NullNotifier))
    }

    pub fn with_notifier(multitrack: Multitrack, notifier: Arc<dyn Notifier>) -> Result<Self, SeqError> {
        if multitrack.ticks_per_beat() == 0 {
            return Err(SeqError::InvalidArgument("ticks_per_beat must be nonzero"));
        }
        let tempo_map = scan_tempo_map(&multitrack);
        let timesig_map = scan_timesig_map(&multitrack);
        let n = multitrack.num_tracks();
        let mut seq = Sequencer {
            multitrack,
            processors: (0..n).map(|_| TrackProcessor::new()).collect(),
            running_states: (0..n).map(|_| RunningState::new()).collect(),
            cursors: Vec::new(),
            clock: 0,
            cur_time_ms: 0.0,
            last_event_track: 0,
            cur_tempo_usecs: DEFAULT_TEMPO_USECS,
            tempo_scale: 100,
            cur_timesig: DEFAULT_TIMESIG,
            cur_keysig: None,
            cur_marker: None,
            cur_beat: 0,
            cur_measure: 0,
            next_beat_time: 0,
            repeat_range: None,
            tempo_map,
            timesig_map,
            notifier,
        };
        seq.reset_cursors();
        Ok(seq)
    }

    /// Replaces the loaded multitrack and rebuilds every derived table (tempo
    /// map, timesig map, per-track processors/running state). Existing mute/
    /// solo/transpose settings are not preserved across a load — callers that
    /// want that re-apply them afterward.
    pub fn load(&mut self, multitrack: Multitrack) -> Result<(), SeqError> {
        let notifier = self.notifier.clone();
        *self = Sequencer::with_notifier(multitrack, notifier)?;
        Ok(())
    }

    pub fn multitrack(&self) -> &Multitrack {
        &self.multitrack
    }

    pub fn multitrack_mut(&mut self) -> &mut Multitrack {
        &mut self.multitrack
    }

    pub fn processor(&self, track: usize) -> Option<&TrackProcessor> {
        self.processors.get(track)
    }

    pub fn processor_mut(&mut self, track: usize) -> Option<&mut TrackProcessor> {
        self.processors.get_mut(track)
    }

    pub fn current_time(&self) -> u32 {
        self.clock
    }

    pub fn current_time_ms(&self) -> f64 {
        self.cur_time_ms
    }

    pub fn cur_beat(&self) -> u32 {
        self.cur_beat
    }

    pub fn cur_measure(&self) -> u32 {
        self.cur_measure
    }

    pub fn cur_timesig(&self) -> (u8, u8) {
        self.cur_timesig
    }

    pub fn cur_tempo_bpm(&self) -> f64 {
        60_000_000.0 / self.cur_tempo_usecs as f64
    }

    pub fn tempo_scale(&self) -> u32 {
        self.tempo_scale
    }

    /// Sets the global tempo scale percent (§4.6; 100 = identity). Applied on
    /// top of track 0's tempo map in every tick↔ms conversion, so e.g. a scale
    /// of 200 plays back at double speed without rewriting the tempo map.
    pub fn set_tempo_scale(&mut self, scale: u32) {
        self.tempo_scale = scale.max(1);
    }

    fn scaled_tempo_usecs(&self, usecs: u32) -> f64 {
        usecs as f64 * 100.0 / self.tempo_scale as f64
    }

    pub fn cur_keysig(&self) -> Option<(i8, bool)> {
        self.cur_keysig
    }

    pub fn cur_marker(&self) -> Option<&str> {
        self.cur_marker.as_deref()
    }

    pub fn last_event_track(&self) -> usize {
        self.last_event_track
    }

    /// Sets a repeat-play measure window: once `cur_measure` reaches `end`,
    /// the next call to [`Sequencer::get_next_event`] jumps back to `start`
    /// instead of continuing (§8 scenario 6). Pass `None` to disable.
    pub fn set_repeat_range(&mut self, range: Option<(u32, u32)>) {
        self.repeat_range = range;
    }

    fn reset_cursors(&mut self) {
        self.cursors = self
            .multitrack
            .tracks()
            .iter()
            .map(|t| Cursor {
                next_index: 0,
                next_time: t.events().first().map(Message::time).unwrap_or(0),
            })
            .collect();
        self.clock = 0;
        self.cur_time_ms = 0.0;
        self.last_event_track = 0;
        self.cur_tempo_usecs = DEFAULT_TEMPO_USECS;
        self.cur_timesig = DEFAULT_TIMESIG;
        self.cur_keysig = None;
        self.cur_marker = None;
        self.cur_beat = 0;
        self.cur_measure = 0;
        self.next_beat_time = self.beat_length();
        for rs in &mut self.running_states {
            *rs = RunningState::new();
        }
    }

    pub fn go_to_zero(&mut self) {
        self.reset_cursors();
        self.notifier
            .notify(NotifierEvent::new(Group::All, Subgroup::All, None));
    }

    fn beat_length(&self) -> u32 {
        let tpb = self.multitrack.ticks_per_beat() as u32;
        let denom = self.cur_timesig.1.max(1) as u32;
        tpb * 4 / denom
    }

    /// Earliest upcoming real (non-synthetic) event time across every track
    /// still holding events, or `None` once every track is exhausted.
    fn iterator_next_time(&self) -> Option<u32> {
        self.cursors
            .iter()
            .enumerate()
            .filter(|(ti, c)| c.next_index + 1 < self.multitrack.tracks()[*ti].len())
            .map(|(_, c)| c.next_time)
            .min()
    }

    /// `min(next real event time, next beat-marker time)` — what spec.md §4.4
    /// calls `get_next_event_time`. Once every track has only its sentinel
    /// left, beat markers keep coming until `next_beat_time` passes the
    /// multitrack's overall end time, then `None` (§4.4, "end of song").
    pub fn get_next_event_time(&self) -> Option<u32> {
        match self.iterator_next_time() {
            Some(t) => Some(t.min(self.next_beat_time)),
            None => (self.next_beat_time <= self.multitrack.end_time()).then_some(self.next_beat_time),
        }
    }

    /// Picks the next event among every track whose cursor sits on the
    /// earliest time, breaking ties by ascending track index so the
    /// conductor track's simultaneous meta events always drain before a
    /// same-tick event on any other track (§4.4).
    fn advance_cursor(&mut self) -> Option<(usize, Message)> {
        let earliest = self.iterator_next_time()?;
        let n = self.cursors.len();
        let track_idx = (0..n).find(|&ti| {
            let c = self.cursors[ti];
            c.next_index + 1 < self.multitrack.tracks()[ti].len() && c.next_time == earliest
        })?;
        let cursor = self.cursors[track_idx];
        let event = self.multitrack.tracks()[track_idx].events()[cursor.next_index].clone();
        let next_index = cursor.next_index + 1;
        let next_time = self.multitrack.tracks()[track_idx]
            .events()
            .get(next_index)
            .map(Message::time)
            .unwrap_or(event.time());
        self.cursors[track_idx] = Cursor {
            next_index,
            next_time,
        };
        Some((track_idx, event))
    }

    /// Folds one conductor-track (track 0) event into the sequencer-level
    /// state and fires the matching notifier event. Only called while
    /// actually playing forward (§4.4) — `go_to_time`'s fast-forward scan
    /// updates the same fields silently, without notifying.
    fn apply_conductor_event(&mut self, msg: &Message, notify: bool) {
        if let Some(tempo) = msg.tempo_usecs_per_quarter() {
            self.cur_tempo_usecs = tempo;
            if notify {
                self.notifier
                    .notify(NotifierEvent::new(Group::Conductor, Subgroup::Tempo, None));
            }
        } else if let Some((num, den)) = msg.time_signature() {
            self.cur_timesig = (num, den);
            if notify {
                self.notifier
                    .notify(NotifierEvent::new(Group::Conductor, Subgroup::TimeSig, None));
            }
        } else if let Some(ks) = msg.key_signature() {
            self.cur_keysig = Some(ks);
            if notify {
                self.notifier
                    .notify(NotifierEvent::new(Group::Conductor, Subgroup::KeySig, None));
            }
        } else if msg.is_marker() {
            self.cur_marker = msg.text().map(str::to_owned);
            if notify {
                self.notifier
                    .notify(NotifierEvent::new(Group::Conductor, Subgroup::Marker, None));
            }
        }
    }

    /// Core playback primitive (§4.4). Returns the next `(track, message)` in
    /// chronological order, which may be a synthetic beat-marker delivered as
    /// track 0 rather than a real event — in that case the multitrack
    /// iterator is *not* advanced.
    pub fn get_next_event(&mut self) -> Option<(usize, Message)> {
        let iterator_time = self.iterator_next_time();
        let t = match iterator_time {
            Some(t) => t,
            None => {
                if self.next_beat_time > self.multitrack.end_time() {
                    self.notifier
                        .notify(NotifierEvent::new(Group::Transport, Subgroup::EndOfSong, None));
                    return None;
                }
                self.next_beat_time
            }
        };
        let new_clock = t.min(self.next_beat_time);
        self.clock = new_clock;
        self.cur_time_ms = self.midi_to_ms(new_clock);

        if self.next_beat_time <= t {
            let beat_time = self.next_beat_time;
            self.last_event_track = 0;
            let num = self.cur_timesig.0;
            self.cur_beat += 1;
            let mut crossed_measure = false;
            if self.cur_beat >= num.max(1) as u32 {
                self.cur_beat = 0;
                self.cur_measure += 1;
                crossed_measure = true;
            }
            self.next_beat_time = beat_time + self.beat_length();
            self.notifier
                .notify(NotifierEvent::new(Group::Transport, Subgroup::Beat, None));
            if crossed_measure {
                self.notifier
                    .notify(NotifierEvent::new(Group::Transport, Subgroup::Measure, None));
                if let Some((start, end)) = self.repeat_range {
                    if self.cur_measure >= end {
                        self.go_to_measure(start, 0);
                        return self.get_next_event();
                    }
                }
            }
            return Some((0, Message::beat_marker(beat_time)));
        }

        let (track, event) = self.advance_cursor()?;
        self.last_event_track = track;
        if track == 0 {
            self.apply_conductor_event(&event, true);
        }
        self.running_states[track].apply(&event);
        if event.channel().is_some() {
            self.notifier
                .notify(NotifierEvent::new(Group::Track, Subgroup::Note, Some(track)));
        }
        Some((track, event))
    }

    /// Repositions to `target` ticks, silently folding every skipped event into
    /// running state (no audible output, no notifier dispatch per event).
    /// Returns the note-off/pedal-up messages needed to silence whatever was
    /// sounding at the *old* position, since a seek can jump away mid-note (§4.5).
    pub fn go_to_time(&mut self, target: u32) -> Vec<Message> {
        let mut silence = Vec::new();
        if target < self.clock {
            for rs in &self.running_states {
                for (ch, note) in rs.notes.held_notes() {
                    silence.push(Message::note_off(ch, note, 0, self.clock));
                }
            }
            self.reset_cursors();
        }
        while let Some(t) = self.iterator_next_time() {
            if t >= target {
                break;
            }
            if self.next_beat_time <= t {
                // Fold beat markers silently so cur_beat/cur_measure stay
                // consistent without emitting notifier spam during a seek.
                self.cur_beat += 1;
                if self.cur_beat >= self.cur_timesig.0.max(1) as u32 {
                    self.cur_beat = 0;
                    self.cur_measure += 1;
                }
                self.next_beat_time += self.beat_length();
                continue;
            }
            match self.advance_cursor() {
                Some((track, event)) => {
                    if track == 0 {
                        self.apply_conductor_event(&event, false);
                    }
                    self.running_states[track].apply(&event);
                }
                None => break,
            }
        }
        // Real events may run out before `target` — keep the beat/measure
        // counters consistent with however far past that the seek still goes.
        while self.next_beat_time < target {
            self.cur_beat += 1;
            if self.cur_beat >= self.cur_timesig.0.max(1) as u32 {
                self.cur_beat = 0;
                self.cur_measure += 1;
            }
            self.next_beat_time += self.beat_length();
        }
        self.clock = target;
        self.cur_time_ms = self.midi_to_ms(target);
        self.notifier
            .notify(NotifierEvent::new(Group::All, Subgroup::All, None));
        silence
    }

    /// The tempo-scale-safe version of seeking by wall-clock time: always
    /// routes through [`Sequencer::ms_to_midi`] and [`Sequencer::go_to_time`]
    /// rather than mixing clock and tempo state directly, fixing the original's
    /// `go_to_time_ms` tempo-scale bug (§4, REDESIGN FLAG).
    pub fn go_to_time_ms(&mut self, ms: f64) -> Vec<Message> {
        let target = self.ms_to_midi(ms);
        self.go_to_time(target)
    }

    pub fn go_to_measure(&mut self, measure: u32, beat: u32) -> Vec<Message> {
        let target = self.measure_to_midi(measure, beat);
        self.go_to_time(target)
    }

    /// Converts a MIDI tick position into elapsed milliseconds since time 0,
    /// honoring every tempo change encountered along the way.
    pub fn midi_to_ms(&self, target: u32) -> f64 {
        let tpb = self.multitrack.ticks_per_beat().max(1) as f64;
        let mut ms = 0.0;
        let mut last_time = 0u32;
        let mut cur_tempo = self
            .tempo_map
            .first()
            .map(|&(_, tempo)| tempo)
            .unwrap_or(DEFAULT_TEMPO_USECS);
        for &(t, tempo) in &self.tempo_map {
            if t >= target {
                break;
            }
            ms += (t - last_time) as f64 / tpb * (self.scaled_tempo_usecs(cur_tempo) / 1000.0);
            last_time = t;
            cur_tempo = tempo;
        }
        ms += (target - last_time) as f64 / tpb * (self.scaled_tempo_usecs(cur_tempo) / 1000.0);
        ms
    }

    /// Inverse of [`Sequencer::midi_to_ms`].
    pub fn ms_to_midi(&self, target_ms: f64) -> u32 {
        let tpb = self.multitrack.ticks_per_beat().max(1) as f64;
        let mut acc_ms = 0.0;
        let mut last_time = 0u32;
        let mut cur_tempo = self
            .tempo_map
            .first()
            .map(|&(_, tempo)| tempo)
            .unwrap_or(DEFAULT_TEMPO_USECS);
        for &(t, tempo) in &self.tempo_map {
            if t <= last_time {
                cur_tempo = tempo;
                continue;
            }
            let scaled = self.scaled_tempo_usecs(cur_tempo);
            let seg_ms = (t - last_time) as f64 / tpb * (scaled / 1000.0);
            if acc_ms + seg_ms >= target_ms {
                let remaining_ms = target_ms - acc_ms;
                let ticks = remaining_ms * tpb * 1000.0 / scaled;
                return last_time + ticks.round() as u32;
            }
            acc_ms += seg_ms;
            last_time = t;
            cur_tempo = tempo;
        }
        let remaining_ms = (target_ms - acc_ms).max(0.0);
        let scaled = self.scaled_tempo_usecs(cur_tempo);
        let ticks = remaining_ms * tpb * 1000.0 / scaled;
        last_time + ticks.round() as u32
    }

    fn measure_to_midi(&self, target_measure: u32, beat: u32) -> u32 {
        let tpb = self.multitrack.ticks_per_beat().max(1) as u32;
        let mut last_time = 0u32;
        let mut measures_so_far = 0u32;
        let mut cur_num = DEFAULT_TIMESIG.0;
        let mut cur_den = DEFAULT_TIMESIG.1;
        for &(t, num, den) in &self.timesig_map {
            if measures_so_far >= target_measure {
                break;
            }
            let tpm = ticks_per_measure(tpb, cur_num, cur_den);
            let seg_ticks = t.saturating_sub(last_time);
            let seg_measures = if tpm == 0 { 0 } else { seg_ticks / tpm };
            if measures_so_far + seg_measures >= target_measure {
                let remaining = target_measure - measures_so_far;
                return last_time + remaining * tpm + beat * (tpb * 4 / cur_den.max(1) as u32);
            }
            measures_so_far += seg_measures;
            last_time += seg_measures * tpm;
            last_time = last_time.max(t);
            cur_num = num;
            cur_den = den;
        }
        let tpm = ticks_per_measure(tpb, cur_num, cur_den).max(1);
        last_time + (target_measure - measures_so_far) * tpm + beat * (tpb * 4 / cur_den.max(1) as u32)
    }

    fn any_soloed(&self) -> bool {
        self.processors.iter().any(|p| p.solo == Solo::Soloed)
    }

    /// Mutes/unmutes `track`, returning the catch-up messages needed to bring
    /// an output driver up to date if the track just became audible again
    /// (§4.5, "catch events before").
    pub fn set_mute(&mut self, track: usize, mute: bool) -> Vec<Message> {
        let any = self.any_soloed();
        let Some(was_audible) = self.processors.get(track).map(|p| p.is_audible(any)) else {
            return Vec::new();
        };
        self.processors[track].mute = mute;
        let now_audible = self.processors[track].is_audible(self.any_soloed());
        self.notifier
            .notify(NotifierEvent::new(Group::Track, Subgroup::Settings, Some(track)));
        if !was_audible && now_audible {
            self.running_states[track].catch_up_messages(self.clock)
        } else {
            Vec::new()
        }
    }

    /// Sets `track`'s solo state, returning catch-up messages for every track
    /// whose audibility just turned on as a side effect (soloing one track can
    /// silence others and un-soloing the last soloed track can re-admit them).
    pub fn set_solo(&mut self, track: usize, solo: Solo) -> Vec<Message> {
        let before: Vec<bool> = {
            let any = self.any_soloed();
            self.processors.iter().map(|p| p.is_audible(any)).collect()
        };
        if let Some(p) = self.processors.get_mut(track) {
            p.solo = solo;
        }
        let any = self.any_soloed();
        let mut out = Vec::new();
        for (i, proc) in self.processors.iter().enumerate() {
            if !before[i] && proc.is_audible(any) {
                out.extend(self.running_states[i].catch_up_messages(self.clock));
            }
        }
        self.notifier
            .notify(NotifierEvent::new(Group::Track, Subgroup::Settings, Some(track)));
        out
    }

    /// Solos exactly `track`, matching §4.4's "soloing track k sets that
    /// track's solo = SOLOED and all others = NOT_SOLOED".
    pub fn solo_track(&mut self, track: usize) -> Vec<Message> {
        let mut out = Vec::new();
        for i in 0..self.processors.len() {
            let solo = if i == track { Solo::Soloed } else { Solo::NotSoloed };
            out.extend(self.set_solo(i, solo));
        }
        out
    }

    /// Clears any solo, restoring `NO_SOLO` on every track.
    pub fn unsolo_all(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        for i in 0..self.processors.len() {
            out.extend(self.set_solo(i, Solo::NoSolo));
        }
        out
    }

    /// Whether `track` is currently audible under mute/solo rules, with the
    /// conductor track (0) always exempt (§4.4's "Muted or NOT_SOLOED
    /// messages are suppressed except for track 0").
    pub fn is_track_audible(&self, track: usize) -> bool {
        if track == 0 {
            return true;
        }
        let any = self.any_soloed();
        self.processors
            .get(track)
            .map(|p| p.is_audible(any))
            .unwrap_or(false)
    }
}

fn ticks_per_measure(ticks_per_beat: u32, numerator: u8, denominator: u8) -> u32 {
    if denominator == 0 {
        return numerator as u32 * ticks_per_beat * 4;
    }
    numerator as u32 * ticks_per_beat * 4 / denominator as u32
}

fn scan_tempo_map(multitrack: &Multitrack) -> Vec<(u32, u32)> {
    multitrack
        .track(0)
        .map(|t| {
            t.events()
                .iter()
                .filter_map(|e| e.tempo_usecs_per_quarter().map(|tempo| (e.time(), tempo)))
                .collect()
        })
        .unwrap_or_default()
}

fn scan_timesig_map(multitrack: &Multitrack) -> Vec<(u32, u8, u8)> {
    multitrack
        .track(0)
        .map(|t| {
            t.events()
                .iter()
                .filter_map(|e| e.time_signature().map(|(n, d)| (e.time(), n, d)))
                .collect()
        })
        .unwrap_or_default()
}

/// A [`TickComponent`] adapter driving a shared [`Sequencer`]: dispatches every
/// due event to the track's assigned output driver through `send`, applying
/// that track's [`TrackProcessor`] transform chain and the mute/solo gate
/// first. Playback position is derived from elapsed wall-clock time via
/// [`Sequencer::ms_to_midi`], never advanced directly by tick count, so pause/
/// resume and tempo changes stay correct without extra bookkeeping here.
pub struct SequencerComponent {
    seq: Arc<Mutex<Sequencer>>,
    send: Box<dyn FnMut(usize, &Message) + Send>,
    running: bool,
    /// Captured from the first `tick()` after `start()`, along with `base_ms`
    /// (the sequencer's own position at that moment) — together they let a
    /// resume pick up from wherever the sequencer is rather than snapping
    /// back to elapsed-time-since-the-manager-booted.
    start_sys_time_ms: u32,
    base_ms: f64,
    have_baseline: bool,
}

impl SequencerComponent {
    pub fn new(seq: Arc<Mutex<Sequencer>>, send: impl FnMut(usize, &Message) + Send + 'static) -> Self {
        SequencerComponent {
            seq,
            send: Box::new(send),
            running: false,
            start_sys_time_ms: 0,
            base_ms: 0.0,
            have_baseline: false,
        }
    }

    pub fn sequencer(&self) -> &Arc<Mutex<Sequencer>> {
        &self.seq
    }
}

impl TickComponent for SequencerComponent {
    fn priority(&self) -> Priority {
        Priority::Sequencer
    }

    fn start(&mut self) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        self.have_baseline = false;
        true
    }

    fn stop(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        true
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn tick(&mut self, sys_time_ms: u32) {
        if !self.running {
            return;
        }
        let mut seq = self.seq.lock().unwrap();
        if !self.have_baseline {
            self.start_sys_time_ms = sys_time_ms;
            self.base_ms = seq.current_time_ms();
            self.have_baseline = true;
        }
        let elapsed = sys_time_ms.saturating_sub(self.start_sys_time_ms) as f64;
        let target = seq.ms_to_midi(self.base_ms + elapsed);
        loop {
            let Some(t) = seq.get_next_event_time() else {
                self.running = false;
                break;
            };
            if t > target {
                break;
            }
            let prev_time = seq.current_time();
            let Some((track, event)) = seq.get_next_event() else {
                self.running = false;
                break;
            };
            // A repeat-play range (§4.4/§8 scenario 6) jumps the sequencer's
            // clock backward to `start` once `cur_measure` crosses `end`. The
            // wall-clock `target` computed above assumes a monotonically
            // advancing position, so it stays far ahead of the wrapped clock
            // and would otherwise keep this loop spinning through the whole
            // repeat range within a single tick. Detect the wrap, dispatch
            // this already-pulled event, then rebase the baseline to the new
            // position and let the rest of the catch-up span later ticks.
            let wrapped = seq.current_time() < prev_time;
            if !event.is_meta() && seq.is_track_audible(track) {
                if let Some(processor) = seq.processors.get_mut(track) {
                    if let Some(out) = processor.process(event) {
                        if let Some(port) = seq.multitrack.track(track).and_then(|t| t.out_port()) {
                            (self.send)(port, &out);
                        }
                    }
                }
            }
            if wrapped {
                self.start_sys_time_ms = sys_time_ms;
                self.base_ms = seq.current_time_ms();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::track::Track;
    use std::sync::{Arc, Mutex};

    fn multitrack_with_tempo() -> Multitrack {
        let mut mt = Multitrack::new(480);
        let mut conductor = Track::new();
        conductor.insert(Message::meta_tempo(500_000, 0)); // 120 BPM
        conductor.insert(Message::meta_time_signature(4, 2, 0)); // 4/4
        mt.push_track(conductor);
        let mut melody = Track::new();
        melody.insert(Message::note_on(0, 60, 100, 0));
        melody.insert(Message::note_off(0, 60, 0, 480));
        mt.push_track(melody);
        mt
    }

    #[test]
    fn midi_to_ms_and_back_roundtrip_at_constant_tempo() {
        let mt = multitrack_with_tempo();
        let seq = Sequencer::new(mt).unwrap();
        let ms = seq.midi_to_ms(480);
        assert!((ms - 500.0).abs() < 1.0);
        let ticks = seq.ms_to_midi(ms);
        assert!((ticks as i64 - 480).abs() <= 1);
    }

    #[test]
    fn iterates_events_and_updates_running_state() {
        let mt = multitrack_with_tempo();
        let mut seq = Sequencer::new(mt).unwrap();
        let (_, tempo_event) = seq.get_next_event().unwrap();
        assert!(tempo_event.is_tempo());
        let (_, timesig_event) = seq.get_next_event().unwrap();
        assert!(timesig_event.is_time_signature());
        let (track, note_on) = seq.get_next_event().unwrap();
        assert_eq!(track, 1);
        assert!(note_on.is_note_on());
    }

    #[test]
    fn beat_marker_is_synthesized_at_beat_boundary_without_consuming_track() {
        // One beat (480 ticks) with no events inside it: the sequencer must
        // synthesize a beat marker rather than starving.
        let mut mt = Multitrack::new(480);
        mt.push_track(Track::new()); // conductor, empty
        let mut melody = Track::new();
        melody.insert(Message::note_on(0, 60, 100, 600)); // after the first beat
        mt.push_track(melody);
        let mut seq = Sequencer::new(mt).unwrap();
        let (track, event) = seq.get_next_event().unwrap();
        assert_eq!(track, 0);
        assert!(event.is_beat_marker());
        assert_eq!(event.time(), 480);
        assert_eq!(seq.cur_beat(), 1);
    }

    #[test]
    fn beat_marker_cadence_advances_by_ticks_per_beat() {
        let mut mt = Multitrack::new(480);
        mt.push_track(Track::new());
        let mut melody = Track::new();
        melody.insert(Message::note_on(0, 60, 100, 2000));
        mt.push_track(melody);
        let mut seq = Sequencer::new(mt).unwrap();
        let (_, m1) = seq.get_next_event().unwrap();
        let (_, m2) = seq.get_next_event().unwrap();
        assert_eq!(m2.time() - m1.time(), 480);
    }

    #[test]
    fn beat_markers_stop_once_past_end_of_song() {
        let mut mt = Multitrack::new(480);
        mt.push_track(Track::new());
        mt.push_track(Track::new());
        let mut seq = Sequencer::new(mt).unwrap();
        assert!(seq.get_next_event_time().is_none());
        assert!(seq.get_next_event().is_none());
    }

    #[test]
    fn go_to_time_skips_without_dispatch_but_updates_state() {
        let mt = multitrack_with_tempo();
        let mut seq = Sequencer::new(mt).unwrap();
        seq.go_to_time(500);
        assert_eq!(seq.current_time(), 500);
    }

    #[test]
    fn go_to_time_matches_midi_to_ms_tempo_map() {
        let mt = multitrack_with_tempo();
        let mut seq = Sequencer::new(mt).unwrap();
        seq.go_to_time(480);
        assert!((seq.current_time_ms() - seq.midi_to_ms(480)).abs() < 1e-6);
    }

    #[test]
    fn unmuting_after_note_on_emits_catch_up() {
        let mt = multitrack_with_tempo();
        let mut seq = Sequencer::new(mt).unwrap();
        seq.get_next_event(); // tempo
        seq.get_next_event(); // timesig
        seq.get_next_event(); // note on at track 1
        seq.set_mute(1, true);
        let catch_up = seq.set_mute(1, false);
        assert!(!catch_up.is_empty());
    }

    #[test]
    fn solo_exempts_conductor_track() {
        let mt = multitrack_with_tempo();
        let mut seq = Sequencer::new(mt).unwrap();
        seq.solo_track(1);
        assert!(seq.is_track_audible(0));
        assert!(seq.is_track_audible(1));
    }

    #[test]
    fn rejects_zero_ticks_per_beat() {
        let mt = Multitrack::new(0);
        assert!(Sequencer::new(mt).is_err());
    }

    #[test]
    fn sequencer_component_dispatches_due_events_to_assigned_port() {
        let mut mt = Multitrack::new(480);
        let mut conductor = Track::new();
        conductor.insert(Message::meta_tempo(500_000, 0));
        mt.push_track(conductor);
        let mut melody = Track::new();
        melody.insert(Message::note_on(0, 60, 100, 0));
        melody.set_out_port(Some(7));
        mt.push_track(melody);

        let seq = Arc::new(Mutex::new(Sequencer::new(mt).unwrap()));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent2 = sent.clone();
        let mut component = SequencerComponent::new(seq, move |port, msg| {
            sent2.lock().unwrap().push((port, msg.clone()));
        });
        component.start();
        component.tick(0);
        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(sent.lock().unwrap()[0].0, 7);
    }
}
