//! [`Multitrack`]: an ordered collection of [`Track`]s sharing one time base,
//! plus the stateful iterator spec.md §4.3 describes for walking all of their
//! events in time order with round-robin tie-breaking.

use crate::track::Track;

/// A set of tracks that share a `ticks_per_beat` time base (§3). Tracks keep
/// their insertion order — track 0 is conventionally the "main"/conductor track
/// (§4.1) but nothing here enforces that; `Sequencer` does.
#[derive(Clone, Debug, Default)]
pub struct Multitrack {
    tracks: Vec<Track>,
    ticks_per_beat: u16,
}

impl Multitrack {
    pub fn new(ticks_per_beat: u16) -> Self {
        Multitrack {
            tracks: Vec::new(),
            ticks_per_beat,
        }
    }

    pub fn ticks_per_beat(&self) -> u16 {
        self.ticks_per_beat
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn tracks_mut(&mut self) -> &mut [Track] {
        &mut self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn push_track(&mut self, track: Track) -> usize {
        self.tracks.push(track);
        self.tracks.len() - 1
    }

    pub fn remove_track(&mut self, index: usize) -> Option<Track> {
        (index < self.tracks.len()).then(|| self.tracks.remove(index))
    }

    /// The time of the last event across every track (the multitrack's overall
    /// end-of-track time).
    pub fn end_time(&self) -> u32 {
        self.tracks.iter().map(Track::end_time).max().unwrap_or(0)
    }

    pub fn iter(&self) -> MultitrackIter<'_> {
        MultitrackIter::new(self)
    }
}

/// A single track's cursor inside a [`MultitrackIter`]: which event comes next
/// and at what time.
#[derive(Clone, Copy, Debug)]
struct Cursor {
    next_index: usize,
    next_time: u32,
}

/// Walks every track's events in non-decreasing time order (§4.3).
///
/// When several tracks' next events share a timestamp, the iterator breaks the
/// tie round-robin: it remembers which track it served last and resumes the
/// scan from the track after it, so no single track is starved when many
/// tracks repeatedly collide on the same tick (e.g. a shared downbeat across
/// every part).
pub struct MultitrackIter<'a> {
    multitrack: &'a Multitrack,
    cursors: Vec<Cursor>,
    clock: u32,
    last_served: usize,
}

impl<'a> MultitrackIter<'a> {
    fn new(multitrack: &'a Multitrack) -> Self {
        let cursors = multitrack
            .tracks()
            .iter()
            .map(|t| Cursor {
                next_index: 0,
                next_time: t.events().first().map(|e| e.time()).unwrap_or(0),
            })
            .collect();
        let last_served = multitrack.tracks().len().saturating_sub(1);
        MultitrackIter {
            multitrack,
            cursors,
            clock: 0,
            last_served,
        }
    }

    /// Resets every track cursor back to its first event and the clock to 0.
    pub fn reset(&mut self) {
        for (cursor, track) in self.cursors.iter_mut().zip(self.multitrack.tracks()) {
            cursor.next_index = 0;
            cursor.next_time = track.events().first().map(|e| e.time()).unwrap_or(0);
        }
        self.clock = 0;
        self.last_served = self.multitrack.tracks().len().saturating_sub(1);
    }

    pub fn current_time(&self) -> u32 {
        self.clock
    }

    /// The smallest `next_time` across every track still holding events, or
    /// `None` if every track is exhausted (all cursors sit on their sentinel).
    pub fn get_next_event_time(&self) -> Option<u32> {
        self.candidates().map(|(_, c)| c.next_time).min()
    }

    fn candidates(&self) -> impl Iterator<Item = (usize, &Cursor)> {
        self.cursors
            .iter()
            .enumerate()
            .filter(move |(ti, c)| c.next_index + 1 < self.multitrack.tracks()[*ti].len())
    }

    fn next_track_round_robin(&self, earliest: u32) -> Option<usize> {
        let n = self.cursors.len();
        if n == 0 {
            return None;
        }
        for offset in 1..=n {
            let ti = (self.last_served + offset) % n;
            let c = self.cursors[ti];
            if c.next_index + 1 < self.multitrack.tracks()[ti].len() && c.next_time == earliest {
                return Some(ti);
            }
        }
        None
    }

    /// Advances to, and returns, the next event in time order (track index,
    /// event). Returns `None` once every track has only its sentinel left.
    pub fn get_next_event(&mut self) -> Option<(usize, crate::message::Message)> {
        let earliest = self.get_next_event_time()?;
        let track_idx = self.next_track_round_robin(earliest)?;
        let cursor = &mut self.cursors[track_idx];
        let event = self.multitrack.tracks()[track_idx].events()[cursor.next_index].clone();
        cursor.next_index += 1;
        cursor.next_time = self.multitrack.tracks()[track_idx]
            .events()
            .get(cursor.next_index)
            .map(|e| e.time())
            .unwrap_or(event.time());
        self.clock = earliest;
        self.last_served = track_idx;
        Some((track_idx, event))
    }

    /// Advances the clock to `time`, consuming (and discarding) every event
    /// strictly before it. Used by `Sequencer::go_to_time` (§4.4) to reposition
    /// without replaying audible output — callers reconstruct running state
    /// separately from the discarded events.
    pub fn go_to_time(&mut self, time: u32) -> Vec<crate::message::Message> {
        if time < self.clock {
            self.reset();
        }
        let mut skipped = Vec::new();
        while let Some(t) = self.get_next_event_time() {
            if t >= time {
                break;
            }
            if let Some((_, ev)) = self.get_next_event() {
                skipped.push(ev);
            } else {
                break;
            }
        }
        self.clock = time;
        skipped
    }
}
