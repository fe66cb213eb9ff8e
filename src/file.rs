//! Standard MIDI File load/write, behind the `file` feature (§6).
//!
//! Kept thin and format-only per §1's non-goal on a bit-level parser of its
//! own: the actual byte-level decode/encode is `midly`'s; this module only
//! maps between its `Smf` and this crate's [`Multitrack`]/[`Track`]/[`Message`],
//! the same seam the teacher's own optional `file` feature occupies
//! (`examples/Cierra-Runis-relocate/crates/relocate-midi/Cargo.toml`).

use std::io::{Read, Write};
use std::path::Path;

use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track as MidlyTrack, TrackEvent, TrackEventKind};

use crate::error::SeqError;
use crate::message::Message;
use crate::multitrack::Multitrack;
use crate::track::Track;

/// Reads every byte of `reader` and parses it as a Standard MIDI File,
/// producing a [`Multitrack`] with one [`Track`] per SMF track chunk and
/// absolute tick times (this crate never keeps delta times around, §3).
pub fn load_file<R: Read>(reader: &mut R) -> Result<Multitrack, SeqError> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|_| SeqError::InvalidArgument("could not read midi file"))?;
    let smf = Smf::parse(&bytes).map_err(|_| SeqError::InvalidArgument("not a standard midi file"))?;

    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(tpb) => tpb.as_int(),
        // Timecode-based files have no single ticks-per-beat; fall back to a
        // conventional value rather than reject the file outright.
        Timing::Timecode(..) => 480,
    };
    let mut multitrack = Multitrack::new(ticks_per_beat);

    for midly_track in smf.tracks.iter() {
        let mut track = Track::new();
        let mut clock: u32 = 0;
        for event in midly_track.iter() {
            clock = clock.saturating_add(event.delta.as_int());
            if let Some(msg) = convert_event(event, clock) {
                track.insert(msg);
            }
        }
        multitrack.push_track(track);
    }

    Ok(multitrack)
}

pub fn load_path(path: impl AsRef<Path>) -> Result<Multitrack, SeqError> {
    let mut file =
        fs_err::File::open(path).map_err(|_| SeqError::InvalidArgument("could not open midi file"))?;
    load_file(&mut file)
}

fn convert_event(event: &TrackEvent<'_>, clock: u32) -> Option<Message> {
    match event.kind {
        TrackEventKind::Midi { channel, message } => {
            let ch = channel.as_int();
            Some(match message {
                MidiMessage::NoteOn { key, vel } => {
                    Message::note_on(ch, key.as_int(), vel.as_int(), clock)
                }
                MidiMessage::NoteOff { key, vel } => {
                    Message::note_off(ch, key.as_int(), vel.as_int(), clock)
                }
                MidiMessage::Aftertouch { key, vel } => {
                    Message::poly_pressure(ch, key.as_int(), vel.as_int(), clock)
                }
                MidiMessage::Controller { controller, value } => {
                    Message::control_change(ch, controller.as_int(), value.as_int(), clock)
                }
                MidiMessage::ProgramChange { program } => {
                    Message::program_change(ch, program.as_int(), clock)
                }
                MidiMessage::ChannelAftertouch { vel } => {
                    Message::channel_pressure(ch, vel.as_int(), clock)
                }
                MidiMessage::PitchBend { bend } => {
                    Message::pitch_bend(ch, bend.as_int() as i16 - 8192, clock)
                }
            })
        }
        TrackEventKind::SysEx(data) | TrackEventKind::Escape(data) => {
            Some(Message::sysex(data.to_vec(), clock))
        }
        TrackEventKind::Meta(meta) => convert_meta(meta, clock),
    }
}

fn convert_meta(meta: MetaMessage<'_>, clock: u32) -> Option<Message> {
    match meta {
        MetaMessage::Tempo(usecs) => Some(Message::meta_tempo(usecs.as_int(), clock)),
        MetaMessage::TimeSignature(numerator, denom_pow2, _, _) => {
            Some(Message::meta_time_signature(numerator, denom_pow2, clock))
        }
        MetaMessage::KeySignature(sharps_flats, minor) => {
            Some(Message::meta_key_signature(sharps_flats, minor, clock))
        }
        MetaMessage::Marker(text) => {
            Some(Message::meta_marker(String::from_utf8_lossy(text).into_owned(), clock))
        }
        MetaMessage::TrackName(text) => Some(Message::meta_track_name(
            String::from_utf8_lossy(text).into_owned(),
            clock,
        )),
        MetaMessage::EndOfTrack => Some(Message::meta_end_of_track(clock)),
        // Everything else (instrument name, lyric, copyright, ...) doesn't
        // have a slot in the in-memory model; dropped rather than invented.
        _ => None,
    }
}

/// Writes `multitrack` out as a Standard MIDI File (format 1 for more than one
/// track, format 0 for exactly one), delta-encoding each track's absolute
/// tick times back for the wire.
pub fn write_file<W: Write>(multitrack: &Multitrack, writer: &mut W) -> Result<(), SeqError> {
    let format = if multitrack.num_tracks() <= 1 {
        Format::SingleTrack
    } else {
        Format::Parallel
    };
    let timing = Timing::Metrical(
        (multitrack.ticks_per_beat().max(1))
            .try_into()
            .map_err(|_| SeqError::InvalidArgument("ticks_per_beat out of midly's u15 range"))?,
    );
    let header = Header { format, timing };

    let mut tracks: Vec<MidlyTrack> = Vec::with_capacity(multitrack.num_tracks());
    for track in multitrack.tracks() {
        tracks.push(convert_track(track));
    }

    let smf = Smf {
        header,
        tracks,
    };
    smf.write(writer)
        .map_err(|_| SeqError::InvalidState("failed to encode midi file"))
}

pub fn write_path(multitrack: &Multitrack, path: impl AsRef<Path>) -> Result<(), SeqError> {
    let mut file =
        fs_err::File::create(path).map_err(|_| SeqError::InvalidArgument("could not create midi file"))?;
    write_file(multitrack, &mut file)
}

fn convert_track<'a>(track: &'a Track) -> MidlyTrack<'a> {
    let mut out = Vec::with_capacity(track.len());
    let mut last_time: u32 = 0;
    for msg in track.events() {
        let Some(kind) = convert_message(msg) else {
            continue;
        };
        let delta = msg.time().saturating_sub(last_time);
        last_time = msg.time();
        out.push(TrackEvent {
            delta: delta.into(),
            kind,
        });
    }
    out
}

fn convert_message(msg: &Message) -> Option<TrackEventKind<'_>> {
    if let Some(ch) = msg.channel() {
        let channel = ch.into();
        let message = if msg.is_note_on() {
            MidiMessage::NoteOn {
                key: msg.data1().into(),
                vel: msg.data2().into(),
            }
        } else if msg.is_note_off() {
            MidiMessage::NoteOff {
                key: msg.data1().into(),
                vel: msg.data2().into(),
            }
        } else if msg.is_poly_pressure() {
            MidiMessage::Aftertouch {
                key: msg.data1().into(),
                vel: msg.data2().into(),
            }
        } else if msg.is_control_change() {
            MidiMessage::Controller {
                controller: msg.data1().into(),
                value: msg.data2().into(),
            }
        } else if msg.is_program_change() {
            MidiMessage::ProgramChange {
                program: msg.data1().into(),
            }
        } else if msg.is_pitch_bend() {
            let raw = (msg.data1() as u16) | ((msg.data2() as u16) << 7);
            MidiMessage::PitchBend { bend: raw.into() }
        } else {
            MidiMessage::ChannelAftertouch {
                vel: msg.data1().into(),
            }
        };
        return Some(TrackEventKind::Midi { channel, message });
    }

    if msg.is_sysex() {
        return msg.sysex_data().map(|d| TrackEventKind::SysEx(d));
    }

    if msg.is_end_of_track() {
        return Some(TrackEventKind::Meta(MetaMessage::EndOfTrack));
    }
    if msg.is_tempo() {
        return msg.tempo_usecs_per_quarter().map(|u| {
            let clamped = u.min(0x00FF_FFFF);
            TrackEventKind::Meta(MetaMessage::Tempo(clamped.into()))
        });
    }
    if msg.is_time_signature() {
        return msg
            .time_signature()
            .map(|(n, d)| TrackEventKind::Meta(MetaMessage::TimeSignature(n, d.trailing_zeros() as u8, 24, 8)));
    }
    if msg.is_key_signature() {
        return msg
            .key_signature()
            .map(|(sf, minor)| TrackEventKind::Meta(MetaMessage::KeySignature(sf, minor)));
    }
    if msg.is_beat_marker() {
        // Synthetic, never written to a file (§4.4 Glossary).
        return None;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_small_multitrack() {
        let mut mt = Multitrack::new(480);
        let mut conductor = Track::new();
        conductor.insert(Message::meta_tempo(500_000, 0));
        conductor.insert(Message::meta_time_signature(3, 2, 0));
        mt.push_track(conductor);

        let mut melody = Track::new();
        melody.insert(Message::note_on(0, 60, 100, 0));
        melody.insert(Message::note_off(0, 60, 0, 480));
        mt.push_track(melody);

        let mut buf = Vec::new();
        write_file(&mt, &mut buf).unwrap();

        let loaded = load_file(&mut &buf[..]).unwrap();
        assert_eq!(loaded.ticks_per_beat(), 480);
        assert_eq!(loaded.num_tracks(), 2);
        let notes: Vec<_> = loaded.tracks()[1]
            .events()
            .iter()
            .filter(|e| e.is_note_on() || e.is_note_off())
            .collect();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].time(), 0);
        assert_eq!(notes[1].time(), 480);
    }
}
