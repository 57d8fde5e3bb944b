// MIDI output.
//
// `MidiScore` is a `NotationSink` that lays each part's notes end to end on
// a 480-ticks-per-quarter grid and, on `show`, writes a Standard MIDI File
// (SMF Format 1): a tempo track followed by one track per part, each on its
// own channel with the part's General MIDI program. Percussion parts go to
// channel 10 (index 9), which pitched parts skip.
//
// Staccato notes sound for half their written length; accented notes are
// played louder. Other articulations have no MIDI rendering.
//
// Uses the `midly` crate for MIDI writing.

use crate::error::Result;
use crate::note::{Articulations, Pitch};
use crate::notation::{NotationSink, PartHeader, ScoreHeader};
use log::info;
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::path::PathBuf;

/// Ticks per quarter note in MIDI output.
const TICKS_PER_QUARTER: u16 = 480;

const VELOCITY: u8 = 80;
const ACCENT_VELOCITY: u8 = 110;

const PERCUSSION_CHANNEL: u8 = 9;

#[derive(Debug, Clone, PartialEq)]
struct MidiNote {
    start: u32,
    length: u32,
    keys: Vec<u8>,
    velocity: u8,
}

#[derive(Debug, Clone)]
struct MidiPart {
    header: PartHeader,
    notes: Vec<MidiNote>,
    /// Tick where the next note starts.
    cursor: u32,
}

/// Sink that writes a Standard MIDI File.
#[derive(Debug, Clone)]
pub struct MidiScore {
    header: ScoreHeader,
    path: PathBuf,
    parts: Vec<MidiPart>,
}

impl MidiScore {
    pub fn new(header: ScoreHeader, path: impl Into<PathBuf>) -> Self {
        MidiScore {
            header,
            path: path.into(),
            parts: Vec::new(),
        }
    }

    /// Channel for each part in order: pitched parts count up from 0 and
    /// skip the percussion channel; unpitched parts share it.
    fn channels(&self) -> Vec<u8> {
        let mut next = 0u8;
        self.parts
            .iter()
            .map(|p| {
                if !p.header.pitched {
                    return PERCUSSION_CHANNEL;
                }
                if next == PERCUSSION_CHANNEL {
                    next += 1;
                }
                let ch = next % 16;
                next = (next + 1) % 16;
                ch
            })
            .collect()
    }

    /// Convert the collected parts to an in-memory SMF.
    pub fn to_smf(&self) -> Smf<'_> {
        let timing = Timing::Metrical(u15::new(TICKS_PER_QUARTER));
        let mut smf = Smf::new(Header::new(Format::Parallel, timing));

        let mut tempo_track: Track<'_> = Vec::new();
        let tempo_microseconds = ((60_000_000.0 / self.header.bpm).round() as u32).min(0x00FF_FFFF);
        tempo_track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_microseconds))),
        });
        tempo_track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        smf.tracks.push(tempo_track);

        for (part, channel) in self.parts.iter().zip(self.channels()) {
            let channel = u4::new(channel);
            let name = part.header.display_name.as_bytes();
            let mut track: Track<'_> = vec![
                TrackEvent {
                    delta: u28::new(0),
                    kind: TrackEventKind::Meta(MetaMessage::TrackName(name)),
                },
                TrackEvent {
                    delta: u28::new(0),
                    kind: TrackEventKind::Midi {
                        channel,
                        message: MidiMessage::ProgramChange {
                            program: u7::new(part.header.midi_program.min(127)),
                        },
                    },
                },
            ];

            // (tick, is_on, key, velocity); offs sort before ons at the same tick.
            let mut events: Vec<(u32, bool, u8, u8)> = Vec::new();
            for note in &part.notes {
                for &key in &note.keys {
                    events.push((note.start, true, key, note.velocity));
                    events.push((note.start + note.length, false, key, 0));
                }
            }
            events.sort_by_key(|&(tick, is_on, key, _)| (tick, is_on, key));

            let mut last_tick = 0u32;
            for (tick, is_on, key, vel) in events {
                let key = u7::new(key.min(127));
                let message = if is_on {
                    MidiMessage::NoteOn { key, vel: u7::new(vel) }
                } else {
                    MidiMessage::NoteOff { key, vel: u7::new(0) }
                };
                track.push(TrackEvent {
                    delta: u28::new(tick - last_tick),
                    kind: TrackEventKind::Midi { channel, message },
                });
                last_tick = tick;
            }

            track.push(TrackEvent {
                delta: u28::new(part.cursor.saturating_sub(last_tick)),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            });
            smf.tracks.push(track);
        }

        smf
    }
}

impl NotationSink for MidiScore {
    fn begin_part(&mut self, header: &PartHeader) {
        self.parts.push(MidiPart {
            header: header.clone(),
            notes: Vec::new(),
            cursor: 0,
        });
    }

    fn add_note(&mut self, pitch: &Pitch, duration: f64, articulations: Articulations) {
        let Some(part) = self.parts.last_mut() else {
            return;
        };
        let length = (duration * TICKS_PER_QUARTER as f64).round().max(0.0) as u32;
        if !pitch.is_rest() && length > 0 {
            let sounding = if articulations.staccato { (length / 2).max(1) } else { length };
            part.notes.push(MidiNote {
                start: part.cursor,
                length: sounding,
                keys: pitch.pitches(),
                velocity: if articulations.accent { ACCENT_VELOCITY } else { VELOCITY },
            });
        }
        part.cursor += length;
    }

    fn show(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        self.to_smf().write_std(&mut buf)?;
        std::fs::write(&self.path, &buf)?;
        info!("wrote {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Clef;

    fn header() -> ScoreHeader {
        ScoreHeader {
            title: "Test".to_string(),
            composer: String::new(),
            bpm: 120.0,
        }
    }

    fn part(name: &str, pitched: bool) -> PartHeader {
        PartHeader {
            part_id: name.to_string(),
            display_name: name.to_string(),
            abbreviation: name.to_string(),
            clef: if pitched { Clef::Treble } else { Clef::Percussion },
            midi_program: 68,
            pitched,
        }
    }

    fn note_ons(track: &Track<'_>) -> Vec<(u8, u8)> {
        track
            .iter()
            .filter_map(|e| match e.kind {
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOn { key, vel },
                    ..
                } => Some((key.as_int(), vel.as_int())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn one_track_per_part_plus_tempo() {
        let mut score = MidiScore::new(header(), "unused.mid");
        score.begin_part(&part("oboe", true));
        score.add_note(&Pitch::Single(72), 1.0, Articulations::default());
        score.begin_part(&part("bass", true));
        score.add_note(&Pitch::Rest, 1.0, Articulations::default());
        let smf = score.to_smf();
        assert_eq!(smf.tracks.len(), 3);
        assert_eq!(note_ons(&smf.tracks[1]), vec![(72, VELOCITY)]);
        assert!(note_ons(&smf.tracks[2]).is_empty());
    }

    #[test]
    fn chords_and_accents() {
        let mut score = MidiScore::new(header(), "unused.mid");
        score.begin_part(&part("vibraphone", true));
        score.add_note(&Pitch::chord([60, 64, 67]), 1.0, Articulations::accent());
        let smf = score.to_smf();
        assert_eq!(
            note_ons(&smf.tracks[1]),
            vec![(60, ACCENT_VELOCITY), (64, ACCENT_VELOCITY), (67, ACCENT_VELOCITY)]
        );
    }

    #[test]
    fn staccato_shortens_and_rests_advance() {
        let mut score = MidiScore::new(header(), "unused.mid");
        score.begin_part(&part("oboe", true));
        score.add_note(&Pitch::Rest, 0.5, Articulations::default());
        score.add_note(&Pitch::Single(60), 1.0, Articulations::staccato());
        let notes = &score.parts[0].notes;
        assert_eq!(notes[0].start, 240);
        assert_eq!(notes[0].length, 240);
        assert_eq!(score.parts[0].cursor, 720);
    }

    #[test]
    fn channels_skip_percussion() {
        let mut score = MidiScore::new(header(), "unused.mid");
        for i in 0..10 {
            score.begin_part(&part(&format!("p{i}"), true));
        }
        score.begin_part(&part("perc", false));
        let channels = score.channels();
        assert_eq!(&channels[..9], &[0, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(channels[9], 10);
        assert_eq!(channels[10], PERCUSSION_CHANNEL);
    }

    #[test]
    fn show_writes_parseable_file() {
        let path = std::env::temp_dir().join(format!("partitura_midi_{}.mid", std::process::id()));
        let mut score = MidiScore::new(header(), &path);
        score.begin_part(&part("oboe", true));
        score.add_note(&Pitch::Single(72), 2.0, Articulations::default());
        score.show().unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).ok();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 2);
    }
}
