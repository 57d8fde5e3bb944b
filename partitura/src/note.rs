// Notes and rests as placed on an instrument's timeline.
//
// A `Note` covers `[offset, offset + duration)` in quarter notes and carries
// the same span in ticks so occupancy math never touches floats. Its pitch is
// a rest, a single MIDI-style pitch number, or a chord. Articulation flags are
// opaque to the engine and passed straight through to the notation sink.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pitch {
    Rest,
    Single(u8),
    Chord(BTreeSet<u8>),
}

impl Pitch {
    /// A chord from any collection of pitches. Empty becomes a rest and a
    /// single distinct pitch becomes `Single`.
    pub fn chord(pitches: impl IntoIterator<Item = u8>) -> Pitch {
        let set: BTreeSet<u8> = pitches.into_iter().collect();
        match set.len() {
            0 => Pitch::Rest,
            1 => set.first().map_or(Pitch::Rest, |&p| Pitch::Single(p)),
            _ => Pitch::Chord(set),
        }
    }

    pub fn is_rest(&self) -> bool {
        matches!(self, Pitch::Rest)
    }

    /// Every sounding pitch, ascending. Empty for a rest.
    pub fn pitches(&self) -> Vec<u8> {
        match self {
            Pitch::Rest => Vec::new(),
            Pitch::Single(p) => vec![*p],
            Pitch::Chord(set) => set.iter().copied().collect(),
        }
    }

    /// Shift by `semitones`. Pitches pushed outside 0..=127 are dropped.
    pub fn transposed(&self, semitones: i16) -> Pitch {
        let shift = |p: u8| u8::try_from(p as i16 + semitones).ok().filter(|q| *q <= 127);
        match self {
            Pitch::Rest => Pitch::Rest,
            Pitch::Single(p) => shift(*p).map_or(Pitch::Rest, Pitch::Single),
            Pitch::Chord(set) => Pitch::chord(set.iter().filter_map(|&p| shift(p))),
        }
    }
}

impl From<u8> for Pitch {
    fn from(p: u8) -> Self {
        Pitch::Single(p)
    }
}

impl From<Option<u8>> for Pitch {
    fn from(p: Option<u8>) -> Self {
        p.map_or(Pitch::Rest, Pitch::Single)
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pitch::Rest => write!(f, "rest"),
            Pitch::Single(p) => write!(f, "{p}"),
            Pitch::Chord(set) => {
                let parts: Vec<String> = set.iter().map(|p| p.to_string()).collect();
                write!(f, "<{}>", parts.join(" "))
            }
        }
    }
}

/// Performance marks carried through to notation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Articulations {
    pub staccato: bool,
    pub tenuto: bool,
    pub accent: bool,
    /// Slide after the note, downward.
    pub falloff: bool,
    /// Slide into the note from above.
    pub plop: bool,
    /// Slide into the note from below.
    pub scoop: bool,
    /// Slide after the note, upward.
    pub doit: bool,
    pub breath_mark: bool,
}

impl Articulations {
    pub fn staccato() -> Self {
        Articulations {
            staccato: true,
            ..Default::default()
        }
    }

    pub fn accent() -> Self {
        Articulations {
            accent: true,
            ..Default::default()
        }
    }
}

/// Index of a note in its instrument's note arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Start, in quarter notes.
    pub offset: f64,
    /// Length, in quarter notes.
    pub duration: f64,
    pub start_tick: usize,
    pub tick_len: usize,
    pub pitch: Pitch,
    #[serde(default)]
    pub articulations: Articulations,
}

impl Note {
    pub fn next_offset(&self) -> f64 {
        self.offset + self.duration
    }

    pub fn end_tick(&self) -> usize {
        self.start_tick + self.tick_len
    }

    pub fn is_rest(&self) -> bool {
        self.pitch.is_rest()
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Note offset {} duration {} pitch {}>", self.offset, self.duration, self.pitch)
    }
}
