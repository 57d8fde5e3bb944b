// LilyPond sheet music output.
//
// `LilyPondScore` is a `NotationSink` that collects each part's notes as
// LilyPond music text and, on `show`, writes a complete .ly file: a header,
// a `global` block with time signature and tempo, one music variable per
// part and a `StaffGroup` score.
//
// Durations are rendered on a sixteenth-note grid in 4/4. A note is split
// at every barline it crosses, each piece is decomposed into plain and
// dotted power-of-two values largest first, and the pieces are tied.
// Durations that don't fall on the sixteenth grid are rounded to it with a
// warning. Articulation marks attach to the first written piece of a note.
//
// Uses absolute pitches (not \relative) for simplicity and correctness.

use crate::config::Clef;
use crate::error::Result;
use crate::note::{Articulations, Pitch};
use crate::notation::{NotationSink, PartHeader, ScoreHeader};
use log::{info, warn};
use std::fmt::Write;
use std::path::PathBuf;

/// Pitch class names in LilyPond notation (indexed by pitch class 0-11).
const LY_PITCH_NAMES: [&str; 12] = [
    "c", "cis", "d", "ees", "e", "f", "fis", "g", "aes", "a", "bes", "b",
];

/// Sixteenths per 4/4 bar.
const BAR_UNITS: usize = 16;

/// Convert a MIDI pitch number to a LilyPond absolute pitch string.
///
/// LilyPond's `c` with no octave marks = MIDI 48 (C3).
/// Each `'` raises one octave, each `,` lowers one octave.
pub fn midi_to_ly_note(midi_pitch: u8) -> String {
    let pc = (midi_pitch % 12) as usize;
    let octave = (midi_pitch / 12) as i8 - 4;
    let mut result = LY_PITCH_NAMES[pc].to_string();
    let mark = if octave > 0 { '\'' } else { ',' };
    for _ in 0..octave.unsigned_abs() {
        result.push(mark);
    }
    result
}

/// LilyPond text for a pitch: a note name, a `<...>` chord, or `r`.
pub fn pitch_to_ly(pitch: &Pitch) -> String {
    match pitch {
        Pitch::Rest => "r".to_string(),
        Pitch::Single(p) => midi_to_ly_note(*p),
        Pitch::Chord(set) => {
            let names: Vec<String> = set.iter().map(|&p| midi_to_ly_note(p)).collect();
            format!("<{}>", names.join(" "))
        }
    }
}

/// Valid LilyPond note values, in sixteenths, largest first.
const DURATION_TABLE: [(usize, &str); 8] = [
    (16, "1"),
    (12, "2."),
    (8, "2"),
    (6, "4."),
    (4, "4"),
    (3, "8."),
    (2, "8"),
    (1, "16"),
];

/// Decompose a duration (in sixteenths) into LilyPond duration strings,
/// largest first. For example 5 = "4" + "16".
pub fn decompose_duration(mut units: usize) -> Vec<&'static str> {
    let mut parts = Vec::new();
    for &(value, name) in &DURATION_TABLE {
        while units >= value {
            parts.push(name);
            units -= value;
        }
    }
    parts
}

/// Split a duration (in sixteenths, starting at `start`) at 4/4 barlines.
pub fn split_at_barlines(start: usize, duration: usize) -> Vec<usize> {
    let mut fragments = Vec::new();
    let mut remaining = duration;
    let mut pos = start;
    while remaining > 0 {
        let bar_end = (pos / BAR_UNITS + 1) * BAR_UNITS;
        let frag = remaining.min(bar_end - pos);
        fragments.push(frag);
        remaining -= frag;
        pos += frag;
    }
    fragments
}

fn clef_name(clef: Clef) -> &'static str {
    match clef {
        Clef::Treble => "treble",
        Clef::Treble8 => "\"treble_8\"",
        Clef::Alto => "alto",
        Clef::Bass => "bass",
        Clef::Percussion => "percussion",
    }
}

/// Post-note marks, in LilyPond syntax, for the first piece of a note.
fn articulation_marks(a: &Articulations) -> String {
    let mut marks = String::new();
    if a.staccato {
        marks.push_str("-.");
    }
    if a.tenuto {
        marks.push_str("--");
    }
    if a.accent {
        marks.push_str("->");
    }
    if a.plop {
        marks.push_str("^\"plop\"");
    }
    if a.scoop {
        marks.push_str("^\"scoop\"");
    }
    if a.falloff {
        marks.push_str(" \\bendAfter #-4");
    }
    if a.doit {
        marks.push_str(" \\bendAfter #+4");
    }
    marks
}

/// Music variable name for the n-th part: `partA`, `partB`, ... `partAA`.
/// LilyPond identifiers can't hold digits, so part ids aren't usable as is.
fn variable_name(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    format!("part{}", letters.into_iter().collect::<String>())
}

#[derive(Debug, Clone)]
struct LyPart {
    header: PartHeader,
    music: String,
    /// Sixteenths written so far.
    position: usize,
}

/// Sink that renders a LilyPond file.
#[derive(Debug, Clone)]
pub struct LilyPondScore {
    header: ScoreHeader,
    path: PathBuf,
    parts: Vec<LyPart>,
}

impl LilyPondScore {
    pub fn new(header: ScoreHeader, path: impl Into<PathBuf>) -> Self {
        LilyPondScore {
            header,
            path: path.into(),
            parts: Vec::new(),
        }
    }

    /// The music text collected so far for `part_id`.
    pub fn part_music(&self, part_id: &str) -> Option<&str> {
        self.parts
            .iter()
            .find(|p| p.header.part_id == part_id)
            .map(|p| p.music.as_str())
    }

    /// The complete .ly source.
    pub fn render(&self) -> String {
        let mut ly = String::new();
        ly.push_str("\\version \"2.24.0\"\n\n");

        let _ = write!(
            ly,
            "\\header {{\n  title = \"{}\"\n  composer = \"{}\"\n}}\n\n",
            self.header.title.replace('"', "\\\""),
            self.header.composer.replace('"', "\\\""),
        );
        let _ = write!(
            ly,
            "global = {{\n  \\time 4/4 \\tempo 4 = {}\n}}\n\n",
            self.header.bpm.round() as i64
        );

        for (i, part) in self.parts.iter().enumerate() {
            let _ = write!(
                ly,
                "{} = \\absolute {{\n  \\global\n  {}\n}}\n\n",
                variable_name(i),
                part.music
            );
        }

        ly.push_str("\\score {\n  \\new StaffGroup <<\n");
        for (i, part) in self.parts.iter().enumerate() {
            let h = &part.header;
            let _ = writeln!(
                ly,
                "    \\new Staff = \"{}\" \\with {{ instrumentName = \"{}\" shortInstrumentName = \"{}\" }} {{\n      \\clef {}\n      \\{}\n    }}",
                h.part_id,
                h.display_name,
                h.abbreviation,
                clef_name(h.clef),
                variable_name(i)
            );
        }
        ly.push_str("  >>\n");
        ly.push_str("  \\layout { }\n");
        ly.push_str("}\n");
        ly
    }
}

impl NotationSink for LilyPondScore {
    fn begin_part(&mut self, header: &PartHeader) {
        self.parts.push(LyPart {
            header: header.clone(),
            music: String::new(),
            position: 0,
        });
    }

    fn add_note(&mut self, pitch: &Pitch, duration: f64, articulations: Articulations) {
        let Some(part) = self.parts.last_mut() else {
            warn!("lilypond: note before any part, dropped");
            return;
        };
        let exact = duration * 4.0;
        let units = exact.round().max(0.0) as usize;
        if (exact - units as f64).abs() > 1e-6 {
            warn!(
                "lilypond: {}: duration {duration} is off the sixteenth grid, written as {units} sixteenths",
                part.header.part_id
            );
        }
        if units == 0 {
            return;
        }

        let name = pitch_to_ly(pitch);
        let marks = articulation_marks(&articulations);
        let fragments = split_at_barlines(part.position, units);
        let n_fragments = fragments.len();
        let mut first = true;
        for (i, frag) in fragments.into_iter().enumerate() {
            let parts = decompose_duration(frag);
            for (j, dur_str) in parts.iter().enumerate() {
                if !part.music.is_empty() {
                    part.music.push(' ');
                }
                let _ = write!(part.music, "{name}{dur_str}");
                if first && !pitch.is_rest() {
                    part.music.push_str(&marks);
                }
                first = false;
                let more = j + 1 < parts.len() || i + 1 < n_fragments;
                if more && !pitch.is_rest() {
                    part.music.push('~');
                }
            }
        }
        if articulations.breath_mark {
            part.music.push_str(" \\breathe");
        }
        part.position += units;
    }

    fn show(&mut self) -> Result<()> {
        std::fs::write(&self.path, self.render())?;
        info!("wrote {}", self.path.display());
        Ok(())
    }
}
