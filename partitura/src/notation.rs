// The notation boundary: where finalized notes leave the engine.
//
// A composition run ends by feeding each instrument's finalized note list to
// a `NotationSink`, part by part, in ensemble order. Sinks see only pitch,
// duration and articulation flags in sequence; timing is implied by order
// because closeout guarantees a gapless cover. `show` is called once after
// the last part.
//
// See also: `lilypond.rs` and `midi.rs` for the two file-writing sinks,
// `piece.rs` (`Piece::notate`) which drives them.

use crate::config::Clef;
use crate::error::Result;
use crate::note::{Articulations, Pitch};

/// Piece-wide facts a sink may print or encode.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreHeader {
    pub title: String,
    pub composer: String,
    /// Quarter notes per minute.
    pub bpm: f64,
}

/// Identity of the part whose notes follow.
#[derive(Debug, Clone, PartialEq)]
pub struct PartHeader {
    pub part_id: String,
    pub display_name: String,
    pub abbreviation: String,
    pub clef: Clef,
    pub midi_program: u8,
    /// Pitched instruments have a range; percussion does not.
    pub pitched: bool,
}

pub trait NotationSink {
    fn begin_part(&mut self, header: &PartHeader);

    /// Append one note or rest to the current part. `duration` is in
    /// quarter notes.
    fn add_note(&mut self, pitch: &Pitch, duration: f64, articulations: Articulations);

    /// Finish the score: render, write or display it.
    fn show(&mut self) -> Result<()>;
}
