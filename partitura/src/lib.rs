// Partitura: timeline and constraint-placement engine for generative
// composition.
//
// Composition scripts place notes for a fixed ensemble on per-instrument
// tick timelines, asking the engine where there is room and what the other
// parts are sounding, and filter candidate pitches against a table of
// allowed chord types. When done, every part is closed out into a gapless
// note list and handed to a notation sink.
//
// Architecture:
// - duration.rs: Tick / float-quarter / (quarters, sixteenths, ticks) conversions
// - layer.rs: Metrical and custom layers partitioning the piece into sections
// - note.rs: Pitch (rest, single, chord), articulation flags, placed notes
// - timeline.rs: Per-instrument tick occupancy ledger and opening search
// - instrument.rs: Part identity, registers, note placement and closeout
// - harmony.rs: Chord-type normalization and the harmonic filter
// - piece.rs: The ensemble, cross-part context queries, notation hand-off
// - notation.rs: The `NotationSink` trait
// - lilypond.rs: LilyPond (.ly) output sink
// - midi.rs: Standard MIDI File output sink
// - config.rs: JSON-loadable instrument table and run parameters
// - compose.rs: Bounded retry, weighted pitch choice, the fragment-and-
//   variations script
// - error.rs: `EngineError`
//
// Output is deterministic given a seed (see the `partitura_rng` crate).

pub mod compose;
pub mod config;
pub mod duration;
pub mod error;
pub mod harmony;
pub mod instrument;
pub mod layer;
pub mod lilypond;
pub mod midi;
pub mod notation;
pub mod note;
pub mod piece;
pub mod timeline;

pub use error::{EngineError, Result};
