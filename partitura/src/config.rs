// Data-driven configuration for a composition run.
//
// Three groups of parameters, all `serde` structs with `Default` impls so a
// JSON file only needs to mention what it changes:
//
// - `InstrumentTable`: per-instrument metadata (inclusive pitch range,
//   abbreviation, clef, MIDI program). The engine never hard-codes a range;
//   `Instrument::new` looks its instrument up here.
// - `PieceConfig`: title, tempo, length, timeline resolution, the ensemble's
//   part names, the harmonic filter and pitch weighting, the form layer.
// - `FragmentConfig`: knobs of the `generate` binary's fragment-and-variation
//   script (density, duration palette, registers, transposition range).
//
// See also: `instrument.rs` which reads `InstrumentSpec`, `harmony.rs` for
// `HarmonicFilter`, `main.rs` which loads a `PieceConfig` from `--config`.

use crate::compose::PitchWeighting;
use crate::error::{EngineError, Result};
use crate::harmony::{ChordTypeTable, HarmonicFilter, MatchMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path).map_err(|source| EngineError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&data)?)
}

// ---------------------------------------------------------------------------
// Instruments
// ---------------------------------------------------------------------------

/// Staff clef used when notating a part.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clef {
    #[default]
    Treble,
    /// Treble clef sounding an octave lower (guitar).
    Treble8,
    Alto,
    Bass,
    Percussion,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Name printed on the staff, e.g. "Bass Clarinet".
    pub display_name: String,
    pub abbreviation: String,
    /// Lowest and highest playable pitch, inclusive. `None` for unpitched
    /// instruments.
    #[serde(default)]
    pub range: Option<(u8, u8)>,
    #[serde(default)]
    pub clef: Clef,
    /// General MIDI program number, 0-based.
    #[serde(default)]
    pub midi_program: u8,
}

impl InstrumentSpec {
    pub fn new(
        display_name: &str,
        abbreviation: &str,
        range: Option<(u8, u8)>,
        clef: Clef,
        midi_program: u8,
    ) -> Self {
        InstrumentSpec {
            display_name: display_name.to_string(),
            abbreviation: abbreviation.to_string(),
            range,
            clef,
            midi_program,
        }
    }

    /// Every playable pitch, ascending. Empty when unpitched.
    pub fn pitches(&self) -> Vec<u8> {
        match self.range {
            Some((low, high)) if low <= high => (low..=high).collect(),
            _ => Vec::new(),
        }
    }
}

/// Instrument name (`"bass_clarinet"`) to metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentTable {
    pub instruments: BTreeMap<String, InstrumentSpec>,
}

impl InstrumentTable {
    pub fn empty() -> Self {
        InstrumentTable {
            instruments: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&InstrumentSpec> {
        self.instruments
            .get(name)
            .ok_or_else(|| EngineError::UnknownInstrument(name.to_string()))
    }

    pub fn insert(&mut self, name: &str, spec: InstrumentSpec) {
        self.instruments.insert(name.to_string(), spec);
    }

    /// The built-in table with the entries from a JSON file laid over it.
    pub fn load(path: &Path) -> Result<Self> {
        let overrides: InstrumentTable = read_json(path)?;
        let mut table = InstrumentTable::default();
        table.instruments.extend(overrides.instruments);
        Ok(table)
    }
}

impl Default for InstrumentTable {
    fn default() -> Self {
        use Clef::*;
        let spec = InstrumentSpec::new;
        let entries = [
            ("violin", spec("Violin", "vln", Some((55, 95)), Treble, 40)),
            ("flute", spec("Flute", "f", Some((60, 96)), Treble, 73)),
            ("oboe", spec("Oboe", "ob", Some((59, 86)), Treble, 68)),
            ("english_horn", spec("English Horn", "eh", Some((52, 81)), Treble, 69)),
            ("clarinet", spec("Clarinet", "cl", Some((50, 89)), Treble, 71)),
            ("bass_clarinet", spec("Bass Clarinet", "bcl", Some((34, 77)), Bass, 71)),
            ("soprano_recorder", spec("Soprano Recorder", "srec", Some((72, 98)), Treble, 74)),
            ("alto_recorder", spec("Alto Recorder", "arec", Some((65, 91)), Treble, 74)),
            ("alto_saxophone", spec("Alto Saxophone", "sx", Some((49, 80)), Treble, 65)),
            ("baritone_saxophone", spec("Baritone Saxophone", "bsx", Some((36, 69)), Bass, 67)),
            ("trumpet", spec("Trumpet", "tpt", Some((52, 82)), Treble, 56)),
            ("vibraphone", spec("Vibraphone", "vib", Some((53, 89)), Treble, 11)),
            ("guitar", spec("Guitar", "gtr", Some((40, 88)), Treble8, 24)),
            ("piano", spec("Piano", "pno", Some((21, 108)), Treble, 0)),
            ("organ", spec("Organ", "org", Some((36, 96)), Treble, 19)),
            ("viola", spec("Viola", "vla", Some((48, 88)), Alto, 41)),
            ("bass", spec("Bass", "b", Some((28, 60)), Bass, 32)),
            ("percussion", spec("Percussion", "perc", None, Percussion, 0)),
        ];
        InstrumentTable {
            instruments: entries.into_iter().map(|(name, spec)| (name.to_string(), spec)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Demo script parameters
// ---------------------------------------------------------------------------

/// Parameters of the fragment-and-variations script run by `generate`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentConfig {
    /// Length of the generated fragment in quarters.
    pub quarters: usize,
    /// Inclusive bounds on how many notes to try to place.
    pub density: (usize, usize),
    /// Duration palette in quarters; repeats weight the draw.
    pub durations: Vec<f64>,
    /// Notes this short or shorter may come out staccato.
    pub staccato_max_duration: f64,
    pub staccato_chance: f64,
    /// Openings must fall on multiples of this many quarters.
    pub opening_grid: f64,
    /// Failed placement attempts tolerated over the whole fragment.
    pub max_failures: usize,
    /// Per-instrument inclusive pitch window. Instruments not listed fall
    /// back to their safe register.
    pub registers: BTreeMap<String, (u8, u8)>,
    /// Inclusive per-part transposition bounds searched for variations.
    pub transpositions: (i16, i16),
    /// How many times each fragment or variation is repeated back to back.
    pub repeats: usize,
    /// Upper bound on variations tiled into the piece.
    pub max_variations: usize,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        let registers = [
            ("bass", (42, 58)),
            ("bass_clarinet", (40, 60)),
            ("oboe", (76, 88)),
            ("vibraphone", (58, 73)),
        ];
        FragmentConfig {
            quarters: 8,
            density: (14, 29),
            durations: vec![0.5, 0.5, 1.0, 1.0, 1.0, 1.5, 2.0],
            staccato_max_duration: 0.5,
            staccato_chance: 1.0 / 3.0,
            opening_grid: 0.5,
            max_failures: 100,
            registers: registers.into_iter().map(|(n, r)| (n.to_string(), r)).collect(),
            transpositions: (-2, 2),
            repeats: 4,
            max_variations: 24,
        }
    }
}

// ---------------------------------------------------------------------------
// Piece
// ---------------------------------------------------------------------------

/// A form layer given as relative section lengths with one label each.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormConfig {
    pub section_durations: Vec<f64>,
    pub section_types: Vec<String>,
}

impl Default for FormConfig {
    fn default() -> Self {
        let section_types = [
            "intro", "verse_a", "verse_a", "verse_b", "verse_a", "chorus", "verse_a", "verse_b",
            "chorus", "bridge", "verse_a", "verse_b", "chorus", "chorus", "outro",
        ];
        FormConfig {
            section_durations: vec![
                1.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 8.0, 4.0, 4.0, 4.0, 4.0, 1.0,
            ],
            section_types: section_types.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PieceConfig {
    pub title: String,
    pub composer: String,
    /// Quarter notes per minute.
    pub bpm: f64,
    pub n_quarters: usize,
    /// Timeline resolution.
    pub ticks_per_quarter: u32,
    /// Part names, e.g. `"violin 1"`. A trailing number marks a doubled
    /// instrument.
    pub parts: Vec<String>,
    pub instruments: InstrumentTable,
    pub harmony: HarmonicFilter,
    pub weighting: PitchWeighting,
    pub form: FormConfig,
    pub fragment: FragmentConfig,
    pub seed: Option<u64>,
}

impl Default for PieceConfig {
    fn default() -> Self {
        PieceConfig {
            title: "Listen/Space".to_string(),
            composer: String::new(),
            bpm: 93.0,
            n_quarters: 232,
            ticks_per_quarter: 4,
            parts: ["oboe", "bass_clarinet", "vibraphone", "bass"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            instruments: InstrumentTable::default(),
            harmony: HarmonicFilter::new(ChordTypeTable::default(), MatchMode::Exact),
            weighting: PitchWeighting::default(),
            form: FormConfig::default(),
            fragment: FragmentConfig::default(),
            seed: None,
        }
    }
}

impl PieceConfig {
    /// Load from JSON. Missing fields take their defaults; a partial
    /// `instruments` map is laid over the built-in table.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: PieceConfig = read_json(path)?;
        let mut table = InstrumentTable::default();
        table.instruments.append(&mut config.instruments.instruments);
        config.instruments = table;
        Ok(config)
    }
}
