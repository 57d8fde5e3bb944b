// Chord-type matching: the "filter" stage of generate / filter / choose.
//
// A chord type is the shape of a set of pitch classes independent of root:
// reduce mod 12, dedupe, sort, subtract the lowest. A C major triad and a
// D major triad are both (0, 4, 7). A `ChordTypeTable` lists the shapes a
// piece allows, each with a desirability weight. A `HarmonicFilter` pairs a
// table with a `MatchMode` and answers which candidate pitch classes keep
// the vertical harmony inside the table.
//
// Two matching policies exist because composition scripts use both:
// - `Exact`: the combined shape must itself be a table entry.
// - `Subset`: the combined shape must fit inside some transposition of an
//   entry, so partial chords that could still grow into an allowed one pass.
//
// An empty result is a normal outcome. The caller decides how to fall back.

use serde::{Deserialize, Serialize};

/// Reduce pitches to a zero-based, sorted, deduplicated pitch-class shape.
pub fn normalize(pitches: impl IntoIterator<Item = u8>) -> Vec<u8> {
    let mut pcs = pitch_classes(pitches);
    if let Some(&lowest) = pcs.first() {
        for pc in &mut pcs {
            *pc -= lowest;
        }
    }
    pcs
}

/// Sorted distinct pitch classes of `pitches`.
pub fn pitch_classes(pitches: impl IntoIterator<Item = u8>) -> Vec<u8> {
    let mut pcs: Vec<u8> = pitches.into_iter().map(|p| p % 12).collect();
    pcs.sort_unstable();
    pcs.dedup();
    pcs
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Exact,
    Subset,
}

/// One allowed chord shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordType {
    pub pattern: Vec<u8>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl ChordType {
    pub fn new(pattern: &[u8], weight: f64) -> Self {
        ChordType {
            pattern: normalize(pattern.iter().copied()),
            weight,
        }
    }

    /// Whether `shape` (already normalized) fits inside some transposition
    /// of this chord type.
    fn contains_shape(&self, shape: &[u8]) -> bool {
        let mut member = [false; 12];
        for &pc in &self.pattern {
            member[(pc % 12) as usize] = true;
        }
        (0..12u8).any(|t| shape.iter().all(|&pc| member[((pc + t) % 12) as usize]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordTypeTable {
    pub chord_types: Vec<ChordType>,
}

impl ChordTypeTable {
    /// Unweighted table from bare patterns. Patterns are normalized.
    pub fn from_patterns<P: AsRef<[u8]>>(patterns: &[P]) -> Self {
        ChordTypeTable {
            chord_types: patterns.iter().map(|p| ChordType::new(p.as_ref(), 1.0)).collect(),
        }
    }

    pub fn from_weighted<P: AsRef<[u8]>>(entries: &[(P, f64)]) -> Self {
        ChordTypeTable {
            chord_types: entries.iter().map(|(p, w)| ChordType::new(p.as_ref(), *w)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.chord_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chord_types.is_empty()
    }

    /// Weight of the best entry matching `shape` under `mode`, if any.
    pub fn lookup(&self, shape: &[u8], mode: MatchMode) -> Option<f64> {
        self.chord_types
            .iter()
            .filter(|ct| match mode {
                MatchMode::Exact => ct.pattern == shape,
                MatchMode::Subset => ct.contains_shape(shape),
            })
            .map(|ct| ct.weight)
            .fold(None, |best, w| Some(best.map_or(w, |b: f64| b.max(w))))
    }
}

impl Default for ChordTypeTable {
    /// Silence, single notes, consonant dyads, the major/minor/suspended
    /// triads and their inversions, and a handful of four-note sonorities.
    fn default() -> Self {
        let patterns: [&[u8]; 23] = [
            &[],
            &[0],
            &[0, 4],
            &[0, 8],
            &[0, 5],
            &[0, 7],
            &[0, 4, 7],
            &[0, 3, 8],
            &[0, 5, 9],
            &[0, 3, 7],
            &[0, 4, 9],
            &[0, 5, 8],
            &[0, 5, 7],
            &[0, 2, 7],
            &[0, 5, 10],
            &[0, 4, 7, 10],
            &[0, 3, 6, 8],
            &[0, 3, 5, 9],
            &[0, 2, 6, 9],
            &[0, 3, 7, 10],
            &[0, 4, 7, 9],
            &[0, 3, 5, 8],
            &[0, 2, 5, 9],
        ];
        ChordTypeTable::from_patterns(&patterns)
    }
}

/// A pitch that passed the filter, with the weight of the chord type it forms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub pitch: u8,
    pub harmony_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicFilter {
    pub table: ChordTypeTable,
    #[serde(default)]
    pub mode: MatchMode,
}

impl HarmonicFilter {
    pub fn new(table: ChordTypeTable, mode: MatchMode) -> Self {
        HarmonicFilter { table, mode }
    }

    /// Whether a sounding set of pitches (or pitch classes) is allowed.
    pub fn allows(&self, pitches: impl IntoIterator<Item = u8>) -> bool {
        self.table.lookup(&normalize(pitches), self.mode).is_some()
    }

    /// Table weight of `existing ∪ {pc}`, or `None` if that shape is not allowed.
    pub fn weight_with(&self, existing: &[u8], pc: u8) -> Option<f64> {
        let combined = existing.iter().copied().chain(std::iter::once(pc % 12));
        self.table.lookup(&normalize(combined), self.mode)
    }

    /// Pitch classes 0..12 that keep `existing` inside the table, ascending.
    pub fn allowed_pitch_classes(&self, existing: &[u8]) -> Vec<u8> {
        (0..12u8).filter(|&pc| self.weight_with(existing, pc).is_some()).collect()
    }

    /// Register pitches that keep `existing` inside the table, with the
    /// weight of the chord type each would form.
    pub fn candidates(&self, existing: &[u8], register: &[u8]) -> Vec<Candidate> {
        let weights: Vec<Option<f64>> =
            (0..12u8).map(|pc| self.weight_with(existing, pc)).collect();
        register
            .iter()
            .filter_map(|&pitch| {
                weights[(pitch % 12) as usize]
                    .map(|harmony_weight| Candidate { pitch, harmony_weight })
            })
            .collect()
    }
}
