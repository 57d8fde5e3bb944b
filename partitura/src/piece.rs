// A piece: the ensemble, its layers, and the cross-instrument queries.
//
// `Piece` owns everything one composition run mutates: the metrical and
// custom layers and one `Instrument` per part, in ensemble order. Scripts
// place notes through it by part id, ask it what else is sounding
// (`get_context`), and finally close every part out and hand the result to
// a notation sink.
//
// `get_context` is the harmonic query at the center of the placement loop:
// for a window it returns the overlapping notes of every *other* part, the
// sections of every layer, and a summary of the sounding pitches. The
// querying part is excluded so a note being re-chosen never constrains
// itself.

use crate::config::{InstrumentTable, PieceConfig};
use crate::duration::TimeBase;
use crate::error::{EngineError, Result};
use crate::harmony::pitch_classes;
use crate::instrument::Instrument;
use crate::layer::{Division, Layer, Layers, Section};
use crate::notation::{NotationSink, PartHeader, ScoreHeader};
use crate::note::{Articulations, Note, NoteId, Pitch};
use log::info;
use std::collections::BTreeMap;

/// What is sounding in a window, reduced to pitches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarmonicAnalysis {
    /// Distinct absolute pitches, ascending.
    pub pitches: Vec<u8>,
    /// Distinct pitch classes, ascending.
    pub pitch_classes: Vec<u8>,
}

impl HarmonicAnalysis {
    pub fn from_notes<'a>(notes: impl IntoIterator<Item = &'a Note>) -> Self {
        let mut pitches: Vec<u8> = notes.into_iter().flat_map(|n| n.pitch.pitches()).collect();
        pitches.sort_unstable();
        pitches.dedup();
        let pitch_classes = pitch_classes(pitches.iter().copied());
        HarmonicAnalysis { pitches, pitch_classes }
    }

    pub fn is_silent(&self) -> bool {
        self.pitches.is_empty()
    }
}

/// Result of `Piece::get_context`.
#[derive(Debug, Clone)]
pub struct Context<'a> {
    /// Overlapping notes of every other part, keyed by part id.
    pub notes: BTreeMap<&'a str, Vec<&'a Note>>,
    /// Overlapping sections of every layer, keyed by layer name.
    pub sections: BTreeMap<&'a str, Vec<&'a Section>>,
    pub analysis: HarmonicAnalysis,
}

#[derive(Debug, Clone)]
pub struct Piece {
    pub title: String,
    pub composer: String,
    pub bpm: f64,
    pub n_quarters: usize,
    pub timebase: TimeBase,
    pub layers: Layers,
    instruments: Vec<Instrument>,
}

impl Piece {
    pub fn new<S: AsRef<str>>(
        title: &str,
        part_names: &[S],
        bpm: f64,
        n_quarters: usize,
        timebase: TimeBase,
        table: &InstrumentTable,
    ) -> Result<Self> {
        let layers = Layers::new(n_quarters, bpm)?;
        let mut instruments: Vec<Instrument> = Vec::with_capacity(part_names.len());
        for name in part_names {
            let inst = Instrument::new(name.as_ref(), table, n_quarters, timebase)?;
            if instruments.iter().any(|i| i.part_id == inst.part_id) {
                return Err(EngineError::invalid(format!("duplicate part '{}'", inst.part_id)));
            }
            instruments.push(inst);
        }
        Ok(Piece {
            title: title.to_string(),
            composer: String::new(),
            bpm,
            n_quarters,
            timebase,
            layers,
            instruments,
        })
    }

    pub fn from_config(config: &PieceConfig) -> Result<Self> {
        let mut piece = Piece::new(
            &config.title,
            &config.parts,
            config.bpm,
            config.n_quarters,
            TimeBase::new(config.ticks_per_quarter)?,
            &config.instruments,
        )?;
        piece.composer = config.composer.clone();
        Ok(piece)
    }

    /// A piece with the same title, ensemble, tempo and resolution but a
    /// different length and no notes.
    pub fn empty_like(&self, n_quarters: usize) -> Result<Self> {
        let layers = Layers::new(n_quarters, self.bpm)?;
        let instruments = self
            .instruments
            .iter()
            .map(|i| {
                let mut table = InstrumentTable::empty();
                table.insert(&i.name, i.spec.clone());
                Instrument::new(&i.part_name, &table, n_quarters, self.timebase)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Piece {
            title: self.title.clone(),
            composer: self.composer.clone(),
            bpm: self.bpm,
            n_quarters,
            timebase: self.timebase,
            layers,
            instruments,
        })
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn part_ids(&self) -> impl Iterator<Item = &str> {
        self.instruments.iter().map(|i| i.part_id.as_str())
    }

    pub fn instrument(&self, part_id: &str) -> Result<&Instrument> {
        self.instruments
            .iter()
            .find(|i| i.part_id == part_id)
            .ok_or_else(|| EngineError::UnknownPart(part_id.to_string()))
    }

    pub fn instrument_mut(&mut self, part_id: &str) -> Result<&mut Instrument> {
        self.instruments
            .iter_mut()
            .find(|i| i.part_id == part_id)
            .ok_or_else(|| EngineError::UnknownPart(part_id.to_string()))
    }

    pub fn add_layer(&mut self, name: &str, division: impl Into<Division>) -> Result<&mut Layer> {
        self.layers.add_layer(name, division)
    }

    pub fn put_note(
        &mut self,
        part_id: &str,
        offset: f64,
        duration: f64,
        pitch: impl Into<Pitch>,
        articulations: Articulations,
    ) -> Result<NoteId> {
        self.instrument_mut(part_id)?.put_note(offset, duration, pitch, articulations)
    }

    /// Overlapping notes of every part, keyed by part id.
    pub fn get(&self, offset: f64, duration: f64) -> BTreeMap<&str, Vec<&Note>> {
        self.instruments
            .iter()
            .map(|i| (i.part_id.as_str(), i.get(offset, duration)))
            .collect()
    }

    /// Overlapping sections of every layer, keyed by layer name.
    pub fn get_sections(&self, offset: f64, duration: f64) -> BTreeMap<&str, Vec<&Section>> {
        self.layers.get(offset, duration)
    }

    /// What the other parts and the layers look like over a window.
    pub fn get_context(&self, part_id: &str, offset: f64, duration: f64) -> Result<Context<'_>> {
        self.instrument(part_id)?;
        let notes: BTreeMap<&str, Vec<&Note>> = self
            .instruments
            .iter()
            .filter(|i| i.part_id != part_id)
            .map(|i| (i.part_id.as_str(), i.get(offset, duration)))
            .collect();
        let analysis = HarmonicAnalysis::from_notes(notes.values().flatten().copied());
        Ok(Context {
            notes,
            sections: self.get_sections(offset, duration),
            analysis,
        })
    }

    /// Pitches sounding across all parts during a window.
    pub fn sounding(&self, offset: f64, duration: f64) -> HarmonicAnalysis {
        HarmonicAnalysis::from_notes(self.instruments.iter().flat_map(|i| i.get(offset, duration)))
    }

    pub fn closeout(&mut self) {
        for inst in &mut self.instruments {
            inst.closeout();
        }
        info!("{}: closed out {} parts", self.title, self.instruments.len());
    }

    pub fn score_header(&self) -> ScoreHeader {
        ScoreHeader {
            title: self.title.clone(),
            composer: self.composer.clone(),
            bpm: self.bpm,
        }
    }

    /// Feed every part's finalized notes to `sink`, then `show` it.
    pub fn notate(&self, sink: &mut dyn NotationSink) -> Result<()> {
        for inst in &self.instruments {
            sink.begin_part(&PartHeader {
                part_id: inst.part_id.clone(),
                display_name: match inst.number {
                    Some(n) => format!("{} {n}", inst.spec.display_name),
                    None => inst.spec.display_name.clone(),
                },
                abbreviation: inst.abbreviation.clone(),
                clef: inst.spec.clef,
                midi_program: inst.spec.midi_program,
                pitched: inst.spec.range.is_some(),
            });
            for note in inst.finalized_notes() {
                sink.add_note(&note.pitch, note.duration, note.articulations);
            }
        }
        sink.show()
    }

    /// One line per part showing its timeline occupancy.
    pub fn timeline_chart(&self) -> String {
        let width = self.instruments.iter().map(|i| i.part_id.len()).max().unwrap_or(0);
        self.instruments
            .iter()
            .map(|i| format!("{:width$} {}", i.part_id, i.timeline().summary()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
