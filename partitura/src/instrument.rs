// One part of the ensemble: identity, registers, timeline and notes.
//
// Part names follow the "instrument [number]" convention: `"violin 2"` is
// the second violin, part id `violin_2`, abbreviation id `vln2`. The
// instrument name is looked up in the `InstrumentTable` for its range,
// abbreviation and clef.
//
// Notes live in a per-instrument arena in placement order; the timeline
// cells point back into it by `NoteId`. Placement never checks overlap:
// a later note silently takes over the cells it covers. `closeout` walks
// the cells once and produces the finalized, gapless note list the
// notation sinks consume, synthesizing one rest per run of free cells.
//
// Offsets and durations at this level are quarter notes (`f64`); the
// conversion to ticks uses the timeline's `TimeBase` and rounds.

use crate::config::{InstrumentSpec, InstrumentTable};
use crate::duration::TimeBase;
use crate::error::{EngineError, Result};
use crate::note::{Articulations, Note, NoteId, Pitch};
use crate::timeline::Timeline;
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Number of near-equal chunks an instrument's range is cut into.
pub const N_REGISTERS: usize = 7;

/// Split `items` into `n` contiguous, near-equal chunks. Item `i` lands in
/// chunk `k` when `k * size <= i + 0.5 < (k + 1) * size`, with
/// `size = len / n`. Short lists leave some chunks empty.
pub fn split_near_equal<T: Clone>(items: &[T], n: usize) -> Vec<Vec<T>> {
    let mut chunks = vec![Vec::new(); n];
    if n == 0 || items.is_empty() {
        return chunks;
    }
    let size = items.len() as f64 / n as f64;
    for (i, item) in items.iter().enumerate() {
        let k = (((i as f64 + 0.5) / size) as usize).min(n - 1);
        chunks[k].push(item.clone());
    }
    chunks
}

/// An instrument's range cut into `N_REGISTERS` chunks, low to high.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    pub chunks: Vec<Vec<u8>>,
}

impl Registers {
    pub fn from_range(pitches: &[u8]) -> Self {
        Registers {
            chunks: split_near_equal(pitches, N_REGISTERS),
        }
    }

    fn flatten(&self, from: usize, to: usize) -> Vec<u8> {
        self.chunks.get(from..to).unwrap_or(&[]).concat()
    }

    pub fn lowest(&self) -> &[u8] {
        self.chunks.first().map_or(&[], Vec::as_slice)
    }

    pub fn middle(&self) -> &[u8] {
        self.chunks.get(N_REGISTERS / 2).map_or(&[], Vec::as_slice)
    }

    pub fn highest(&self) -> &[u8] {
        self.chunks.last().map_or(&[], Vec::as_slice)
    }

    /// Everything but the outermost chunk at each end.
    pub fn safe(&self) -> Vec<u8> {
        self.flatten(1, N_REGISTERS - 1)
    }

    /// Everything but the two outermost chunks at each end.
    pub fn very_safe(&self) -> Vec<u8> {
        self.flatten(2, N_REGISTERS - 2)
    }
}

/// Instrument name and optional instance number from a part name.
/// `"violin 2"` -> `("violin", Some(2))`, `"bass clarinet"` ->
/// `("bass_clarinet", None)`.
pub fn parse_part_name(part_name: &str) -> (String, Option<u32>) {
    let mut words: Vec<&str> = part_name.split_whitespace().collect();
    let number = match words.as_slice() {
        [_, .., last] => last.parse::<u32>().ok(),
        _ => None,
    };
    if number.is_some() {
        words.pop();
    }
    (words.join("_").to_lowercase(), number)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub part_name: String,
    /// Key into the instrument table, e.g. `bass_clarinet`.
    pub name: String,
    pub number: Option<u32>,
    pub part_id: String,
    pub abbreviation: String,
    pub abbreviation_id: String,
    pub spec: InstrumentSpec,
    pub registers: Registers,
    timeline: Timeline,
    notes: Vec<Note>,
    finalized: Vec<Note>,
}

impl Instrument {
    pub fn new(
        part_name: &str,
        table: &InstrumentTable,
        n_quarters: usize,
        timebase: TimeBase,
    ) -> Result<Self> {
        let (name, number) = parse_part_name(part_name);
        if name.is_empty() {
            return Err(EngineError::invalid(format!("part name '{part_name}' has no instrument")));
        }
        let spec = table.get(&name)?.clone();
        // A first instance keeps the bare abbreviation.
        let (abbreviation, abbreviation_id) = match number {
            Some(n) if n > 1 => (
                format!("{} {n}", spec.abbreviation),
                format!("{}{n}", spec.abbreviation),
            ),
            _ => (spec.abbreviation.clone(), spec.abbreviation.clone()),
        };
        let part_id = match number {
            Some(n) => format!("{name}_{n}"),
            None => name.clone(),
        };
        Ok(Instrument {
            part_name: part_name.to_string(),
            number,
            part_id,
            abbreviation,
            abbreviation_id,
            registers: Registers::from_range(&spec.pitches()),
            name,
            spec,
            timeline: Timeline::new(n_quarters, timebase),
            notes: Vec::new(),
            finalized: Vec::new(),
        })
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn timebase(&self) -> TimeBase {
        self.timeline.timebase
    }

    /// Every pitch in the instrument's range.
    pub fn range(&self) -> Vec<u8> {
        self.spec.pitches()
    }

    /// Length in quarters.
    pub fn n_quarters(&self) -> f64 {
        self.timebase().ticks_to_float(self.timeline.len() as i64)
    }

    /// Placed notes in placement order, including ones later overwritten.
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn note(&self, id: NoteId) -> Option<&Note> {
        self.notes.get(id.0)
    }

    /// Output of the last `closeout`.
    pub fn finalized_notes(&self) -> &[Note] {
        &self.finalized
    }

    /// Place a note at `offset` lasting `duration` quarters. Overlap is not
    /// checked; whatever held those ticks is displaced.
    pub fn put_note(
        &mut self,
        offset: f64,
        duration: f64,
        pitch: impl Into<Pitch>,
        articulations: Articulations,
    ) -> Result<NoteId> {
        if !offset.is_finite() {
            return Err(EngineError::invalid(format!("note offset {offset}")));
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(EngineError::invalid(format!(
                "note duration must be positive, got {duration}"
            )));
        }
        let tb = self.timebase();
        let start = tb.float_to_ticks(offset);
        let len = tb.float_to_ticks(duration);
        if len == 0 {
            return Err(EngineError::invalid(format!(
                "duration {duration} is shorter than one tick at {} ticks per quarter",
                tb.ticks_per_quarter
            )));
        }

        let id = NoteId(self.notes.len());
        self.timeline.occupy(start, len, id)?;
        let note = Note {
            offset,
            duration,
            start_tick: start as usize,
            tick_len: len as usize,
            pitch: pitch.into(),
            articulations,
        };
        debug!("{}: placed {note}", self.part_id);
        self.notes.push(note);
        Ok(id)
    }

    /// Place a note right after the latest-ending note (at 0 when empty).
    pub fn append_note(
        &mut self,
        duration: f64,
        pitch: impl Into<Pitch>,
        articulations: Articulations,
    ) -> Result<NoteId> {
        let end = self.notes.iter().map(Note::end_tick).max().unwrap_or(0);
        let offset = self.timebase().ticks_to_float(end as i64);
        self.put_note(offset, duration, pitch, articulations)
    }

    /// Notes currently holding any tick of `[offset, offset + duration)`, in
    /// time order. A zero duration asks about the single instant `offset`.
    pub fn get(&self, offset: f64, duration: f64) -> Vec<&Note> {
        let tb = self.timebase();
        let len = self.timeline.len() as i64;
        let start = tb.float_to_ticks(offset);
        let mut end = tb.float_to_ticks(offset + duration);
        if end <= start {
            end = start.saturating_add(1);
        }
        let (start, end) = (start.clamp(0, len) as usize, end.clamp(0, len) as usize);

        let mut found: Vec<NoteId> = Vec::new();
        for cell in &self.timeline.cells()[start..end] {
            match cell.note {
                Some(id) if !found.contains(&id) => found.push(id),
                _ => {}
            }
        }
        found.into_iter().filter_map(|id| self.note(id)).collect()
    }

    /// Start offsets (quarters) in the window where `duration` fits, at
    /// single-tick granularity.
    pub fn find_openings(
        &self,
        duration: f64,
        window_offset: f64,
        window_duration: Option<f64>,
    ) -> Vec<f64> {
        self.openings_in_ticks(duration, window_offset, window_duration, 1)
    }

    /// Like `find_openings`, keeping only offsets that are whole multiples
    /// of `grid` quarters.
    pub fn find_openings_aligned(
        &self,
        duration: f64,
        window_offset: f64,
        window_duration: Option<f64>,
        grid: f64,
    ) -> Vec<f64> {
        let grid_ticks = self.timebase().float_to_ticks(grid).max(1);
        self.openings_in_ticks(duration, window_offset, window_duration, grid_ticks)
    }

    fn openings_in_ticks(
        &self,
        duration: f64,
        window_offset: f64,
        window_duration: Option<f64>,
        grid_ticks: i64,
    ) -> Vec<f64> {
        let tb = self.timebase();
        let ticks = tb.float_to_ticks(duration);
        if ticks <= 0 {
            return Vec::new();
        }
        let window_start = tb.float_to_ticks(window_offset);
        let window_ticks = window_duration.map(|d| tb.float_to_ticks(d));
        self.timeline
            .find_openings(ticks, window_start, window_ticks, 1)
            .into_iter()
            .filter(|o| o % grid_ticks == 0)
            .map(|o| tb.ticks_to_float(o))
            .collect()
    }

    /// Build the finalized note list from the timeline: each run of free
    /// ticks becomes one rest, each occupied run becomes its note. A note
    /// partly displaced by a later one keeps only the ticks it still holds.
    ///
    /// Calling again recomputes from the current cells. Notes placed after
    /// closeout are not reflected until the next call.
    pub fn closeout(&mut self) -> &[Note] {
        let tb = self.timebase();
        let cells = self.timeline.cells();
        let mut finalized = Vec::new();
        let mut i = 0;
        while i < cells.len() {
            let owner = cells[i].note;
            let mut j = i + 1;
            while j < cells.len() && cells[j].note == owner && !cells[j].note_start {
                j += 1;
            }
            let fragment = |pitch: Pitch, articulations: Articulations| Note {
                offset: tb.ticks_to_float(i as i64),
                duration: tb.ticks_to_float((j - i) as i64),
                start_tick: i,
                tick_len: j - i,
                pitch,
                articulations,
            };
            let note = match owner.and_then(|id| self.notes.get(id.0)) {
                Some(note) if note.start_tick == i && note.tick_len == j - i => note.clone(),
                Some(note) => fragment(note.pitch.clone(), note.articulations),
                None => fragment(Pitch::Rest, Articulations::default()),
            };
            finalized.push(note);
            i = j;
        }
        info!(
            "{}: closeout {} notes ({} rests)",
            self.part_id,
            finalized.len(),
            finalized.iter().filter(|n| n.is_rest()).count()
        );
        self.finalized = finalized;
        &self.finalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument(part_name: &str, n_quarters: usize, tpq: u32) -> Instrument {
        let table = InstrumentTable::default();
        Instrument::new(part_name, &table, n_quarters, TimeBase::new(tpq).unwrap()).unwrap()
    }

    fn spans(notes: &[Note]) -> Vec<(f64, f64, Pitch)> {
        notes.iter().map(|n| (n.offset, n.duration, n.pitch.clone())).collect()
    }

    #[test]
    fn part_names() {
        assert_eq!(parse_part_name("violin 2"), ("violin".to_string(), Some(2)));
        assert_eq!(parse_part_name("bass clarinet"), ("bass_clarinet".to_string(), None));
        assert_eq!(parse_part_name("oboe"), ("oboe".to_string(), None));
        assert_eq!(parse_part_name("7"), ("7".to_string(), None));

        let vln = instrument("violin 2", 4, 4);
        assert_eq!(vln.name, "violin");
        assert_eq!(vln.number, Some(2));
        assert_eq!(vln.part_id, "violin_2");
        assert_eq!(vln.abbreviation_id, "vln2");
        assert_eq!(vln.abbreviation, "vln 2");

        let first = instrument("violin 1", 4, 4);
        assert_eq!(first.part_id, "violin_1");
        assert_eq!(first.abbreviation_id, "vln");
        assert_eq!(first.abbreviation, "vln");

        let ob = instrument("oboe", 4, 4);
        assert_eq!(ob.part_id, "oboe");
        assert_eq!(ob.abbreviation_id, "ob");
    }

    #[test]
    fn unknown_instrument() {
        let r = Instrument::new("kazoo 1", &InstrumentTable::default(), 4, TimeBase::default());
        assert!(matches!(r, Err(EngineError::UnknownInstrument(name)) if name == "kazoo"));
    }

    #[test]
    fn violin_registers() {
        let vln = instrument("violin", 4, 4);
        let r = &vln.registers;
        assert_eq!(r.chunks.len(), 7);
        assert_eq!(r.lowest(), &[55, 56, 57, 58, 59, 60]);
        assert_eq!(r.middle(), &[73, 74, 75, 76, 77]);
        assert_eq!(r.highest(), &[90, 91, 92, 93, 94, 95]);
        let total: usize = r.chunks.iter().map(Vec::len).sum();
        assert_eq!(total, 41);
        assert!(!r.safe().contains(&55) && !r.safe().contains(&95));
        assert!(r.very_safe().iter().all(|p| r.safe().contains(p)));
    }

    #[test]
    fn percussion_has_no_registers() {
        let perc = instrument("percussion", 4, 4);
        assert!(perc.range().is_empty());
        assert!(perc.registers.safe().is_empty());
        assert!(perc.registers.lowest().is_empty());
    }

    #[test]
    fn put_note_bounds() {
        let mut ob = instrument("oboe", 4, 4);
        let plain = Articulations::default();
        for offset in [-1.0, 3.5] {
            let r = ob.put_note(offset, 1.0, 60, plain);
            assert!(matches!(r, Err(EngineError::OutOfRange { .. })), "offset {offset}");
        }
        for duration in [0.0, -1.0, 0.1] {
            let r = ob.put_note(0.0, duration, 60, plain);
            assert!(matches!(r, Err(EngineError::InvalidInput(_))), "duration {duration}");
        }
        assert!(ob.notes().is_empty());
        assert_eq!(ob.put_note(3.0, 1.0, 60, Articulations::default()).unwrap(), NoteId(0));
    }

    #[test]
    fn append_note_follows_latest() {
        let mut ob = instrument("oboe", 8, 4);
        ob.append_note(1.5, 60, Articulations::default()).unwrap();
        ob.append_note(0.5, 62, Articulations::default()).unwrap();
        assert_eq!(ob.notes()[1].offset, 1.5);
        ob.put_note(5.0, 1.0, 64, Articulations::default()).unwrap();
        let id = ob.append_note(1.0, 65, Articulations::default()).unwrap();
        assert_eq!(ob.note(id).unwrap().offset, 6.0);
    }

    #[test]
    fn get_finds_overlapping_notes() {
        let mut ob = instrument("oboe", 8, 4);
        ob.put_note(0.0, 2.0, 60, Articulations::default()).unwrap();
        ob.put_note(2.0, 1.0, 62, Articulations::default()).unwrap();
        let hits: Vec<u8> = ob.get(1.5, 1.0).iter().flat_map(|n| n.pitch.pitches()).collect();
        assert_eq!(hits, vec![60, 62]);
        let point: Vec<u8> = ob.get(2.0, 0.0).iter().flat_map(|n| n.pitch.pitches()).collect();
        assert_eq!(point, vec![62]);
        assert!(ob.get(3.0, 2.0).is_empty());
        assert!(ob.get(20.0, 1.0).is_empty());
    }

    #[test]
    fn huge_offsets_stay_in_bounds() {
        let mut ob = instrument("oboe", 4, 4);
        ob.put_note(0.0, 1.0, 60, Articulations::default()).unwrap();
        assert!(ob.get(f64::MAX, 0.0).is_empty());
        assert!(ob.get(1e300, 1e300).is_empty());
        let openings = ob.find_openings_aligned(1.0, 1.0, Some(f64::INFINITY), 1.0);
        assert_eq!(openings, vec![1.0, 2.0, 3.0]);
        assert!(ob.find_openings(1.0, f64::MAX, Some(f64::INFINITY)).is_empty());
    }

    #[test]
    fn openings_in_quarters() {
        let mut ob = instrument("oboe", 4, 4);
        ob.put_note(1.0, 1.0, 60, Articulations::default()).unwrap();
        assert_eq!(ob.find_openings(1.0, 0.0, None), vec![0.0, 2.0, 2.25, 2.5, 2.75, 3.0]);
        assert_eq!(ob.find_openings_aligned(1.0, 0.0, None, 0.5), vec![0.0, 2.0, 2.5, 3.0]);
        assert_eq!(ob.find_openings_aligned(0.5, 2.25, Some(1.0), 0.5), vec![2.5, 3.0]);
        assert!(ob.find_openings(0.0, 0.0, None).is_empty());
    }

    #[test]
    fn closeout_of_empty_part_is_one_rest() {
        let mut ob = instrument("oboe", 16, 4);
        let notes = ob.closeout();
        assert_eq!(spans(notes), vec![(0.0, 16.0, Pitch::Rest)]);
    }

    #[test]
    fn closeout_fills_gaps() {
        let mut ob = instrument("oboe", 4, 4);
        ob.put_note(0.5, 1.0, 60, Articulations::staccato()).unwrap();
        ob.put_note(1.5, 0.5, Pitch::chord([60, 64]), Articulations::default()).unwrap();
        ob.put_note(3.0, 0.5, 67, Articulations::default()).unwrap();
        let notes = ob.closeout().to_vec();
        assert_eq!(
            spans(&notes),
            vec![
                (0.0, 0.5, Pitch::Rest),
                (0.5, 1.0, Pitch::Single(60)),
                (1.5, 0.5, Pitch::chord([60, 64])),
                (2.0, 1.0, Pitch::Rest),
                (3.0, 0.5, Pitch::Single(67)),
                (3.5, 0.5, Pitch::Rest),
            ]
        );
        assert!(notes[1].articulations.staccato);
        let covered: usize = notes.iter().map(|n| n.tick_len).sum();
        assert_eq!(covered, ob.timeline().len());
    }

    #[test]
    fn closeout_trims_displaced_notes() {
        let mut ob = instrument("oboe", 4, 4);
        ob.put_note(0.0, 4.0, 60, Articulations::default()).unwrap();
        ob.put_note(1.0, 1.0, 62, Articulations::default()).unwrap();
        let notes = ob.closeout().to_vec();
        assert_eq!(
            spans(&notes),
            vec![
                (0.0, 1.0, Pitch::Single(60)),
                (1.0, 1.0, Pitch::Single(62)),
                (2.0, 2.0, Pitch::Single(60)),
            ]
        );
    }

    #[test]
    fn closeout_recomputes() {
        let mut ob = instrument("oboe", 2, 4);
        ob.closeout();
        ob.put_note(0.0, 1.0, 60, Articulations::default()).unwrap();
        assert_eq!(ob.finalized_notes().len(), 1);
        assert_eq!(ob.closeout().len(), 2);
    }
}
