// Per-instrument occupancy ledger: one cell per tick.
//
// The timeline is the source of truth for "is this instrument busy here".
// Each cell knows its tick offset, its (quarters, sixteenths, remainder)
// position, which note (if any) occupies it, and whether it is that note's
// first or last tick. Openings are found by brute-force scanning the cells;
// timelines are a few thousand ticks long, so a linear pass per query is
// cheap next to everything else a composition script does.
//
// Offsets and durations here are ticks. Conversion from quarter notes happens
// one level up, in instrument.rs.

use crate::duration::TimeBase;
use crate::error::{EngineError, Result};
use crate::note::NoteId;
use serde::{Deserialize, Serialize};

/// One tick of an instrument's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickCell {
    pub offset: usize,
    pub quarters: i64,
    pub sixteenths: i64,
    pub remaining_ticks: i64,
    /// The note sounding (or resting) over this tick.
    pub note: Option<NoteId>,
    pub note_start: bool,
    pub note_end: bool,
}

impl TickCell {
    pub fn is_free(&self) -> bool {
        self.note.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    pub timebase: TimeBase,
    cells: Vec<TickCell>,
}

impl Timeline {
    /// An empty timeline of `n_quarters` quarters at the given resolution.
    pub fn new(n_quarters: usize, timebase: TimeBase) -> Self {
        let n_ticks = n_quarters * timebase.ticks_per_quarter as usize;
        let cells = (0..n_ticks)
            .map(|offset| {
                let (quarters, sixteenths, remaining_ticks) =
                    timebase.ticks_to_quarters_and_sixteenths(offset as i64);
                TickCell {
                    offset,
                    quarters,
                    sixteenths,
                    remaining_ticks,
                    note: None,
                    note_start: false,
                    note_end: false,
                }
            })
            .collect();
        Timeline { timebase, cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[TickCell] {
        &self.cells
    }

    pub fn cell(&self, offset: usize) -> Option<&TickCell> {
        self.cells.get(offset)
    }

    /// `[offset, offset + duration)` as a checked cell range.
    fn span(&self, offset: i64, duration: i64) -> Result<std::ops::Range<usize>> {
        let out_of_range = || EngineError::OutOfRange {
            offset,
            duration,
            length: self.cells.len(),
        };
        if offset < 0 || duration < 0 {
            return Err(out_of_range());
        }
        let end = offset.checked_add(duration).ok_or_else(out_of_range)?;
        if end as u64 > self.cells.len() as u64 {
            return Err(out_of_range());
        }
        Ok(offset as usize..end as usize)
    }

    /// Mark `[offset, offset + duration)` as held by `note`. Whatever held
    /// those cells before is replaced without complaint.
    pub fn occupy(&mut self, offset: i64, duration: i64, note: NoteId) -> Result<()> {
        let range = self.span(offset, duration)?;
        let (first, last) = (range.start, range.end.saturating_sub(1));
        for cell in &mut self.cells[range] {
            cell.note = Some(note);
            cell.note_start = cell.offset == first;
            cell.note_end = cell.offset == last;
        }
        Ok(())
    }

    /// True iff the span lies inside the timeline and every cell is free.
    pub fn is_clear(&self, offset: i64, duration: i64) -> bool {
        match self.span(offset, duration) {
            Ok(range) => self.cells[range].iter().all(TickCell::is_free),
            Err(_) => false,
        }
    }

    /// Every start tick in `[window_offset, window_offset + window_duration)`
    /// (stepping by `step` ticks from the window start) where a span of
    /// `duration` ticks is clear. The window bounds where a note may start;
    /// the note itself may run past the window end but not past the
    /// timeline. `window_duration = None` means "to the end".
    pub fn find_openings(
        &self,
        duration: i64,
        window_offset: i64,
        window_duration: Option<i64>,
        step: usize,
    ) -> Vec<i64> {
        let len = self.cells.len() as i64;
        let start = window_offset.max(0);
        let end = match window_duration {
            Some(d) => window_offset.saturating_add(d).min(len),
            None => len,
        };
        if start >= end {
            return Vec::new();
        }
        (start..end)
            .step_by(step.max(1))
            .filter(|&o| self.is_clear(o, duration))
            .collect()
    }

    /// Compact text view: `.` free, `[` note start, `-` held, `]` last tick.
    pub fn summary(&self) -> String {
        let ticks_per_bar = self.timebase.ticks_per_quarter as usize * 4;
        let mut out = String::with_capacity(self.cells.len() * 2);
        for cell in &self.cells {
            if cell.offset > 0 && cell.offset % ticks_per_bar == 0 {
                out.push('|');
            }
            out.push(match (cell.note, cell.note_start, cell.note_end) {
                (None, _, _) => '.',
                (Some(_), true, true) => 'o',
                (Some(_), true, false) => '[',
                (Some(_), false, true) => ']',
                (Some(_), false, false) => '-',
            });
        }
        out
    }
}
