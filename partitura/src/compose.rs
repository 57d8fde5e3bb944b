// Client-side composition toolkit built on the engine.
//
// The engine answers "where is there room" and "what else is sounding";
// everything here decides what to do with the answers:
//
// - `attempt`: bounded retry. A constrained search that comes back empty is
//   retried until it succeeds or a failure budget runs out.
// - `PitchWeighting` / `choose_pitch`: weighted choice among the pitches
//   that survived the harmonic filter, favoring small steps, upward motion,
//   table-weighted chord types and caller-favored pitch classes. A first
//   pass forbids repeating the previous pitch; if nothing survives, a
//   second pass allows it.
// - `place_harmonized_note`: one full generate / filter / choose cycle for
//   one part: pick an opening, query the context, filter, choose, place.
// - The fragment-and-variations script driven by the `generate` binary:
//   compose a short fragment, search per-part transpositions of it whose
//   every sixteenth still lands on an allowed chord type, and tile the
//   fragment and its good variations through the piece.

use crate::config::{FragmentConfig, PieceConfig};
use crate::error::Result;
use crate::harmony::{Candidate, HarmonicFilter};
use crate::instrument::Instrument;
use crate::note::{Articulations, NoteId};
use crate::piece::Piece;
use log::{debug, info, warn};
use partitura_rng::ComposeRng;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Bounded retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    Success { value: T, failures: usize },
    Exhausted { failures: usize },
}

impl<T> Attempt<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Attempt::Success { value, .. } => Some(value),
            Attempt::Exhausted { .. } => None,
        }
    }

    pub fn failures(&self) -> usize {
        match self {
            Attempt::Success { failures, .. } | Attempt::Exhausted { failures } => *failures,
        }
    }
}

/// Call `f` until it returns `Some`, giving up once more than
/// `max_failures` calls have come back empty.
pub fn attempt<T>(max_failures: usize, mut f: impl FnMut() -> Option<T>) -> Attempt<T> {
    let mut failures = 0;
    loop {
        if let Some(value) = f() {
            return Attempt::Success { value, failures };
        }
        failures += 1;
        if failures > max_failures {
            return Attempt::Exhausted { failures };
        }
    }
}

// ---------------------------------------------------------------------------
// Pitch choice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchWeighting {
    /// Weight by semitone distance from the previous pitch. Distances past
    /// the end of the table weigh nothing.
    pub distance_weights: Vec<f64>,
    pub distance_factor: f64,
    /// Multiplier on the chord-type table weight.
    pub harmony_factor: f64,
    /// Multiplier for pitches in a favored pitch class.
    pub favored_bonus: f64,
    /// Multiplier for moving up from the previous pitch.
    pub upward_bonus: f64,
}

impl Default for PitchWeighting {
    fn default() -> Self {
        let mut distance_weights = vec![0.25, 1.0, 0.8];
        distance_weights.extend((3..50).map(|x| 1.0 / 2f64.powi(x)));
        PitchWeighting {
            distance_weights,
            distance_factor: 1.0,
            harmony_factor: 0.33,
            favored_bonus: 3.0,
            upward_bonus: 1.5,
        }
    }
}

impl PitchWeighting {
    pub fn weight(&self, candidate: &Candidate, previous: Option<u8>, favored: &[u8]) -> f64 {
        let distance_weight = match previous {
            Some(p) => self
                .distance_weights
                .get(p.abs_diff(candidate.pitch) as usize)
                .copied()
                .unwrap_or(0.0),
            None => 1.0,
        };
        let mut weight =
            distance_weight * self.distance_factor + candidate.harmony_weight * self.harmony_factor;
        if favored.contains(&(candidate.pitch % 12)) {
            weight *= self.favored_bonus;
        }
        if previous.is_some_and(|p| candidate.pitch > p) {
            weight *= self.upward_bonus;
        }
        weight
    }
}

/// Weighted choice among `candidates`, first without repeating `previous`,
/// then allowing it.
pub fn choose_pitch(
    rng: &mut ComposeRng,
    candidates: &[Candidate],
    weighting: &PitchWeighting,
    previous: Option<u8>,
    favored: &[u8],
) -> Option<u8> {
    let mut pick = |allow_repeat: bool| {
        let options: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| allow_repeat || Some(c.pitch) != previous)
            .collect();
        let weights: Vec<f64> = options
            .iter()
            .map(|c| weighting.weight(c, previous, favored))
            .collect();
        rng.weighted_choice(&options, &weights).map(|c| c.pitch)
    };
    pick(false).or_else(|| pick(true))
}

/// Highest pitch of the last sounding note that ends by `offset`.
pub fn previous_pitch(inst: &Instrument, offset: f64) -> Option<u8> {
    let tick = inst.timebase().float_to_ticks(offset).max(0) as usize;
    inst.notes()
        .iter()
        .filter(|n| !n.is_rest() && n.end_tick() <= tick)
        .max_by_key(|n| n.end_tick())
        .and_then(|n| n.pitch.pitches().last().copied())
}

// ---------------------------------------------------------------------------
// One placement cycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PlacementRequest<'a> {
    pub part_id: &'a str,
    /// Quarters.
    pub duration: f64,
    pub window_offset: f64,
    pub window_duration: Option<f64>,
    /// Openings must be multiples of this many quarters.
    pub grid: f64,
    /// Pitches the part may use.
    pub register: &'a [u8],
    /// Pitch classes that get the weighting's favored bonus.
    pub favored: &'a [u8],
    pub articulations: Articulations,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    Placed { id: NoteId, offset: f64, pitch: u8 },
    /// The part has no room in the window.
    NoOpening,
    /// Room was found but no register pitch fits the harmony there.
    NoCandidate { offset: f64 },
}

/// Pick an opening, filter the register against what the other parts sound
/// there, choose a pitch and place it. With nothing else sounding every
/// register pitch is a candidate.
pub fn place_harmonized_note(
    piece: &mut Piece,
    filter: &HarmonicFilter,
    weighting: &PitchWeighting,
    rng: &mut ComposeRng,
    request: &PlacementRequest<'_>,
) -> Result<Placement> {
    let inst = piece.instrument(request.part_id)?;
    let openings = inst.find_openings_aligned(
        request.duration,
        request.window_offset,
        request.window_duration,
        request.grid,
    );
    let Some(&offset) = rng.choose(&openings) else {
        return Ok(Placement::NoOpening);
    };
    let previous = previous_pitch(inst, offset);

    let context = piece.get_context(request.part_id, offset, request.duration)?;
    let existing = &context.analysis.pitch_classes;
    let candidates: Vec<Candidate> = if existing.is_empty() {
        request
            .register
            .iter()
            .map(|&pitch| Candidate { pitch, harmony_weight: 1.0 })
            .collect()
    } else {
        filter.candidates(existing, request.register)
    };

    let Some(pitch) = choose_pitch(rng, &candidates, weighting, previous, request.favored) else {
        debug!(
            "{}: nothing fits {:?} at {offset}",
            request.part_id, context.analysis.pitch_classes
        );
        return Ok(Placement::NoCandidate { offset });
    };
    let id = piece.put_note(
        request.part_id,
        offset,
        request.duration,
        pitch,
        request.articulations,
    )?;
    Ok(Placement::Placed { id, offset, pitch })
}

// ---------------------------------------------------------------------------
// Fragment and variations
// ---------------------------------------------------------------------------

/// The register a part composes in: the configured window if there is one,
/// else the instrument's safe register, else its whole range.
pub fn register_for(inst: &Instrument, config: &FragmentConfig) -> Vec<u8> {
    if let Some(&(low, high)) = config.registers.get(&inst.name) {
        return (low..=high).collect();
    }
    let safe = inst.registers.safe();
    if safe.is_empty() { inst.range() } else { safe }
}

/// Compose a closed-out fragment of `config.quarters` quarters for the
/// ensemble of `template`.
pub fn compose_fragment(
    template: &Piece,
    config: &FragmentConfig,
    filter: &HarmonicFilter,
    weighting: &PitchWeighting,
    rng: &mut ComposeRng,
) -> Result<Piece> {
    let mut fragment = template.empty_like(config.quarters)?;
    let part_ids: Vec<String> = fragment.part_ids().map(String::from).collect();
    let registers: Vec<Vec<u8>> = fragment
        .instruments()
        .iter()
        .map(|i| register_for(i, config))
        .collect();
    if part_ids.is_empty() || config.durations.is_empty() {
        fragment.closeout();
        return Ok(fragment);
    }

    let (low, high) = config.density;
    let density = rng.range_usize_inclusive(low.min(high), low.max(high));
    let mut failures = 0;
    let mut placed = 0;
    for _ in 0..density {
        let budget = config.max_failures.saturating_sub(failures);
        let outcome = attempt(budget, || {
            let duration = *rng.choose(&config.durations)?;
            let staccato = duration <= config.staccato_max_duration
                && rng.random_bool(config.staccato_chance);
            let index = rng.range_usize(0, part_ids.len());
            let request = PlacementRequest {
                part_id: &part_ids[index],
                duration,
                window_offset: 0.0,
                window_duration: Some(config.quarters as f64),
                grid: config.opening_grid,
                register: &registers[index],
                favored: &[],
                articulations: Articulations {
                    staccato,
                    ..Default::default()
                },
            };
            match place_harmonized_note(&mut fragment, filter, weighting, rng, &request) {
                Ok(Placement::Placed { .. }) => Some(Ok(())),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            }
        });
        failures += outcome.failures();
        match outcome.value() {
            Some(result) => {
                result?;
                placed += 1;
            }
            None => {
                warn!("fragment: gave up after {failures} failed placements");
                break;
            }
        }
    }
    info!("fragment: placed {placed} of {density} notes ({failures} failed attempts)");
    fragment.closeout();
    Ok(fragment)
}

/// A copy of `fragment` with each part's finalized notes shifted by the
/// matching entry of `shifts` (semitones), closed out.
pub fn transposed(fragment: &Piece, shifts: &[i16]) -> Result<Piece> {
    let mut variation = fragment.empty_like(fragment.n_quarters)?;
    for (inst, &shift) in fragment.instruments().iter().zip(shifts) {
        for note in inst.finalized_notes().iter().filter(|n| !n.is_rest()) {
            variation.put_note(
                &inst.part_id,
                note.offset,
                note.duration,
                note.pitch.transposed(shift),
                note.articulations,
            )?;
        }
    }
    variation.closeout();
    Ok(variation)
}

/// Whether the vertical harmony at every sixteenth is allowed by `filter`.
pub fn harmony_holds(piece: &Piece, filter: &HarmonicFilter) -> Result<bool> {
    let sixteenths = piece.layers.layer("sixteenths")?;
    Ok(sixteenths
        .sections()
        .iter()
        .all(|s| filter.allows(piece.sounding(s.offset, s.duration).pitch_classes)))
}

/// Every assignment of one shift in `low..=high` per part, in odometer
/// order with the first part varying slowest.
pub fn shift_combinations(n_parts: usize, low: i16, high: i16) -> Vec<Vec<i16>> {
    if n_parts == 0 || low > high {
        return Vec::new();
    }
    let mut combos = Vec::new();
    let mut current = vec![low; n_parts];
    loop {
        combos.push(current.clone());
        let mut k = n_parts;
        loop {
            if k == 0 {
                return combos;
            }
            k -= 1;
            if current[k] < high {
                current[k] += 1;
                break;
            }
            current[k] = low;
        }
    }
}

/// Per-part transpositions of `fragment` whose harmony holds at every
/// sixteenth. Shifting every part by the same interval is not a variation
/// and is skipped.
pub fn good_variations(
    fragment: &Piece,
    filter: &HarmonicFilter,
    (low, high): (i16, i16),
    max_variations: usize,
) -> Result<Vec<(Vec<i16>, Piece)>> {
    let mut good = Vec::new();
    let n_parts = fragment.instruments().len();
    for shifts in shift_combinations(n_parts, low, high) {
        if good.len() >= max_variations {
            break;
        }
        if shifts.iter().all(|&s| s == shifts[0]) {
            continue;
        }
        let variation = transposed(fragment, &shifts)?;
        if harmony_holds(&variation, filter)? {
            debug!("variation {shifts:?} holds");
            good.push((shifts, variation));
        }
    }
    info!("found {} good variations", good.len());
    Ok(good)
}

/// Copy `source`'s finalized notes into `target` `repeats` times back to
/// back starting at `at`. Repeats that would run past the end of `target`
/// are skipped. Returns how many were written.
pub fn tile(target: &mut Piece, source: &Piece, at: f64, repeats: usize) -> Result<usize> {
    let len = source.n_quarters as f64;
    let mut written = 0;
    for r in 0..repeats {
        let start = at + r as f64 * len;
        if start + len > target.n_quarters as f64 {
            debug!("tile at {start} would pass the end of the piece");
            continue;
        }
        for inst in source.instruments() {
            for note in inst.finalized_notes().iter().filter(|n| !n.is_rest()) {
                target.put_note(
                    &inst.part_id,
                    start + note.offset,
                    note.duration,
                    note.pitch.clone(),
                    note.articulations,
                )?;
            }
        }
        written += 1;
    }
    Ok(written)
}

/// Output of `compose_piece`.
#[derive(Debug, Clone)]
pub struct Composition {
    pub piece: Piece,
    pub fragment: Piece,
    /// Shifts of each variation tiled after the fragment, in order.
    pub variations: Vec<Vec<i16>>,
    pub tiles: usize,
}

/// Run the fragment-and-variations script for `config`.
pub fn compose_piece(config: &PieceConfig, rng: &mut ComposeRng) -> Result<Composition> {
    let mut piece = Piece::from_config(config)?;
    if !config.form.section_durations.is_empty() {
        let form = piece.add_layer("form", config.form.section_durations.clone())?;
        form.annotate_all("section_type", config.form.section_types.iter().cloned());
    }

    let frag = &config.fragment;
    let fragment = compose_fragment(&piece, frag, &config.harmony, &config.weighting, rng)?;
    let variations = good_variations(
        &fragment,
        &config.harmony,
        frag.transpositions,
        frag.max_variations,
    )?;

    let block = (frag.quarters * frag.repeats) as f64;
    let mut tiles = tile(&mut piece, &fragment, 0.0, frag.repeats)?;
    for (i, (_, variation)) in variations.iter().enumerate() {
        tiles += tile(&mut piece, variation, block * (i + 1) as f64, frag.repeats)?;
    }
    piece.closeout();

    Ok(Composition {
        piece,
        fragment,
        variations: variations.into_iter().map(|(shifts, _)| shifts).collect(),
        tiles,
    })
}
