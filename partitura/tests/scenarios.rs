// End-to-end checks through the public API: layers, placement, context
// queries, closeout and the full fragment-and-variations run.

use partitura::compose::{compose_piece, harmony_holds, transposed};
use partitura::config::{InstrumentTable, PieceConfig};
use partitura::duration::{Duration, TimeBase};
use partitura::harmony::{ChordTypeTable, HarmonicFilter, MatchMode, normalize};
use partitura::instrument::Instrument;
use partitura::layer::Layer;
use partitura::lilypond::LilyPondScore;
use partitura::midi::MidiScore;
use partitura::note::{Articulations, Pitch};
use partitura::piece::Piece;
use partitura_rng::ComposeRng;
use pretty_assertions::assert_eq;

fn quartet(n_quarters: usize) -> Piece {
    Piece::new(
        "Scenario",
        &["violin 1", "violin 2", "viola", "bass"],
        60.0,
        n_quarters,
        TimeBase::new(4).unwrap(),
        &InstrumentTable::default(),
    )
    .unwrap()
}

#[test]
fn openings_around_a_held_note() {
    let table = InstrumentTable::default();
    let mut inst = Instrument::new("oboe", &table, 16, TimeBase::new(1).unwrap()).unwrap();
    inst.put_note(2.0, 3.0, 72, Articulations::default()).unwrap();
    let expected: Vec<f64> = [0.0, 1.0].into_iter().chain((5..16).map(|q| q as f64)).collect();
    assert_eq!(inst.find_openings(1.0, 0.0, None), expected);
}

#[test]
fn weighted_layer_sections() {
    let layer = Layer::new(vec![3.0, 1.0, 3.0, 1.0], 8.0).unwrap();
    let spans: Vec<(f64, f64)> = layer.sections().iter().map(|s| (s.offset, s.duration)).collect();
    assert_eq!(spans, vec![(0.0, 3.0), (3.0, 1.0), (4.0, 3.0), (7.0, 1.0)]);
}

#[test]
fn context_from_a_third_part() {
    let mut p = quartet(8);
    p.put_note("violin_1", 0.0, 2.0, 60, Articulations::default()).unwrap();
    p.put_note("violin_2", 0.0, 2.0, 64, Articulations::default()).unwrap();
    let ctx = p.get_context("viola", 0.0, 2.0).unwrap();
    assert_eq!(ctx.analysis.pitches, vec![60, 64]);
    assert_eq!(ctx.analysis.pitch_classes, vec![0, 4]);
}

#[test]
fn closeout_without_notes() {
    let mut p = quartet(16);
    p.closeout();
    for inst in p.instruments() {
        let notes = inst.finalized_notes();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].is_rest());
        assert_eq!((notes[0].offset, notes[0].duration), (0.0, 16.0));
    }
}

#[test]
fn one_second_quarter() {
    let d = Duration::from_ticks(24, TimeBase::new(24).unwrap()).unwrap().with_tempo(60.0).unwrap();
    assert_eq!(d.seconds, Some(1.0));
}

#[test]
fn closeout_covers_every_tick_once() {
    let mut p = quartet(8);
    let mut rng = ComposeRng::new(5);
    for _ in 0..40 {
        let part = *rng.choose(&["violin_1", "violin_2", "viola", "bass"]).unwrap();
        let dur = *rng.choose(&[0.25, 0.5, 1.0, 1.5]).unwrap();
        let inst = p.instrument(part).unwrap();
        let openings = inst.find_openings(dur, 0.0, None);
        if let Some(&offset) = rng.choose(&openings) {
            p.put_note(part, offset, dur, 60, Articulations::default()).unwrap();
        }
    }
    p.closeout();
    for inst in p.instruments() {
        let mut expected_start = 0;
        for note in inst.finalized_notes() {
            assert_eq!(note.start_tick, expected_start, "{}", inst.part_id);
            expected_start = note.end_tick();
        }
        assert_eq!(expected_start, inst.timeline().len());
        for pair in inst.finalized_notes().windows(2) {
            let both_rests = pair[0].is_rest() && pair[1].is_rest();
            assert!(!both_rests, "adjacent rests in {}", inst.part_id);
        }
    }
}

#[test]
fn filter_accepts_exactly_the_table() {
    let table = ChordTypeTable::default();
    let filter = HarmonicFilter::new(table.clone(), MatchMode::Exact);
    for existing in [vec![0u8, 4], vec![2, 9], vec![0, 3, 7]] {
        let allowed = filter.allowed_pitch_classes(&existing);
        for pc in 0..12u8 {
            let mut combined = existing.clone();
            combined.push(pc);
            let shape = normalize(combined);
            let in_table = table.chord_types.iter().any(|ct| ct.pattern == shape);
            assert_eq!(allowed.contains(&pc), in_table);
        }
    }
}

#[test]
fn full_run_is_reproducible_and_consonant() {
    let config = PieceConfig {
        n_quarters: 96,
        ..PieceConfig::default()
    };
    let a = compose_piece(&config, &mut ComposeRng::new(2018)).unwrap();
    let b = compose_piece(&config, &mut ComposeRng::new(2018)).unwrap();
    assert_eq!(a.variations, b.variations);

    for (ia, ib) in a.piece.instruments().iter().zip(b.piece.instruments()) {
        assert_eq!(ia.finalized_notes(), ib.finalized_notes());
        let covered: usize = ia.finalized_notes().iter().map(|n| n.tick_len).sum();
        assert_eq!(covered, ia.timeline().len());
    }

    // Harmony is only guaranteed on kept variations, not on the fragment.
    for shifts in &a.variations {
        assert!(!shifts.iter().all(|&s| s == shifts[0]));
        let variation = transposed(&a.fragment, shifts).unwrap();
        assert!(harmony_holds(&variation, &config.harmony).unwrap(), "{shifts:?}");
    }
    let form = a.piece.layers.layer("form").unwrap();
    assert_eq!(form.section(0).unwrap().annotation("section_type"), Some("intro"));

    // Tiles never run past the piece: 96 quarters hold three 32-quarter blocks.
    assert!(a.tiles <= 12);
    if a.variations.is_empty() {
        assert_eq!(a.tiles, 4);
    }
}

#[test]
fn sinks_write_files() {
    let mut p = quartet(4);
    p.put_note("violin_1", 0.0, 1.0, Pitch::chord([67, 76]), Articulations::accent()).unwrap();
    p.put_note("bass", 2.0, 2.0, 40, Articulations::staccato()).unwrap();
    p.closeout();

    let dir = std::env::temp_dir().join(format!("partitura_sinks_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let ly = dir.join("scenario.ly");
    let mid = dir.join("scenario.mid");
    p.notate(&mut LilyPondScore::new(p.score_header(), &ly)).unwrap();
    p.notate(&mut MidiScore::new(p.score_header(), &mid)).unwrap();

    let text = std::fs::read_to_string(&ly).unwrap();
    let bytes = std::fs::read(&mid).unwrap();
    std::fs::remove_dir_all(&dir).ok();

    assert!(text.contains("<g' e''>4->"));
    assert!(text.contains("e,2-."));
    assert!(text.contains("instrumentName = \"Viola\""));
    assert!(text.contains("instrumentName = \"Violin 2\" shortInstrumentName = \"vln 2\""));
    assert!(text.contains("instrumentName = \"Violin 1\" shortInstrumentName = \"vln\""));
    let smf = midly::Smf::parse(&bytes).unwrap();
    assert_eq!(smf.tracks.len(), 5);
}
