// Partitura generator: CLI entry point.
//
// Runs the fragment-and-variations script: compose a short harmonically
// filtered fragment for the ensemble, find per-part transpositions of it
// that keep every sixteenth on an allowed chord type, tile the fragment and
// its variations through the piece, and write LilyPond, MIDI and a JSON
// dump of the finalized parts.
//
// Usage:
//   cargo run -p partitura -- [--config PATH] [--seed N] [--quarters N]
//     [--tempo BPM] [--out DIR] [--max-variations N]
//
// Set RUST_LOG=debug for per-note placement logging.

use partitura::compose::compose_piece;
use partitura::config::PieceConfig;
use partitura::lilypond::LilyPondScore;
use partitura::midi::MidiScore;
use partitura::note::Note;
use partitura::piece::Piece;
use partitura_rng::ComposeRng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const USAGE: &str = "usage: generate [--config PATH] [--seed N] [--quarters N] [--tempo BPM] \
                     [--out DIR] [--max-variations N]";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        return;
    }

    let mut config = match parse_flag::<PathBuf>(&args, "--config") {
        Some(path) => match PieceConfig::load(&path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {e}");
                std::process::exit(1);
            }
        },
        None => PieceConfig::default(),
    };
    if let Some(q) = parse_flag(&args, "--quarters") {
        config.n_quarters = q;
    }
    if let Some(bpm) = parse_flag(&args, "--tempo") {
        config.bpm = bpm;
    }
    if let Some(n) = parse_flag(&args, "--max-variations") {
        config.fragment.max_variations = n;
    }
    let out_dir: PathBuf = parse_flag(&args, "--out").unwrap_or_else(|| PathBuf::from("output"));

    let (mut rng, seed) = match parse_flag::<u64>(&args, "--seed").or(config.seed) {
        Some(s) => (ComposeRng::new(s), s),
        None => ComposeRng::from_clock(),
    };

    println!("=== Partitura ===");
    println!("Title: {}", config.title);
    println!("Parts: {}", config.parts.join(", "));
    println!("Tempo: {} BPM", config.bpm);
    println!("Length: {} quarters ({:.1} bars)", config.n_quarters, config.n_quarters as f64 / 4.0);
    println!("Seed: {seed}");
    println!();

    println!("[1/3] Composing...");
    let composition = match compose_piece(&config, &mut rng) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error composing: {e}");
            std::process::exit(1);
        }
    };
    let fragment_notes: usize = composition
        .fragment
        .instruments()
        .iter()
        .map(|i| i.finalized_notes().iter().filter(|n| !n.is_rest()).count())
        .sum();
    println!(
        "  Fragment: {fragment_notes} notes over {} quarters",
        composition.fragment.n_quarters
    );
    println!("{}", indent(&composition.fragment.timeline_chart()));
    println!("  Good variations: {}", composition.variations.len());
    for shifts in &composition.variations {
        println!("    {shifts:?}");
    }
    println!("  Tiles placed: {}", composition.tiles);

    println!("[2/3] Preparing {}...", out_dir.display());
    if let Err(e) = std::fs::create_dir_all(&out_dir) {
        eprintln!("Error creating {}: {e}", out_dir.display());
        std::process::exit(1);
    }

    println!("[3/3] Writing notation...");
    let piece = &composition.piece;
    let stem = file_stem(&piece.title);
    let ly_path = out_dir.join(format!("{stem}.ly"));
    let midi_path = out_dir.join(format!("{stem}.mid"));
    let json_path = out_dir.join(format!("{stem}.json"));
    let result = piece
        .notate(&mut LilyPondScore::new(piece.score_header(), &ly_path))
        .and_then(|()| piece.notate(&mut MidiScore::new(piece.score_header(), &midi_path)))
        .and_then(|()| write_parts_json(piece, &json_path));
    if let Err(e) = result {
        eprintln!("  Error writing notation: {e}");
        std::process::exit(1);
    }
    println!("  {}", ly_path.display());
    println!("  {}", midi_path.display());
    println!("  {}", json_path.display());
    println!("  Done! Duration: {:.0}s", piece.layers.duration_seconds());
    println!();
    println!("Engrave with: lilypond -o {} {}", out_dir.display(), ly_path.display());
}

/// Dump every part's finalized notes, keyed by part id.
fn write_parts_json(piece: &Piece, path: &Path) -> partitura::Result<()> {
    let parts: BTreeMap<&str, &[Note]> = piece
        .instruments()
        .iter()
        .map(|i| (i.part_id.as_str(), i.finalized_notes()))
        .collect();
    std::fs::write(path, serde_json::to_string_pretty(&parts)?)?;
    Ok(())
}

/// A filesystem-friendly version of a title.
fn file_stem(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() { "piece".to_string() } else { stem.to_string() }
}

fn indent(text: &str) -> String {
    text.lines().map(|l| format!("    {l}")).collect::<Vec<_>>().join("\n")
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
