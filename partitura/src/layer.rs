// Metrical and structural layers: named partitions of a piece's duration.
//
// A `Layer` cuts `[0, total)` (in quarter notes) into contiguous sections,
// either N equal ones or proportionally to a list of relative weights.
// `Layers` is the per-piece namespace of layers. It always contains the
// standard metrical hierarchy (bars, halves, quarters, eighths, sixteenths)
// and takes any number of custom layers ("form", "harmony", ...).
//
// Client scripts hang their own data on sections (a section's harmony, its
// form label) through the section's annotation map; the section type itself
// stays closed.
//
// Queries use half-open intervals. A zero-length query is a point query and
// returns the one section containing that instant.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a layer divides its total duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Division {
    Equal(usize),
    Weighted(Vec<f64>),
}

impl From<usize> for Division {
    fn from(n: usize) -> Self {
        Division::Equal(n)
    }
}

impl From<Vec<f64>> for Division {
    fn from(weights: Vec<f64>) -> Self {
        Division::Weighted(weights)
    }
}

impl From<&[f64]> for Division {
    fn from(weights: &[f64]) -> Self {
        Division::Weighted(weights.to_vec())
    }
}

/// One contiguous span of a layer, in quarter notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub offset: f64,
    pub duration: f64,
    pub next_offset: f64,
    pub index: usize,
    pub of_n_sections: usize,
    pub relative_duration: f64,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Section {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn contains(&self, offset: f64) -> bool {
        self.offset <= offset && offset < self.next_offset
    }
}

/// Half-open overlap of `[start, end)` with a query window. A zero-length
/// window is a point query: it overlaps spans that contain the point.
pub fn spans_overlap<T: PartialOrd + Copy>(start: T, end: T, query_start: T, query_end: T) -> bool {
    if query_start == query_end {
        return start <= query_start && query_start < end;
    }
    start < query_end && end > query_start
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub duration_quarters: f64,
    sections: Vec<Section>,
}

impl Layer {
    pub fn new(division: impl Into<Division>, duration_quarters: f64) -> Result<Self> {
        if !duration_quarters.is_finite() || duration_quarters <= 0.0 {
            return Err(EngineError::invalid(format!(
                "layer duration must be positive, got {duration_quarters}"
            )));
        }

        let relative: Vec<f64> = match division.into() {
            Division::Equal(0) => {
                return Err(EngineError::invalid("a layer needs at least one section"));
            }
            Division::Equal(n) => vec![1.0; n],
            Division::Weighted(weights) => {
                if weights.is_empty() {
                    return Err(EngineError::invalid("empty weight list"));
                }
                if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w <= 0.0) {
                    return Err(EngineError::invalid(format!(
                        "section weight must be positive, got {bad}"
                    )));
                }
                weights
            }
        };

        let sum: f64 = relative.iter().sum();
        if sum <= 0.0 {
            return Err(EngineError::invalid("section weights sum to zero"));
        }

        let n = relative.len();
        let mut sections = Vec::with_capacity(n);
        let mut offset = 0.0;
        for (index, &weight) in relative.iter().enumerate() {
            let duration = duration_quarters * weight / sum;
            // The last section closes exactly on the layer end so rounding
            // never leaves a sliver uncovered.
            let next_offset = if index + 1 == n { duration_quarters } else { offset + duration };
            sections.push(Section {
                offset,
                duration: next_offset - offset,
                next_offset,
                index,
                of_n_sections: n,
                relative_duration: weight,
                annotations: BTreeMap::new(),
            });
            offset = next_offset;
        }

        Ok(Layer {
            duration_quarters,
            sections,
        })
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    /// Sections intersecting `[offset, offset + duration)`, in order.
    pub fn query(&self, offset: f64, duration: f64) -> Vec<&Section> {
        let end = offset + duration;
        self.sections
            .iter()
            .filter(|s| spans_overlap(s.offset, s.next_offset, offset, end))
            .collect()
    }

    /// Attach a client annotation to one section.
    pub fn annotate(&mut self, index: usize, key: &str, value: impl Into<String>) -> Result<()> {
        let n = self.sections.len();
        let section = self
            .sections
            .get_mut(index)
            .ok_or_else(|| {
                EngineError::invalid(format!("section {index} of a {n}-section layer"))
            })?;
        section.annotations.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Annotate sections in order from an iterator of values; stops at the
    /// shorter of the two.
    pub fn annotate_all<I, V>(&mut self, key: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        for (section, value) in self.sections.iter_mut().zip(values) {
            section.annotations.insert(key.to_string(), value.into());
        }
    }
}

/// Names of the metrical layers every piece starts with, coarse to fine.
pub const METER_LAYERS: [&str; 5] = ["bars", "halves", "quarters", "eighths", "sixteenths"];

/// The per-piece layer namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layers {
    pub n_quarters: usize,
    pub bpm: f64,
    layers: BTreeMap<String, Layer>,
}

impl Layers {
    /// Build the namespace with the metrical hierarchy in place. Bars are
    /// four quarters; a piece shorter than a bar still gets one bar (and one
    /// half) spanning all of it.
    pub fn new(n_quarters: usize, bpm: f64) -> Result<Self> {
        if n_quarters == 0 {
            return Err(EngineError::invalid("a piece needs at least one quarter"));
        }
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(EngineError::invalid(format!("tempo must be positive, got {bpm}")));
        }
        let mut layers = Layers {
            n_quarters,
            bpm,
            layers: BTreeMap::new(),
        };
        let counts = [
            (n_quarters / 4).max(1),
            (n_quarters / 2).max(1),
            n_quarters,
            n_quarters * 2,
            n_quarters * 4,
        ];
        for (name, count) in METER_LAYERS.iter().zip(counts) {
            layers.add_layer(name, count)?;
        }
        Ok(layers)
    }

    /// Add (or replace) a layer spanning the whole piece.
    pub fn add_layer(&mut self, name: &str, division: impl Into<Division>) -> Result<&mut Layer> {
        let layer = Layer::new(division, self.n_quarters as f64)?;
        self.layers.insert(name.to_string(), layer);
        self.layer_mut(name)
    }

    pub fn layer(&self, name: &str) -> Result<&Layer> {
        self.layers
            .get(name)
            .ok_or_else(|| EngineError::UnknownLayer(name.to_string()))
    }

    pub fn layer_mut(&mut self, name: &str) -> Result<&mut Layer> {
        self.layers
            .get_mut(name)
            .ok_or_else(|| EngineError::UnknownLayer(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    /// Matching sections of every layer, keyed by layer name.
    pub fn get(&self, offset: f64, duration: f64) -> BTreeMap<&str, Vec<&Section>> {
        self.layers
            .iter()
            .map(|(name, layer)| (name.as_str(), layer.query(offset, duration)))
            .collect()
    }

    /// Matching sections of one named layer.
    pub fn get_layer(&self, name: &str, offset: f64, duration: f64) -> Result<Vec<&Section>> {
        Ok(self.layer(name)?.query(offset, duration))
    }

    pub fn quarter_duration_seconds(&self) -> f64 {
        60.0 / self.bpm
    }

    pub fn bar_duration_seconds(&self) -> f64 {
        self.quarter_duration_seconds() * 4.0
    }

    pub fn half_note_duration_seconds(&self) -> f64 {
        self.bar_duration_seconds() / 2.0
    }

    pub fn eighth_note_duration_seconds(&self) -> f64 {
        self.bar_duration_seconds() / 8.0
    }

    pub fn sixteenth_note_duration_seconds(&self) -> f64 {
        self.bar_duration_seconds() / 16.0
    }

    pub fn duration_seconds(&self) -> f64 {
        self.quarter_duration_seconds() * self.n_quarters as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(layer: &Layer) -> Vec<(f64, f64)> {
        layer.sections().iter().map(|s| (s.offset, s.duration)).collect()
    }

    #[test]
    fn weighted_layer_offsets() {
        let layer = Layer::new(vec![3.0, 1.0, 3.0, 1.0], 8.0).unwrap();
        assert_eq!(spans(&layer), vec![(0.0, 3.0), (3.0, 1.0), (4.0, 3.0), (7.0, 1.0)]);
        assert_eq!(layer.section(2).unwrap().relative_duration, 3.0);
    }

    #[test]
    fn equal_layer_offsets() {
        let layer = Layer::new(4, 16.0).unwrap();
        assert_eq!(spans(&layer), vec![(0.0, 4.0), (4.0, 4.0), (8.0, 4.0), (12.0, 4.0)]);
        assert!(layer.sections().iter().all(|s| s.of_n_sections == 4));
    }

    #[test]
    fn weighted_sections_tile_the_total() {
        let weights = vec![
            1.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 8.0, 4.0, 4.0, 4.0, 4.0, 1.0,
        ];
        let layer = Layer::new(weights, 232.0).unwrap();
        let total: f64 = layer.sections().iter().map(|s| s.duration).sum();
        assert!((total - 232.0).abs() < 1e-9);
        for pair in layer.sections().windows(2) {
            assert_eq!(pair[0].next_offset, pair[1].offset);
        }
        assert_eq!(layer.sections().last().unwrap().next_offset, 232.0);
    }

    #[test]
    fn thirds_still_tile_exactly() {
        let layer = Layer::new(3, 1.0).unwrap();
        assert_eq!(layer.sections().last().unwrap().next_offset, 1.0);
        assert_eq!(layer.sections()[0].next_offset, layer.sections()[1].offset);
    }

    #[test]
    fn rejects_bad_divisions() {
        assert!(Layer::new(0, 8.0).is_err());
        assert!(Layer::new(4, 0.0).is_err());
        assert!(Layer::new(4, -8.0).is_err());
        assert!(Layer::new(Vec::<f64>::new(), 8.0).is_err());
        assert!(Layer::new(vec![1.0, 0.0], 8.0).is_err());
        assert!(Layer::new(vec![1.0, -2.0], 8.0).is_err());
    }

    #[test]
    fn query_spanning_boundary() {
        let layer = Layer::new(vec![3.0, 1.0, 3.0, 1.0], 8.0).unwrap();
        let hits: Vec<usize> = layer.query(2.5, 2.0).iter().map(|s| s.index).collect();
        assert_eq!(hits, vec![0, 1, 2]);
        // touching the end of a section doesn't count
        let hits: Vec<usize> = layer.query(3.0, 1.0).iter().map(|s| s.index).collect();
        assert_eq!(hits, vec![1]);
    }

    #[test]
    fn point_query() {
        let layer = Layer::new(vec![3.0, 1.0, 3.0, 1.0], 8.0).unwrap();
        let hits: Vec<usize> = layer.query(3.0, 0.0).iter().map(|s| s.index).collect();
        assert_eq!(hits, vec![1]);
        let hits: Vec<usize> = layer.query(0.0, 0.0).iter().map(|s| s.index).collect();
        assert_eq!(hits, vec![0]);
        assert!(layer.query(8.0, 0.0).is_empty());
        assert!(layer.query(-1.0, 0.0).is_empty());
    }

    #[test]
    fn annotations() {
        let mut layer = Layer::new(vec![1.0, 2.0], 6.0).unwrap();
        layer.annotate_all("section_type", ["intro", "verse_a"]);
        layer.annotate(1, "harmony", "0 4 7").unwrap();
        assert_eq!(layer.section(0).unwrap().annotation("section_type"), Some("intro"));
        assert_eq!(layer.section(1).unwrap().annotation("harmony"), Some("0 4 7"));
        assert!(layer.annotate(5, "harmony", "x").is_err());
    }

    #[test]
    fn layers_build_meter() {
        let layers = Layers::new(16, 60.0).unwrap();
        assert_eq!(layers.layer("bars").unwrap().len(), 4);
        assert_eq!(layers.layer("halves").unwrap().len(), 8);
        assert_eq!(layers.layer("quarters").unwrap().len(), 16);
        assert_eq!(layers.layer("eighths").unwrap().len(), 32);
        assert_eq!(layers.layer("sixteenths").unwrap().len(), 64);
        assert_eq!(layers.quarter_duration_seconds(), 1.0);
        assert_eq!(layers.duration_seconds(), 16.0);
    }

    #[test]
    fn layers_get_every_layer() {
        let mut layers = Layers::new(16, 60.0).unwrap();
        layers.add_layer("harmonies", vec![3.0, 1.0, 3.0, 1.0, 3.0, 1.0, 3.0, 1.0]).unwrap();
        let got = layers.get(0.0, 0.25);
        assert_eq!(got.len(), 6);
        assert_eq!(got["harmonies"][0].duration, 3.0);
        assert_eq!(got["bars"][0].duration, 4.0);
        assert_eq!(got["sixteenths"].len(), 1);

        let bars = layers.get_layer("bars", 10.0, 0.0).unwrap();
        assert_eq!(bars[0].index, 2);
        assert!(matches!(layers.get_layer("form", 0.0, 1.0), Err(EngineError::UnknownLayer(_))));
    }

    #[test]
    fn short_piece_still_has_a_bar() {
        let layers = Layers::new(1, 90.0).unwrap();
        assert_eq!(layers.layer("bars").unwrap().len(), 1);
        assert_eq!(layers.layer("halves").unwrap().len(), 1);
    }
}
