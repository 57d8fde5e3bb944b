// Timebase conversions between ticks, float quarters and
// (quarters, sixteenths, remaining ticks).
//
// `TimeBase` is the pure conversion layer for one resolution. `Duration` is
// a value object built from exactly one source form; every other form is
// derived from it on construction and never changes afterwards.
//
// A "sixteenth" here is `ticks_per_quarter / 4` ticks with integer division.
// That is a true sixteenth only when the resolution is a multiple of four.
// Below four ticks per quarter there is no sixteenth subdivision at all: the
// sixteenth count stays zero and the whole sub-quarter remainder is reported
// as remaining ticks.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Ticks per quarter used when a caller doesn't pick one.
pub const DEFAULT_TICKS_PER_QUARTER: u32 = 24;

/// Conversion rules at a fixed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase {
    pub ticks_per_quarter: u32,
}

impl Default for TimeBase {
    fn default() -> Self {
        TimeBase {
            ticks_per_quarter: DEFAULT_TICKS_PER_QUARTER,
        }
    }
}

impl TimeBase {
    pub fn new(ticks_per_quarter: u32) -> Result<Self> {
        if ticks_per_quarter == 0 {
            return Err(EngineError::invalid("ticks_per_quarter must be at least 1"));
        }
        Ok(TimeBase { ticks_per_quarter })
    }

    fn tpq(self) -> i64 {
        self.ticks_per_quarter as i64
    }

    /// Integer ticks in one "sixteenth" (a quarter of the resolution).
    pub fn ticks_per_sixteenth(self) -> i64 {
        self.tpq() / 4
    }

    /// `round(quarters * ticks_per_quarter)`; rounds, never truncates.
    pub fn float_to_ticks(self, quarters: f64) -> i64 {
        (quarters * self.ticks_per_quarter as f64).round() as i64
    }

    pub fn ticks_to_float(self, ticks: i64) -> f64 {
        ticks as f64 / self.ticks_per_quarter as f64
    }

    /// `divmod(ticks, tpq)` then `divmod(remainder, tpq / 4)`.
    pub fn ticks_to_quarters_and_sixteenths(self, ticks: i64) -> (i64, i64, i64) {
        let quarters = ticks.div_euclid(self.tpq());
        let remainder = ticks.rem_euclid(self.tpq());
        let per_sixteenth = self.ticks_per_sixteenth();
        if per_sixteenth == 0 {
            return (quarters, 0, remainder);
        }
        (quarters, remainder / per_sixteenth, remainder % per_sixteenth)
    }

    pub fn quarters_and_sixteenths_to_ticks(
        self,
        quarters: i64,
        sixteenths: i64,
        remaining_ticks: i64,
    ) -> i64 {
        quarters * self.tpq() + sixteenths * self.ticks_per_sixteenth() + remaining_ticks
    }

    /// Seconds spanned by `ticks` at `quarters_per_minute`.
    pub fn seconds(self, ticks: i64, quarters_per_minute: f64) -> f64 {
        let ticks_per_minute = quarters_per_minute * self.ticks_per_quarter as f64;
        let seconds_per_tick = 60.0 / ticks_per_minute;
        seconds_per_tick * ticks as f64
    }
}

/// A span of musical time in every representation at once.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Duration {
    pub ticks: i64,
    pub float: f64,
    pub quarters: i64,
    pub sixteenths: i64,
    pub remaining_ticks: i64,
    pub ticks_per_quarter: u32,
    pub quarters_per_minute: Option<f64>,
    /// Real-time length; present only when a tempo was given.
    pub seconds: Option<f64>,
}

impl Duration {
    pub fn from_ticks(ticks: i64, timebase: TimeBase) -> Result<Self> {
        if ticks < 0 {
            return Err(EngineError::invalid(format!("negative duration of {ticks} ticks")));
        }
        Ok(Self::derive(ticks, timebase.ticks_to_float(ticks), timebase))
    }

    /// The float is kept as given; ticks are its rounded image.
    pub fn from_float(quarters: f64, timebase: TimeBase) -> Result<Self> {
        if !quarters.is_finite() || quarters < 0.0 {
            return Err(EngineError::invalid(format!("duration of {quarters} quarters")));
        }
        Ok(Self::derive(timebase.float_to_ticks(quarters), quarters, timebase))
    }

    pub fn from_quarters_and_sixteenths(
        quarters: i64,
        sixteenths: i64,
        remaining_ticks: i64,
        timebase: TimeBase,
    ) -> Result<Self> {
        let ticks =
            timebase.quarters_and_sixteenths_to_ticks(quarters, sixteenths, remaining_ticks);
        Self::from_ticks(ticks, timebase)
    }

    /// Attach a tempo and derive `seconds`.
    pub fn with_tempo(mut self, quarters_per_minute: f64) -> Result<Self> {
        if !quarters_per_minute.is_finite() || quarters_per_minute <= 0.0 {
            return Err(EngineError::invalid(format!(
                "tempo of {quarters_per_minute} quarters per minute"
            )));
        }
        self.quarters_per_minute = Some(quarters_per_minute);
        self.seconds = Some(self.timebase().seconds(self.ticks, quarters_per_minute));
        Ok(self)
    }

    pub fn timebase(&self) -> TimeBase {
        TimeBase {
            ticks_per_quarter: self.ticks_per_quarter,
        }
    }

    fn derive(ticks: i64, float: f64, timebase: TimeBase) -> Self {
        let (quarters, sixteenths, remaining_ticks) =
            timebase.ticks_to_quarters_and_sixteenths(ticks);
        Duration {
            ticks,
            float,
            quarters,
            sixteenths,
            remaining_ticks,
            ticks_per_quarter: timebase.ticks_per_quarter,
            quarters_per_minute: None,
            seconds: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tb(tpq: u32) -> TimeBase {
        TimeBase::new(tpq).unwrap()
    }

    #[test]
    fn float_to_ticks_rounds() {
        let t = tb(24);
        assert_eq!(t.float_to_ticks(1.0), 24);
        assert_eq!(t.float_to_ticks(0.25), 6);
        // 1/3 quarter at 32 tpq = 10.67 ticks -> 11, not 10
        assert_eq!(tb(32).float_to_ticks(1.0 / 3.0), 11);
    }

    #[test]
    fn decomposition_uses_quarter_of_resolution() {
        let t = tb(24);
        // 24 + 2*6 + 5 = 41
        assert_eq!(t.ticks_to_quarters_and_sixteenths(41), (1, 2, 5));
        assert_eq!(t.quarters_and_sixteenths_to_ticks(1, 2, 5), 41);
    }

    #[test]
    fn decomposition_at_odd_resolution() {
        // 6 / 4 = 1 tick per "sixteenth"
        let t = tb(6);
        assert_eq!(t.ticks_to_quarters_and_sixteenths(11), (1, 5, 0));
        // below 4 tpq there is no sixteenth subdivision
        let coarse = tb(2);
        assert_eq!(coarse.ticks_to_quarters_and_sixteenths(5), (2, 0, 1));
    }

    #[test]
    fn tick_round_trip_holds_across_resolutions() {
        for tpq in [1, 2, 3, 4, 6, 12, 24, 32, 480] {
            let t = tb(tpq);
            for ticks in 0..(tpq as i64 * 9) {
                let (q, s, r) = t.ticks_to_quarters_and_sixteenths(ticks);
                let back = t.quarters_and_sixteenths_to_ticks(q, s, r);
                assert_eq!(back, ticks, "tpq {tpq}, ticks {ticks}");
            }
        }
    }

    #[test]
    fn duration_from_each_source_agrees() {
        let t = tb(24);
        let a = Duration::from_ticks(42, t).unwrap();
        let b = Duration::from_float(1.75, t).unwrap();
        let c = Duration::from_quarters_and_sixteenths(1, 3, 0, t).unwrap();
        assert_eq!(a.ticks, 42);
        assert_eq!(b.ticks, 42);
        assert_eq!(c.ticks, 42);
        assert_eq!((a.quarters, a.sixteenths, a.remaining_ticks), (1, 3, 0));
        assert!((a.float - 1.75).abs() < 1e-12);
    }

    #[test]
    fn one_quarter_at_sixty_is_one_second() {
        let d = Duration::from_ticks(24, tb(24)).unwrap().with_tempo(60.0).unwrap();
        assert_eq!(d.seconds, Some(1.0));
    }

    #[test]
    fn seconds_scale_with_tempo() {
        let d = Duration::from_float(4.0, tb(32)).unwrap().with_tempo(120.0).unwrap();
        assert!((d.seconds.unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(TimeBase::new(0).is_err());
        assert!(Duration::from_ticks(-1, tb(24)).is_err());
        assert!(Duration::from_float(f64::NAN, tb(24)).is_err());
        assert!(Duration::from_float(-0.5, tb(24)).is_err());
        let d = Duration::from_ticks(24, tb(24)).unwrap();
        assert!(d.with_tempo(0.0).is_err());
    }
}
