//! Stream clocks for re-timing source timestamps onto the output cadence
//!
//! A `StreamClock` converts timestamps from a stream's native time base into
//! output ticks (video frames or fields, audio samples) and tracks how many
//! ticks have already been emitted. The difference between the two is what
//! the transform stages correct for.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Rational number of seconds per tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// Reduce `num/den` to lowest terms with a positive denominator
    pub fn reduced(num: i64, den: i64) -> Self {
        if den == 0 {
            return Self::new(num, den);
        }

        let divisor = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1) as i64;
        let sign = if den < 0 { -1 } else { 1 };
        Self::new(sign * num / divisor, sign * den / divisor)
    }

    /// Both terms non-zero
    pub fn is_valid(&self) -> bool {
        self.num != 0 && self.den != 0
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Rescale `value` from time base `from` to time base `to`, rounding to nearest
///
/// Ties round away from zero.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    let num = value as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;

    if den == 0 {
        return 0;
    }

    let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
    let half = den / 2;
    let rounded = if num >= 0 { (num + half) / den } else { (num - half) / den };

    rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Time base of one microsecond
pub const MICROSECONDS: Rational = Rational::new(1, 1_000_000);

/// Converts one stream's timestamps to output ticks and tracks emitted ticks
#[derive(Debug)]
pub struct StreamClock {
    /// Native time base of the source stream
    source: Rational,

    /// Output tick duration
    output: Rational,

    /// Start offset in output ticks; moved only by seeking
    offset: Arc<AtomicI64>,

    /// Output ticks already emitted
    cursor: i64,
}

impl StreamClock {
    /// Create a clock whose output position 0 is `start_offset` output ticks
    pub fn new(source: Rational, output: Rational, start_offset: i64) -> Self {
        Self {
            source,
            output,
            offset: Arc::new(AtomicI64::new(start_offset)),
            cursor: 0,
        }
    }

    /// Create a clock anchored at `start` expressed in `reference` time base
    ///
    /// The reference is normally the primary stream's time base and start
    /// time, so both streams share one origin.
    pub fn anchored(source: Rational, output: Rational, reference: Rational, start: i64) -> Self {
        Self::new(source, output, rescale(start, reference, output))
    }

    pub fn source_time_base(&self) -> Rational {
        self.source
    }

    pub fn output_time_base(&self) -> Rational {
        self.output
    }

    /// Output ticks between `timestamp` and the next tick to be emitted
    ///
    /// Negative means the timestamp is already behind the output position.
    pub fn delta(&self, timestamp: i64) -> i64 {
        rescale(timestamp, self.source, self.output) - self.start_offset() - self.cursor
    }

    /// Record `ticks` output ticks as emitted
    pub fn advance(&mut self, ticks: i64) {
        self.cursor += ticks;
    }

    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    pub fn start_offset(&self) -> i64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Handle the pull side uses to seek this clock
    pub fn seek_handle(&self) -> SeekHandle {
        SeekHandle {
            offset: Arc::clone(&self.offset),
            output: self.output,
        }
    }

    /// Number of output ticks covering `duration`
    pub fn duration_to_ticks(&self, duration: Duration) -> i64 {
        rescale(duration.as_micros() as i64, MICROSECONDS, self.output)
    }

    /// Whole seconds represented by a source timestamp
    pub fn source_seconds(&self, timestamp: i64) -> i64 {
        ((timestamp as i128 * self.source.num as i128) / self.source.den.max(1) as i128) as i64
    }

    /// Milliseconds represented by a source timestamp
    pub fn source_millis(&self, timestamp: i64) -> i64 {
        rescale(timestamp, self.source, Rational::new(1, 1000))
    }
}

/// Moves a clock's start offset from the pull-side thread
#[derive(Debug, Clone)]
pub struct SeekHandle {
    offset: Arc<AtomicI64>,
    output: Rational,
}

impl SeekHandle {
    /// Shift the clock by `seconds` (positive skips ahead)
    ///
    /// Returns the shift applied in output ticks.
    pub fn shift_seconds(&self, seconds: f64) -> i64 {
        let ticks = (seconds * self.output.den as f64 / self.output.num as f64).round() as i64;
        self.offset.fetch_add(ticks, Ordering::AcqRel);
        ticks
    }

    pub fn start_offset(&self) -> i64 {
        self.offset.load(Ordering::Acquire)
    }
}
