//! Human-readable rate strings.
//!
//! Rates are derived from two accumulated byte totals and the sampling
//! interval. Formatting is pure and allocation-light; it is called once per
//! direction per cycle and once per ranked entry.

/// Rate text shown while no measurement is available (stopped, or before
/// the first complete cycle).
pub const NO_DATA: &str = "- - B/S";

/// Rate text for anything beyond the gigabyte band.
pub const SATURATED: &str = "MAX /S";

/// Rates below this are shown as zero.
const NOISE_FLOOR: f64 = 10.0;

/// Upper bound (exclusive) of every display band.
const BAND_CEILING: f64 = 1000.0;

const SCALE: f64 = 1024.0;

const SCALED_UNITS: [&str; 3] = ["K/S", "M/S", "G/S"];

/// Bytes per second between two accumulated totals.
///
/// A decrease (`cur < prev`) is a counter reset, not negative traffic, and
/// yields zero. A zero interval also yields zero.
pub fn bytes_per_second(prev: u64, cur: u64, interval_millis: u32) -> f64 {
    if interval_millis == 0 {
        return 0.0;
    }
    cur.saturating_sub(prev) as f64 * 1000.0 / f64::from(interval_millis)
}

/// Formats the rate between two accumulated totals, e.g. `"1.00 K/S"`.
pub fn format_rate(prev: u64, cur: u64, interval_millis: u32) -> String {
    format_bytes_per_second(bytes_per_second(prev, cur, interval_millis))
}

/// Formats a bytes-per-second value.
///
/// - below 10 B/s: `"0 B/S"`
/// - below 1000 B/s: whole bytes, `"512 B/S"`
/// - otherwise scaled by 1024 into K/M/G, two decimals under 100 and one
///   decimal from 100 up
/// - beyond the G band: [`SATURATED`]
///
/// Bands are chosen on the rounded figure, so a value never prints as the
/// ceiling of its own band.
pub fn format_bytes_per_second(rate: f64) -> String {
    // NaN lands here as well
    if !(rate >= NOISE_FLOOR) {
        return "0 B/S".to_string();
    }
    let whole = rate.round();
    if whole < BAND_CEILING {
        return format!("{} B/S", whole as u64);
    }

    let mut scaled = rate;
    for unit in SCALED_UNITS {
        scaled /= SCALE;
        let (rounded, digits) = scaled_digits(scaled);
        if rounded < BAND_CEILING {
            return format!("{digits} {unit}");
        }
    }
    SATURATED.to_string()
}

/// Rounded value and its text.
fn scaled_digits(value: f64) -> (f64, String) {
    let two = round_half_away(value, 2);
    if two < 100.0 {
        (two, format!("{two:.2}"))
    } else {
        let one = round_half_away(value, 1);
        (one, format!("{one:.1}"))
    }
}

/// `f64::round` rounds half away from zero; `{:.N}` formatting does not
/// guarantee that, so round explicitly before printing.
fn round_half_away(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
