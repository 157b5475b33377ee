//! Race times
//!
//! Timing systems upstream of the scorecard encode durations in whatever
//! unit was convenient at the time: clock strings such as `1:05.230`, bare
//! seconds, bare milliseconds, and occasionally a large garbled integer.
//! `normalize` maps all of them to milliseconds, and the `format_*`
//! functions render milliseconds back for display.
//!
//! Nothing in here fails. Input that cannot be interpreted normalizes to
//! `None` and renders as `"-"`, since these functions run for every cell of
//! every row on every update.

/// Rendering of an absent, zero or otherwise unusable time.
pub static PLACEHOLDER: &str = "-";

const MINUTE_MS: u64 = 60_000;

/// Bare numbers below this are seconds.
const SECONDS_LIMIT: f64 = 1_000.0;

/// Bare numbers below this (and at least `SECONDS_LIMIT`) are milliseconds.
/// Anything larger is an encoding artifact.
const MILLIS_LIMIT: f64 = 10_000_000.0;

/// A time value as received from upstream, before any interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTime {
    Number(f64),
    Text(String),
}

impl From<f64> for RawTime {
    fn from(value: f64) -> RawTime {
        RawTime::Number(value)
    }
}

impl From<&str> for RawTime {
    fn from(text: &str) -> RawTime {
        RawTime::Text(text.to_string())
    }
}

/// How much trust to put into a normalized value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Quality {
    /// Parsed directly from an unambiguous encoding.
    Exact,
    /// Recovered from an oversized value by reinterpreting its trailing digits.
    Salvaged,
    /// Oversized value with no plausible interpretation, kept as-is.
    Unreliable,
}

/// A duration in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaceTime {
    pub ms: f64,
    pub quality: Quality,
}

impl RaceTime {
    pub fn from_ms(ms: f64) -> RaceTime {
        RaceTime {
            ms,
            quality: Quality::Exact,
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.quality != Quality::Unreliable
    }

    /// Difference of two times. The result is only as trustworthy as the
    /// weaker operand.
    pub fn since(&self, earlier: &RaceTime) -> RaceTime {
        RaceTime {
            ms: self.ms - earlier.ms,
            quality: self.quality.max(earlier.quality),
        }
    }

    /// Mean over `count` equal parts, or `None` for zero parts.
    pub fn per(&self, count: u32) -> Option<RaceTime> {
        if count == 0 {
            return None;
        }
        Some(RaceTime {
            ms: self.ms / f64::from(count),
            quality: self.quality,
        })
    }
}

/// True for values upstream uses to say "no time yet".
pub fn is_placeholder(raw: &RawTime) -> bool {
    match raw {
        RawTime::Number(n) => *n == 0.0,
        RawTime::Text(text) => {
            let text = text.trim();
            matches!(text, "" | "-" | "0" | "null") || text.parse::<f64>() == Ok(0.0)
        }
    }
}

/// Converts an upstream time to milliseconds.
///
/// Text in `M:SS.mmm`, `SS.mmm` or `H:MM:SS.mmm` form is parsed as a clock.
/// Bare numbers are classified by magnitude: below 1000 they are seconds,
/// below 10,000,000 they are milliseconds, and above that they are a
/// corrupted encoding which is salvaged on a best-effort basis.
pub fn normalize(raw: Option<&RawTime>) -> Option<RaceTime> {
    match raw? {
        RawTime::Number(n) => normalize_number(*n),
        RawTime::Text(text) => normalize_text(text),
    }
}

fn normalize_text(text: &str) -> Option<RaceTime> {
    let text = text.trim();
    if is_placeholder(&RawTime::Text(text.to_string())) {
        return None;
    }
    if text.contains(':') {
        return parse_clock(text).map(RaceTime::from_ms);
    }
    normalize_number(text.parse::<f64>().ok()?)
}

fn parse_clock(text: &str) -> Option<f64> {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let (seconds, leading) = parts.split_last()?;
    let mut minutes: u64 = 0;
    for part in leading {
        minutes = minutes
            .checked_mul(60)?
            .checked_add(part.trim().parse::<u64>().ok()?)?;
    }
    let seconds = seconds.trim().parse::<f64>().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let ms = settle((minutes as f64) * (MINUTE_MS as f64) + seconds * 1000.0);
    if ms > 0.0 {
        Some(ms)
    } else {
        None
    }
}

fn normalize_number(value: f64) -> Option<RaceTime> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    if value < SECONDS_LIMIT {
        // Covers both "5.123" style fractions and whole seconds.
        Some(RaceTime::from_ms(settle(value * 1000.0)))
    } else if value < MILLIS_LIMIT {
        Some(RaceTime::from_ms(value))
    } else {
        Some(salvage(value))
    }
}

/// Drops binary floating point noise below a microsecond, so equal times
/// written in different units compare equal.
fn settle(ms: f64) -> f64 {
    (ms * 1000.0).round() / 1000.0
}

/// Oversized values have been seen to carry the real lap time in their
/// trailing digits: first try the last four digits, then the last five.
fn salvage(value: f64) -> RaceTime {
    let whole = value.trunc() as u64;
    let tail = whole % 10_000;
    if tail > 0 {
        return RaceTime {
            ms: tail as f64,
            quality: Quality::Salvaged,
        };
    }
    let tail = whole % 100_000;
    if tail > 1_000 && tail < 99_999 {
        return RaceTime {
            ms: tail as f64,
            quality: Quality::Salvaged,
        };
    }
    RaceTime {
        ms: value,
        quality: Quality::Unreliable,
    }
}

/// Renders milliseconds as `M:SS.mmm`, or `S.mmm` under one minute.
///
/// With `as_gap`, the result is prefixed with `+`, and gaps of more than a
/// minute are shown as whole laps behind (`+2L`). Absent, zero and negative
/// durations all render as `"-"`.
pub fn format_ms(ms: Option<f64>, as_gap: bool) -> String {
    let ms = match ms {
        Some(ms) if ms.is_finite() && ms > 0.0 => ms.round() as u64,
        _ => return PLACEHOLDER.to_string(),
    };
    if ms == 0 {
        return PLACEHOLDER.to_string();
    }
    if !as_gap {
        return clock(ms);
    }
    if ms > MINUTE_MS {
        format!("+{}L", ms / MINUTE_MS)
    } else {
        format!("+{}", clock(ms))
    }
}

fn clock(ms: u64) -> String {
    let minutes = ms / MINUTE_MS;
    let rem = ms % MINUTE_MS;
    if minutes > 0 {
        format!("{}:{:02}.{:03}", minutes, rem / 1000, rem % 1000)
    } else {
        format!("{}.{:03}", rem / 1000, rem % 1000)
    }
}

/// Renders a lap or total time. Unreliable values are echoed raw.
pub fn format_time(time: Option<&RaceTime>) -> String {
    match time {
        Some(t) if t.quality == Quality::Unreliable => format!("{}", t.ms.trunc()),
        Some(t) => format_ms(Some(t.ms), false),
        None => PLACEHOLDER.to_string(),
    }
}

/// Renders a gap to the leader.
pub fn format_gap(gap: Option<&RaceTime>) -> String {
    match gap {
        Some(t) if t.quality == Quality::Unreliable && t.ms > 0.0 => {
            format!("+{}", t.ms.trunc())
        }
        Some(t) => format_ms(Some(t.ms), true),
        None => PLACEHOLDER.to_string(),
    }
}

/// Normalizes and renders an upstream value in one step.
pub fn format_raw(raw: Option<&RawTime>) -> String {
    format_time(normalize(raw).as_ref())
}
