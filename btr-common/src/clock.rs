//! Minute-of-day clock arithmetic
//!
//! Birth-time estimates live on a 24-hour circle: minute 1439 (23:59) is one
//! minute away from minute 0 (00:00). Every distance and mean over
//! minute-of-day values goes through this module.

/// Minutes in one civil day
pub const MINUTES_PER_DAY: u16 = 1440;

/// Wrap any signed minute offset onto the 0..1440 circle.
///
/// # Examples
///
/// ```
/// use btr_common::clock::wrap_minute;
///
/// assert_eq!(wrap_minute(1445), 5);
/// assert_eq!(wrap_minute(-10), 1430);
/// assert_eq!(wrap_minute(720), 720);
/// ```
pub fn wrap_minute(minute: i64) -> u16 {
    minute.rem_euclid(MINUTES_PER_DAY as i64) as u16
}

/// Circular distance between two minute-of-day values, in minutes.
///
/// `d = min(|a-b|, 1440-|a-b|)`, so the result is always in `0..=720`.
///
/// # Examples
///
/// ```
/// use btr_common::clock::circular_distance;
///
/// // 23:55 and 00:05 are ten minutes apart, not 1430
/// assert_eq!(circular_distance(1435, 5), 10);
/// assert_eq!(circular_distance(868, 872), 4);
/// ```
pub fn circular_distance(a: u16, b: u16) -> u16 {
    let a = a % MINUTES_PER_DAY;
    let b = b % MINUTES_PER_DAY;
    let diff = a.abs_diff(b);
    diff.min(MINUTES_PER_DAY - diff)
}

/// Signed shortest offset from `from` to `to` in `-719..=720`.
pub fn signed_offset(from: u16, to: u16) -> i32 {
    let raw = (to as i32 - from as i32).rem_euclid(MINUTES_PER_DAY as i32);
    if raw > (MINUTES_PER_DAY / 2) as i32 {
        raw - MINUTES_PER_DAY as i32
    } else {
        raw
    }
}

/// Weighted circular mean of minute-of-day values.
///
/// Returns `None` when the total weight is zero or the weighted vectors
/// cancel out (e.g. two equal weights twelve hours apart), because no mean
/// direction exists in that case.
///
/// # Examples
///
/// ```
/// use btr_common::clock::weighted_circular_mean;
///
/// // Mean across midnight stays near midnight
/// assert_eq!(weighted_circular_mean(&[(1430, 1.0), (10, 1.0)]), Some(0));
/// assert_eq!(weighted_circular_mean(&[(0, 1.0), (720, 1.0)]), None);
/// ```
pub fn weighted_circular_mean(samples: &[(u16, f64)]) -> Option<u16> {
    let total: f64 = samples.iter().map(|(_, w)| w.max(0.0)).sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }

    let (mut sin_sum, mut cos_sum) = (0.0_f64, 0.0_f64);
    for &(minute, weight) in samples {
        let weight = weight.max(0.0);
        let angle = minute_to_radians(minute);
        sin_sum += weight * angle.sin();
        cos_sum += weight * angle.cos();
    }

    let resultant = (sin_sum * sin_sum + cos_sum * cos_sum).sqrt() / total;
    if resultant < 1e-9 {
        return None;
    }

    let angle = sin_sum.atan2(cos_sum);
    let minutes = angle / std::f64::consts::TAU * MINUTES_PER_DAY as f64;
    Some(wrap_minute(minutes.round() as i64))
}

fn minute_to_radians(minute: u16) -> f64 {
    (minute % MINUTES_PER_DAY) as f64 / MINUTES_PER_DAY as f64 * std::f64::consts::TAU
}

/// Format a minute-of-day as `HH:MM`.
///
/// # Examples
///
/// ```
/// use btr_common::clock::format_minute_of_day;
///
/// assert_eq!(format_minute_of_day(0), "00:00");
/// assert_eq!(format_minute_of_day(868), "14:28");
/// assert_eq!(format_minute_of_day(1439), "23:59");
/// ```
pub fn format_minute_of_day(minute: u16) -> String {
    let minute = minute % MINUTES_PER_DAY;
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Parse a clock time into a minute-of-day.
///
/// Accepts `HH:MM`, `HH:MM:SS` (seconds truncated) and 12-hour forms such as
/// `2:28 PM` / `2:28pm`. Returns `None` for anything outside 00:00-23:59.
///
/// # Examples
///
/// ```
/// use btr_common::clock::parse_clock_time;
///
/// assert_eq!(parse_clock_time("14:28"), Some(868));
/// assert_eq!(parse_clock_time("2:28 PM"), Some(868));
/// assert_eq!(parse_clock_time("12:05 am"), Some(5));
/// assert_eq!(parse_clock_time("24:00"), None);
/// assert_eq!(parse_clock_time("noonish"), None);
/// ```
pub fn parse_clock_time(input: &str) -> Option<u16> {
    let lowered = input.trim().to_ascii_lowercase();
    let (body, meridiem) = if let Some(rest) = lowered.strip_suffix("am") {
        (rest.trim_end(), Some(false))
    } else if let Some(rest) = lowered.strip_suffix("pm") {
        (rest.trim_end(), Some(true))
    } else {
        (lowered.as_str(), None)
    };

    let mut parts = body.split(':');
    let hour: u16 = parse_component(parts.next()?)?;
    let minute: u16 = parse_component(parts.next()?)?;
    if let Some(seconds) = parts.next() {
        let seconds: u16 = parse_component(seconds)?;
        if seconds > 59 {
            return None;
        }
    }
    if parts.next().is_some() || minute > 59 {
        return None;
    }

    let hour = match meridiem {
        None if hour <= 23 => hour,
        Some(is_pm) if (1..=12).contains(&hour) => (hour % 12) + if is_pm { 12 } else { 0 },
        _ => return None,
    };

    Some(hour * 60 + minute)
}

fn parse_component(part: &str) -> Option<u16> {
    if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

/// Parse `UTC`, `GMT+5`, `UTC-03:30`, `+0530`, ... into minutes east of UTC
pub fn parse_utc_offset(raw: &str) -> Option<i32> {
    let tz = raw.trim();
    if tz == "Z" {
        return Some(0);
    }
    let rest = tz
        .strip_prefix("UTC")
        .or_else(|| tz.strip_prefix("GMT"))
        .unwrap_or(tz);
    if rest.is_empty() {
        return (tz != rest).then_some(0);
    }

    let (sign, digits) = match rest.chars().next()? {
        '+' => (1, &rest[1..]),
        '-' => (-1, &rest[1..]),
        _ => return None,
    };
    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() == 4 => digits.split_at(2),
        None => (digits, "0"),
    };
    if hours.is_empty() || hours.len() > 2 || minutes.is_empty() || minutes.len() > 2 {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    Some(sign * (hours * 60 + minutes))
}

/// A validated minute-of-day that serializes as `HH:MM`.
///
/// Deserialization accepts everything [`parse_clock_time`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

impl ClockTime {
    /// Build from a minute-of-day, wrapping values past midnight
    pub fn from_minute(minute: u16) -> Self {
        Self(minute % MINUTES_PER_DAY)
    }

    pub fn minute(self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_minute_of_day(self.0))
    }
}

impl std::str::FromStr for ClockTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_clock_time(s)
            .map(ClockTime)
            .ok_or_else(|| format!("invalid clock time '{}'", s))
    }
}

impl serde::Serialize for ClockTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_minute_of_day(self.0))
    }
}

impl<'de> serde::Deserialize<'de> for ClockTime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
