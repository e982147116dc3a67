//! Nominal time slots and timestamp helpers.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// Upper bound on the number of slots a single interval may expand to.
pub const MAX_TIMESTEPS: usize = 1_000_000;

/// Format of store coordinate keys, e.g. `20230910T221500Z`.
const COORDINATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    /// Create an interval, rejecting empty or inverted ranges.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CommonResult<Self> {
        let interval = Self { start, end };
        interval.validate()?;
        Ok(interval)
    }

    pub fn validate(&self) -> CommonResult<()> {
        if self.start >= self.end {
            return Err(CommonError::invalid_interval(format!(
                "interval is empty: start {} is not before end {}",
                self.start.to_rfc3339(),
                self.end.to_rfc3339()
            )));
        }
        Ok(())
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Every nominal timestamp inside the interval.
    ///
    /// Slots are multiples of `step` since the Unix epoch, so the same instant
    /// always maps to the same slot regardless of where the interval starts.
    pub fn nominal_timestamps(&self, step: Duration) -> CommonResult<Vec<DateTime<Utc>>> {
        self.validate()?;

        let step_ms = step.num_milliseconds();
        if step_ms <= 0 {
            return Err(CommonError::invalid_interval(format!(
                "step must be positive, got {} ms",
                step_ms
            )));
        }

        let start_ms = self.start.timestamp_millis();
        let end_ms = self.end.timestamp_millis();
        let rem = start_ms.rem_euclid(step_ms);
        let first = if rem == 0 { start_ms } else { start_ms - rem + step_ms };

        let expected = if first < end_ms {
            ((end_ms - first - 1) / step_ms + 1) as usize
        } else {
            0
        };
        if expected > MAX_TIMESTEPS {
            return Err(CommonError::invalid_interval(format!(
                "interval expands to {} timesteps (limit {})",
                expected, MAX_TIMESTEPS
            )));
        }

        let mut slots = Vec::with_capacity(expected);
        let mut t = first;
        while t < end_ms {
            let ts = Utc.timestamp_millis_opt(t).single().ok_or_else(|| {
                CommonError::invalid_interval(format!("timestamp {} ms out of range", t))
            })?;
            slots.push(ts);
            t += step_ms;
        }

        if slots.is_empty() {
            return Err(CommonError::invalid_interval(format!(
                "no {} s slot falls inside [{}, {})",
                step.num_seconds(),
                self.start.to_rfc3339(),
                self.end.to_rfc3339()
            )));
        }

        Ok(slots)
    }
}

/// Store coordinate key for a nominal timestamp.
pub fn coordinate_key(ts: DateTime<Utc>) -> String {
    ts.format(COORDINATE_FORMAT).to_string()
}

/// Inverse of [`coordinate_key`].
pub fn parse_coordinate_key(key: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(key, COORDINATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Extract the scan start time encoded in a raw instrument filename.
///
/// Supports GOES ABI names (`..._s20241211800214_e..._c....nc`, year +
/// day-of-year + HHMMSS + tenths) and SEVIRI native names
/// (`MSG3-SEVI-MSG15-0100-NA-20230910221240.874000000Z-NA.nat`, where the
/// fourteen characters before the first `.` hold `%Y%m%d%H%M%S`).
pub fn scan_time_from_filename(filename: &str) -> Option<DateTime<Utc>> {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    goes_scan_time(name).or_else(|| seviri_scan_time(name))
}

fn goes_scan_time(name: &str) -> Option<DateTime<Utc>> {
    let start = name.find("_s")? + 2;
    let digits = name.get(start..start + 13)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let year: i32 = digits[0..4].parse().ok()?;
    let doy: u32 = digits[4..7].parse().ok()?;
    let hour: u32 = digits[7..9].parse().ok()?;
    let minute: u32 = digits[9..11].parse().ok()?;
    let second: u32 = digits[11..13].parse().ok()?;

    NaiveDate::from_yo_opt(year, doy)?
        .and_hms_opt(hour, minute, second)
        .map(|naive| naive.and_utc())
}

fn seviri_scan_time(name: &str) -> Option<DateTime<Utc>> {
    let stem = name.split('.').next()?;
    if stem.len() < 14 {
        return None;
    }
    let digits = stem.get(stem.len() - 14..)?;
    NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_nominal_timestamps_half_open() {
        let interval = TimeInterval::new(ts("2024-01-01T00:00:00Z"), ts("2024-01-01T01:00:00Z")).unwrap();
        let slots = interval.nominal_timestamps(Duration::minutes(15)).unwrap();
        assert_eq!(
            slots,
            vec![
                ts("2024-01-01T00:00:00Z"),
                ts("2024-01-01T00:15:00Z"),
                ts("2024-01-01T00:30:00Z"),
                ts("2024-01-01T00:45:00Z"),
            ]
        );
    }

    #[test]
    fn test_nominal_timestamps_aligned_to_step() {
        let interval = TimeInterval::new(ts("2024-01-01T00:07:00Z"), ts("2024-01-01T00:46:00Z")).unwrap();
        let slots = interval.nominal_timestamps(Duration::minutes(15)).unwrap();
        assert_eq!(
            slots,
            vec![
                ts("2024-01-01T00:15:00Z"),
                ts("2024-01-01T00:30:00Z"),
                ts("2024-01-01T00:45:00Z"),
            ]
        );
    }

    #[test]
    fn test_invalid_intervals() {
        let t0 = ts("2024-01-01T00:00:00Z");
        assert!(TimeInterval::new(t0, t0).is_err());
        assert!(TimeInterval::new(t0 + Duration::hours(1), t0).is_err());

        let interval = TimeInterval::new(t0, t0 + Duration::hours(1)).unwrap();
        assert!(interval.nominal_timestamps(Duration::zero()).is_err());
        assert!(interval.nominal_timestamps(Duration::minutes(-5)).is_err());

        // No slot between 00:01 and 00:14 for a 15 minute step
        let narrow = TimeInterval::new(t0 + Duration::minutes(1), t0 + Duration::minutes(14)).unwrap();
        assert!(narrow.nominal_timestamps(Duration::minutes(15)).is_err());
    }

    #[test]
    fn test_coordinate_key_roundtrip() {
        let t = ts("2023-09-10T22:15:00Z");
        let key = coordinate_key(t);
        assert_eq!(key, "20230910T221500Z");
        assert_eq!(parse_coordinate_key(&key), Some(t));
        assert_eq!(parse_coordinate_key("not-a-key"), None);
    }

    #[test]
    fn test_seviri_scan_time() {
        let name = "MSG3-SEVI-MSG15-0100-NA-20230910221240.874000000Z-NA.nat";
        assert_eq!(scan_time_from_filename(name), Some(ts("2023-09-10T22:12:40Z")));
    }

    #[test]
    fn test_goes_scan_time() {
        let name = "OR_ABI-L2-CMIPF-M6C13_G16_s20241211800214_e20241211809522_c20241211809591.nc";
        // Day 121 of 2024 is 30 April
        assert_eq!(
            scan_time_from_filename(name),
            Some(ts("2024-04-30T18:00:21Z"))
        );
        assert_eq!(
            scan_time_from_filename(&format!("/data/granules/{}", name)),
            Some(ts("2024-04-30T18:00:21Z"))
        );
    }

    #[test]
    fn test_unparseable_filename() {
        assert_eq!(scan_time_from_filename("granule.nc"), None);
        assert_eq!(scan_time_from_filename(""), None);
    }
}
