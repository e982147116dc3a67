//! Common grid and time fixtures.

use chrono::{DateTime, TimeZone, Utc};
use sat_common::GridDefinition;

/// An 8 x 12 geographic grid over the Alps at 0.5°, tiled 4 x 6.
pub fn small_geographic_grid() -> GridDefinition {
    GridDefinition::geographic(4.0, 49.0, 0.5, 8, 12).with_tile(4, 6)
}

/// A nominal timestamp on 2024-01-01.
pub fn nominal_time(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0)
        .single()
        .expect("fixture time is valid")
}

/// A fresh scratch directory removed on drop.
pub fn scratch_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("create scratch dir")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_grid_is_valid() {
        let grid = small_geographic_grid();
        assert!(grid.validate().is_ok());
        assert_eq!(grid.num_chunks(), (2, 2));
    }

    #[test]
    fn test_nominal_time() {
        assert_eq!(nominal_time(1, 30).to_rfc3339(), "2024-01-01T01:30:00+00:00");
    }
}
