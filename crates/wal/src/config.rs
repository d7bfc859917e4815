//! WAL writer configuration.

use std::time::Duration;

/// Segment roll thresholds for a WAL writer.
///
/// A commit that leaves the active segment past any of these limits arms a
/// deferred roll; the next `new_row` call opens a fresh segment. Rolls also
/// happen synchronously when a structural change lands while uncommitted
/// rows exist, independent of these limits.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Roll once the segment holds at least this many rows
    pub segment_max_rows: u64,

    /// Roll once the segment's column files exceed this many bytes
    pub segment_max_bytes: u64,

    /// Roll once the segment has been open this long, if set
    pub segment_roll_interval: Option<Duration>,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            segment_max_rows: 200_000,
            segment_max_bytes: 64 * 1024 * 1024,
            segment_roll_interval: None,
        }
    }
}

impl WalConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Small limits suitable for tests that exercise segment rotation.
    pub fn for_testing() -> Self {
        WalConfig {
            segment_max_rows: 1_000,
            segment_max_bytes: 1024 * 1024,
            segment_roll_interval: None,
        }
    }

    /// Set the row-count roll threshold.
    pub fn with_segment_max_rows(mut self, rows: u64) -> Self {
        self.segment_max_rows = rows;
        self
    }

    /// Set the byte-size roll threshold.
    pub fn with_segment_max_bytes(mut self, bytes: u64) -> Self {
        self.segment_max_bytes = bytes;
        self
    }

    /// Set the age roll threshold.
    pub fn with_segment_roll_interval(mut self, interval: Duration) -> Self {
        self.segment_roll_interval = Some(interval);
        self
    }

    /// True when a segment with the given size/rows/age should roll.
    pub fn should_roll(&self, segment_bytes: u64, segment_rows: u64, segment_age: Duration) -> bool {
        if segment_rows >= self.segment_max_rows {
            return true;
        }
        if segment_bytes >= self.segment_max_bytes {
            return true;
        }
        if let Some(interval) = self.segment_roll_interval {
            if segment_age >= interval {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_do_not_roll_small_segments() {
        let config = WalConfig::new();
        assert!(!config.should_roll(1024, 10, Duration::from_secs(1)));
    }

    #[test]
    fn test_row_threshold() {
        let config = WalConfig::new().with_segment_max_rows(100);
        assert!(config.should_roll(0, 100, Duration::ZERO));
        assert!(!config.should_roll(0, 99, Duration::ZERO));
    }

    #[test]
    fn test_interval_threshold() {
        let config = WalConfig::new().with_segment_roll_interval(Duration::from_millis(50));
        assert!(config.should_roll(0, 0, Duration::from_millis(51)));
        assert!(!config.should_roll(0, 0, Duration::from_millis(49)));
    }
}
