//! Time handling utilities

use chrono::Utc;

/// Current wall-clock time in whole seconds since the Unix epoch
pub fn unix_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Current wall-clock time truncated to the second, in milliseconds.
///
/// Aggregate outputs are stamped with this value when they are written back.
pub fn flush_timestamp_millis() -> i64 {
    truncate_to_second(Utc::now().timestamp_millis())
}

/// Drop the sub-second part of a millisecond timestamp
pub fn truncate_to_second(millis: i64) -> i64 {
    millis.div_euclid(1000) * 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_to_second() {
        assert_eq!(truncate_to_second(1_700_000_000_999), 1_700_000_000_000);
        assert_eq!(truncate_to_second(1_700_000_000_000), 1_700_000_000_000);
        assert_eq!(truncate_to_second(-1), -1000);
    }

    #[test]
    fn test_flush_timestamp_is_whole_second() {
        let before = unix_timestamp();
        let ts = flush_timestamp_millis();
        let after = unix_timestamp();

        assert_eq!(ts % 1000, 0);
        assert!(ts / 1000 >= before && ts / 1000 <= after);
    }
}
