//! Realized data rate of a finished capture.
//!
//! The artifact size stands in for captured bytes, so these are only
//! meaningful once the sniffer has exited and released the file.

use std::time::Duration;

/// Time the capture actually covered: the requested window caps the wall
/// clock, since the sniffer may linger after its own auto-stop.
pub fn effective_elapsed(requested: Option<Duration>, actual: Duration) -> Duration {
    match requested {
        Some(requested) => requested.min(actual),
        None => actual,
    }
}

/// `bytes / 1024 / elapsed_secs` in KB/s.
///
/// Returns `None` when the elapsed time is zero, negative or not finite.
pub fn realized_rate_kbps(bytes: u64, elapsed_secs: f64) -> Option<f64> {
    if !elapsed_secs.is_finite() || elapsed_secs <= 0.0 {
        return None;
    }
    Some(bytes as f64 / 1024.0 / elapsed_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn requested_window_caps_elapsed() {
        let ten = Duration::from_secs(10);
        assert_eq!(effective_elapsed(Some(ten), Duration::from_secs(12)), ten);
        assert_eq!(
            effective_elapsed(Some(ten), Duration::from_secs(4)),
            Duration::from_secs(4)
        );
        assert_eq!(
            effective_elapsed(None, Duration::from_secs(42)),
            Duration::from_secs(42)
        );
    }

    #[test]
    fn degenerate_elapsed_has_no_rate() {
        assert_eq!(realized_rate_kbps(4096, 0.0), None);
        assert_eq!(realized_rate_kbps(4096, -1.0), None);
        assert_eq!(realized_rate_kbps(4096, f64::NAN), None);
        assert_eq!(realized_rate_kbps(4096, f64::INFINITY), None);
    }

    #[test]
    fn ten_kib_over_ten_seconds() {
        assert_eq!(realized_rate_kbps(10 * 1024, 10.0), Some(1.0));
    }

    proptest! {
        #[test]
        fn rate_is_kib_per_second(bytes in 0u64..1_000_000_000_000, elapsed in 0.001f64..100_000.0) {
            let rate = realized_rate_kbps(bytes, elapsed).unwrap();
            let expected = bytes as f64 / 1024.0 / elapsed;
            prop_assert!((rate - expected).abs() <= expected.abs() * 1e-12 + 1e-12);
            prop_assert!(rate >= 0.0);
        }

        #[test]
        fn non_positive_elapsed_never_divides(bytes in any::<u64>(), elapsed in -1e9f64..=0.0) {
            prop_assert_eq!(realized_rate_kbps(bytes, elapsed), None);
        }
    }
}
