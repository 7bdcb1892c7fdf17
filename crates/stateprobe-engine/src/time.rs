//! Wall-clock helpers: epoch seconds and ISO 8601 rendering

use std::time::SystemTime;

/// Seconds since the Unix epoch, with sub-second precision.
#[must_use]
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// `"2026-02-05T19:30:00Z"` for an epoch timestamp.
#[must_use]
pub fn to_iso8601(timestamp: f64) -> String {
    let epoch_secs = timestamp.max(0.0) as u64;
    let days = (epoch_secs / 86400) as i64;
    let tod = epoch_secs % 86400;
    let (y, mo, d) = civil_from_days(days);
    format!(
        "{y:04}-{mo:02}-{d:02}T{:02}:{:02}:{:02}Z",
        tod / 3600,
        (tod % 3600) / 60,
        tod % 60
    )
}

/// Howard Hinnant's `civil_from_days`: epoch days → (year, month, day).
///
/// Reference: <https://howardhinnant.github.io/date_algorithms.html#civil_from_days>
fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y as i32, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_1970() {
        assert_eq!(to_iso8601(0.0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn known_timestamp() {
        // 2026-02-05 = day 20489 from epoch
        let ts = 20_489.0 * 86_400.0 + 19.0 * 3600.0 + 30.0 * 60.0 + 0.75;
        assert_eq!(to_iso8601(ts), "2026-02-05T19:30:00Z");
    }

    #[test]
    fn now_is_after_2024() {
        assert!(unix_now() > 1_704_067_200.0);
    }
}
