//! Human-readable formatting for counts, byte sizes, and durations
//!
//! Quantities scale through K/M/G suffixes (1000 steps for generic counts,
//! 1024 for byte counts) and round to a precision that depends on magnitude:
//! under 1 keeps 3 decimals, under 10 keeps 2, under 100 keeps 1, anything
//! larger rounds to an integer.

/// Scale a generic count through K/M/G suffixes (steps of 1000).
pub fn metric(n: f64) -> String {
    scaled(n, 1000.0)
}

/// Scale a byte count through K/M/G suffixes (steps of 1024).
pub fn bytes(n: f64) -> String {
    scaled(n, 1024.0)
}

fn scaled(n: f64, multiple: f64) -> String {
    if n < 0.0 {
        return format!("-{}", scaled(n.abs(), multiple));
    }

    if n < multiple {
        return round(n);
    }

    let n = n / multiple;
    if n < multiple {
        return format!("{}K", round(n));
    }

    let n = n / multiple;
    if n < multiple {
        return format!("{}M", round(n));
    }

    format!("{}G", round(n / multiple))
}

/// Render a millisecond duration at a human scale:
/// millis, seconds, minutes, hours, or days.
pub fn time(millis: i64) -> String {
    if millis < 0 {
        return format!("-{}", time(-millis));
    }

    if millis < 1000 {
        return format!("{} millis", millis);
    }

    let seconds = millis as f64 / 1000.0;
    if seconds < 60.0 {
        return format!("{} seconds", round(seconds));
    }

    let minutes = seconds / 60.0;
    if minutes < 60.0 {
        return format!("{} minutes", round(minutes));
    }

    let hours = minutes / 60.0;
    if hours < 24.0 {
        return format!("{} hours", round(hours));
    }

    format!("{} days", round(hours / 24.0))
}

/// Round with magnitude-dependent precision.
pub fn round(d: f64) -> String {
    if d < 1.0 {
        rounded_to(d, 3)
    } else if d < 10.0 {
        rounded_to(d, 2)
    } else if d < 100.0 {
        rounded_to(d, 1)
    } else {
        format!("{}", d.round() as i64)
    }
}

fn rounded_to(d: f64, decimal_places: i32) -> String {
    let tens = 10f64.powi(decimal_places);
    let v = (d * tens).round() / tens;
    format!("{}", v)
}

/// Format a number with thousands separators
pub fn comma(n: u64) -> String {
    let s = n.to_string();
    let digits: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = digits
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_precision_by_magnitude() {
        assert_eq!(round(0.12345), "0.123");
        assert_eq!(round(1.2345), "1.23");
        assert_eq!(round(12.345), "12.3");
        assert_eq!(round(123.45), "123");
        assert_eq!(round(0.5), "0.5");
    }

    #[test]
    fn test_metric_scaling() {
        assert_eq!(metric(999.0), "999");
        assert_eq!(metric(1500.0), "1.5K");
        assert_eq!(metric(2_500_000.0), "2.5M");
        assert_eq!(metric(3_000_000_000.0), "3G");
    }

    #[test]
    fn test_bytes_scaling() {
        assert_eq!(bytes(512.0), "512");
        assert_eq!(bytes(2048.0), "2K");
        assert_eq!(bytes(1024.0 * 1024.0), "1M");
    }

    #[test]
    fn test_time_scaling() {
        assert_eq!(time(500), "500 millis");
        assert_eq!(time(1500), "1.5 seconds");
        assert_eq!(time(90_000), "1.5 minutes");
        assert_eq!(time(2 * 60 * 60 * 1000), "2 hours");
        assert_eq!(time(48 * 60 * 60 * 1000), "2 days");
        assert_eq!(time(-500), "-500 millis");
    }

    #[test]
    fn test_comma() {
        assert_eq!(comma(0), "0");
        assert_eq!(comma(999), "999");
        assert_eq!(comma(1000), "1,000");
        assert_eq!(comma(1234567890), "1,234,567,890");
    }
}
