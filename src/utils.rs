use once_cell::sync::Lazy;
use regex::Regex;

static UNSAFE_ID_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_]+").unwrap());

/// Rounds half away from zero at `precision` decimal places.
///
/// Scales by `10^precision`, adds 0.5 to the magnitude, truncates and scales
/// back. The sign is applied afterwards so that negative readings round
/// symmetrically with positive ones; anything rounding to zero is `0.0`, never
/// `-0.0`. Non-finite input is returned unchanged.
pub fn round(value: f64, precision: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }

    let factor = 10f64.powi(precision as i32);
    let rounded = ((value.abs() * factor) + 0.5).trunc() / factor;

    if rounded == 0.0 {
        0.0
    } else if value.is_sign_negative() {
        -rounded
    } else {
        rounded
    }
}

/// Turns a device id into something usable in a unique id or topic level:
/// every run of characters outside `[a-zA-Z0-9_]` becomes a single `_`, then
/// the result is lowercased.
///
///   cw100.Inverter#1 => cw100_inverter_1
pub fn sanitize(id: &str) -> String {
    UNSAFE_ID_CHARS.replace_all(id, "_").to_lowercase()
}

/// Seconds since the unix epoch, as carried in the `ts` field of state events.
pub fn unixtime() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_positive() {
        assert_eq!(round(50.004, 2), 50.0);
        assert_eq!(round(50.006, 2), 50.01);
        assert_eq!(round(229.96, 1), 230.0);
        assert_eq!(round(123.45, 6), 123.45);
    }

    #[test]
    fn round_negative_is_symmetric() {
        assert_eq!(round(-1.25, 1), -1.3);
        assert_eq!(round(-1.24, 1), -1.2);
        assert_eq!(round(-0.5, 0), -1.0);
    }

    #[test]
    fn round_to_zero_is_unsigned() {
        assert!(round(-0.004, 2).is_sign_positive());
        assert!(round(-0.0, 1).is_sign_positive());
        assert_eq!(round(-0.004, 2), 0.0);
    }

    #[test]
    fn round_zero_precision() {
        assert_eq!(round(799.5, 0), 800.0);
        assert_eq!(round(799.49, 0), 799.0);
    }

    #[test]
    fn round_is_idempotent() {
        for v in [0.0, 0.05, 49.995, 123.456789, -17.25, -0.004999, 32767.0, -3276.75] {
            for p in 0..=6 {
                let once = round(v, p);
                assert_eq!(round(once, p), once, "{} at {}", v, p);
            }
        }
    }

    #[test]
    fn round_non_finite() {
        assert!(round(f64::NAN, 2).is_nan());
        assert_eq!(round(f64::INFINITY, 2), f64::INFINITY);
    }

    #[test]
    fn sanitize_collapses_runs() {
        assert_eq!(sanitize("cw100.Inverter#1"), "cw100_inverter_1");
        assert_eq!(sanitize("a..--b"), "a_b");
        assert_eq!(sanitize("already_fine_42"), "already_fine_42");
    }
}
