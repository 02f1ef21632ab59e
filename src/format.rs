//! Human-readable numbers for progress output.

use std::time::Duration;

pub fn format_number(n: u64) -> String {
    if n >= 1_000_000_000_000 {
        format!("{:.2}T", n as f64 / 1e12)
    } else if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1e9)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1e6)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1e3)
    } else {
        n.to_string()
    }
}

pub fn format_hashrate(rate: f64) -> String {
    if !rate.is_finite() || rate <= 0.0 {
        return "0 H/s".into();
    }
    if rate >= 1e9 {
        format!("{:.2} GH/s", rate / 1e9)
    } else if rate >= 1e6 {
        format!("{:.2} MH/s", rate / 1e6)
    } else if rate >= 1e3 {
        format!("{:.2} KH/s", rate / 1e3)
    } else {
        format!("{:.0} H/s", rate)
    }
}

/// Largest two units only: `3d 4h`, `2h 5m`, `4m 10s`, `9s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (days, hours, mins, s) = (secs / 86_400, secs / 3_600 % 24, secs / 60 % 60, secs % 60);
    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {}s", mins, s)
    } else {
        format!("{}s", s)
    }
}

/// Seconds from an estimate; very large or invalid values are shown as-is.
pub fn format_eta(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) if s.is_finite() && s >= 0.0 && s < 1e12 => {
            format_duration(Duration::from_secs_f64(s))
        }
        Some(_) => "a very long time".into(),
        None => "unknown".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_500), "1.50K");
        assert_eq!(format_number(67_104_768), "67.10M");
        assert_eq!(format_number(2_000_000_000), "2.00B");
        assert_eq!(format_number(3_100_000_000_000), "3.10T");
    }

    #[test]
    fn test_format_hashrate() {
        assert_eq!(format_hashrate(0.0), "0 H/s");
        assert_eq!(format_hashrate(f64::NAN), "0 H/s");
        assert_eq!(format_hashrate(512.0), "512 H/s");
        assert_eq!(format_hashrate(2_500_000.0), "2.50 MH/s");
        assert_eq!(format_hashrate(1.2e9), "1.20 GH/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(9)), "9s");
        assert_eq!(format_duration(Duration::from_secs(250)), "4m 10s");
        assert_eq!(format_duration(Duration::from_secs(7_500)), "2h 5m");
        assert_eq!(format_duration(Duration::from_secs(3 * 86_400 + 4 * 3_600)), "3d 4h");
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(None), "unknown");
        assert_eq!(format_eta(Some(65.0)), "1m 5s");
        assert_eq!(format_eta(Some(f64::INFINITY)), "a very long time");
    }
}
