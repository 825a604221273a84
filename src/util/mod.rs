//! util: общие хелперы времени.
//!
//! Содержит:
//! - unix_secs(): Unix-время в секундах для произвольного SystemTime;
//! - run_token(): point-in-time токен прогона (суффикс имён VolumeSnapshot);
//! - go_duration(): строковое представление длительности в формате Go (`1m30.5s`),
//!   которое ожидают потребители output.json.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unix time in whole seconds (0 for instants before the epoch).
#[inline]
pub fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Point-in-time token of a run: decimal Unix seconds of the run start.
/// Sorts lexicographically the same way as numerically for the next few centuries.
pub fn run_token(start: SystemTime) -> String {
    unix_secs(start).to_string()
}

/// Format a duration the way Go's `time.Duration.String()` does:
/// `0s`, `750ns`, `1.5µs`, `250ms`, `2.5s`, `1m30s`, `1h0m5s`.
pub fn go_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return format!("{}µs", fixed(nanos, 1_000));
    }
    if nanos < 1_000_000_000 {
        return format!("{}ms", fixed(nanos, 1_000_000));
    }

    let total = d.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs_nanos = (total % 60) as u128 * 1_000_000_000 + d.subsec_nanos() as u128;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&fixed(secs_nanos, 1_000_000_000));
    out.push('s');
    out
}

// value/unit as a decimal with trailing zeros of the fraction trimmed
fn fixed(value: u128, unit: u128) -> String {
    let whole = value / unit;
    let rem = value % unit;
    if rem == 0 {
        return whole.to_string();
    }
    let width = unit.to_string().len() - 1;
    let frac = format!("{:0width$}", rem, width = width);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}
