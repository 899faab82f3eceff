use std::time::Duration;
use time::OffsetDateTime;

/// Current time as Unix seconds
pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Format a byte count as a human-readable string (B, KB, MB, GB)
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a Unix timestamp as `YYYY-MM-DD HH:MM` (UTC)
pub fn format_timestamp(timestamp: i64) -> String {
    use time::macros::format_description;

    if timestamp == 0 {
        return "unknown".to_string();
    }

    OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()
        .and_then(|dt| {
            let format = format_description!("[year]-[month]-[day] [hour]:[minute]");
            dt.format(&format).ok()
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Format an elapsed duration as `850ms`, `12.3s` or `4m 05s`
pub fn format_duration(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.1}s", elapsed.as_secs_f64())
    } else {
        let secs = elapsed.as_secs();
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2.00 GB");
    }

    #[test]
    fn test_format_timestamp() {
        let ts = 1700000000; // Nov 14, 2023 22:13 UTC
        assert_eq!(format_timestamp(ts), "2023-11-14 22:13");
        assert_eq!(format_timestamp(0), "unknown");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_millis(12_340)), "12.3s");
        assert_eq!(format_duration(Duration::from_secs(245)), "4m 05s");
    }

    #[test]
    fn test_now_is_recent() {
        assert!(now_unix() > 1_700_000_000);
    }
}
