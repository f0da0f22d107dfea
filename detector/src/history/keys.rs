use chrono::{DateTime, Utc};

/// Relative path for a committed frame's JPEG.
/// e.g. "2026-02-18/20260218T093000000Z_000042.jpg"
pub fn history_jpeg_key(captured_at: DateTime<Utc>, seq: u64) -> String {
    format!(
        "{date}/{ts}_{seq:06}.jpg",
        date = captured_at.format("%Y-%m-%d"),
        ts = captured_at.format("%Y%m%dT%H%M%S%3fZ"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn test_key_format() {
        // 2025-02-18T09:30:00.000Z
        let k = history_jpeg_key(at(1739871000000), 42);
        assert_eq!(k, "2025-02-18/20250218T093000000Z_000042.jpg");
    }

    #[test]
    fn keys_sort_by_capture_time() {
        let earlier = history_jpeg_key(at(1739871000000), 9);
        let later = history_jpeg_key(at(1739871000001), 1);
        assert!(earlier < later);
    }
}
