pub mod creators;
pub mod tags;
pub mod workers;

use chrono::{DateTime, NaiveDate, Utc};

/// Timestamps leave the API as Unix seconds.
pub(crate) fn unix(t: DateTime<Utc>) -> i64 {
    t.timestamp()
}

pub(crate) fn unix_opt(t: Option<DateTime<Utc>>) -> Option<i64> {
    t.map(|t| t.timestamp())
}

/// Parse an RFC 3339 instant, falling back to a bare date at midnight UTC.
pub(crate) fn parse_history_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }
    value
        .parse::<NaiveDate>()
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

pub(crate) fn total_pages(total: i64, limit: i64) -> i64 {
    if limit <= 0 {
        return 0;
    }
    (total + limit - 1) / limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_date_accepts_rfc3339_and_bare_dates() {
        let full = parse_history_date("2025-03-01T12:30:00Z").unwrap();
        assert_eq!(full.timestamp(), 1740832200);

        let bare = parse_history_date("2025-03-01").unwrap();
        assert_eq!(bare.time(), chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap());

        assert!(parse_history_date("not-a-date").is_none());
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, 20), 0);
        assert_eq!(total_pages(20, 20), 1);
        assert_eq!(total_pages(21, 20), 2);
    }
}
