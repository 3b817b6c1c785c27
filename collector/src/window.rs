use crate::error::SourceError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::ops::RangeInclusive;

/// Half-open `[start, end)` fetch window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, SourceError> {
        if start > end {
            return Err(SourceError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window from midnight UTC of `start` to midnight UTC of `end`.
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Result<Self, SourceError> {
        Self::new(
            start.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc(),
            end.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc(),
        )
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Split into consecutive windows no longer than `max`.
    pub fn chunks(&self, max: Duration) -> Vec<DateWindow> {
        if self.is_empty() || max <= Duration::zero() {
            return vec![*self];
        }
        let mut out = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let next = (cursor + max).min(self.end);
            out.push(DateWindow {
                start: cursor,
                end: next,
            });
            cursor = next;
        }
        out
    }

    /// Calendar years touched by the window. Empty for an empty window.
    pub fn years(&self) -> RangeInclusive<i32> {
        if self.is_empty() {
            return 1..=0;
        }
        let last_instant = self.end - Duration::nanoseconds(1);
        self.start.year()..=last_instant.year()
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_start_after_end_is_rejected() {
        let err = DateWindow::from_dates(date(2024, 2, 1), date(2024, 1, 1)).unwrap_err();
        assert!(matches!(err, SourceError::InvalidDateRange { .. }));
    }

    #[test]
    fn test_window_is_half_open() {
        let window = DateWindow::from_dates(date(2024, 1, 1), date(2024, 1, 2)).unwrap();
        assert!(window.contains(window.start()));
        assert!(!window.contains(window.end()));
    }

    #[test]
    fn test_chunks_cover_window_without_overlap() {
        let window = DateWindow::from_dates(date(2024, 1, 1), date(2024, 12, 31)).unwrap();
        let chunks = window.chunks(Duration::days(120));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start(), window.start());
        assert_eq!(chunks[2].end(), window.end());
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start());
        }
    }

    #[test]
    fn test_years_excludes_exclusive_end() {
        let window = DateWindow::from_dates(date(2023, 6, 1), date(2024, 1, 1)).unwrap();
        assert_eq!(window.years(), 2023..=2023);
        let empty = DateWindow::from_dates(date(2024, 1, 1), date(2024, 1, 1)).unwrap();
        assert!(empty.years().is_empty());
    }
}
