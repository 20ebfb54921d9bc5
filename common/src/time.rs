//! Time helpers for ledger timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DepotError, Result};

/// A timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Half-open time window `[from, to)`. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
}

impl TimeRange {
    /// Create a window, rejecting inverted bounds.
    pub fn new(from: Option<Timestamp>, to: Option<Timestamp>) -> Result<Self> {
        if let (Some(from), Some(to)) = (from, to) {
            if from >= to {
                return Err(DepotError::InvalidScope(format!(
                    "window start {from} is not before end {to}"
                )));
            }
        }
        Ok(Self { from, to })
    }

    /// Window with no bounds.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Check if a timestamp falls inside the window.
    pub fn contains(&self, at: Timestamp) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at < to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_window_is_half_open() {
        let start = now();
        let end = start + Duration::hours(1);
        let window = TimeRange::new(Some(start), Some(end)).unwrap();

        assert!(window.contains(start));
        assert!(window.contains(start + Duration::minutes(59)));
        assert!(!window.contains(end));
        assert!(!window.contains(start - Duration::seconds(1)));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let start = now();
        assert!(TimeRange::new(Some(start), Some(start - Duration::minutes(5))).is_err());
        assert!(TimeRange::new(Some(start), None).is_ok());
        assert!(TimeRange::unbounded().contains(start));
    }
}
