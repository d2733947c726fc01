//! Chunking policy: a map from request-dimension name to split size, plus
//! the legality rules from spec section 3 enforced before any transport call.

use std::collections::BTreeMap;

use crate::error::ChunkerError;
use crate::request::{HeaderRole, TimeSelector};

/// How the time side of the request should be split, resolved from the raw
/// policy map against the concrete [`TimeSelector`] variant in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSplit {
    /// Ymd form, `month = 1`: one fragment per `(year, month)`.
    Month,
    /// Ymd form, `day = 1`: one fragment per `(year, month, day)`.
    Day,
    /// Date-range form, `day = n`: one fragment per `n` consecutive dates.
    DateRangeDays(u32),
}

/// User-supplied split sizes, keyed by the same dimension names that appear
/// in a [`crate::request::Request`] (`year`, `month`, `day`, `leadtime_hour`,
/// `step`, `pressure_level`, `levelist`, `number`).
#[derive(Debug, Clone, Default)]
pub struct ChunkingPolicy {
    splits: BTreeMap<String, usize>,
}

impl ChunkingPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_split(mut self, dimension: impl Into<String>, size: usize) -> Self {
        self.splits.insert(dimension.into(), size);
        self
    }

    pub fn get(&self, dimension: &str) -> Option<usize> {
        self.splits.get(dimension).copied()
    }

    /// Resolves the time-side split against the selector in use, enforcing
    /// the legality rules: at most one of `{year, month, day}` may be
    /// present, and for the ymd form its split size must equal 1.
    pub fn resolve_time_split(
        &self,
        selector: &TimeSelector,
    ) -> Result<Option<TimeSplit>, ChunkerError> {
        match selector {
            TimeSelector::Ymd { .. } => {
                let present: Vec<&str> = ["year", "month", "day"]
                    .into_iter()
                    .filter(|k| self.splits.contains_key(*k))
                    .collect();
                match present.as_slice() {
                    [] => Ok(None),
                    ["year"] => Err(ChunkerError::configuration(
                        "splitting by year is not supported (split size must equal 1, \
                         and a year-level chunk would span an entire year of rows)",
                    )),
                    ["month"] => {
                        let size = self.splits["month"];
                        if size != 1 {
                            return Err(ChunkerError::configuration(format!(
                                "month split size must be 1, got {size}"
                            )));
                        }
                        Ok(Some(TimeSplit::Month))
                    }
                    ["day"] => {
                        let size = self.splits["day"];
                        if size != 1 {
                            return Err(ChunkerError::configuration(format!(
                                "day split size must be 1, got {size}"
                            )));
                        }
                        Ok(Some(TimeSplit::Day))
                    }
                    _ => Err(ChunkerError::configuration(format!(
                        "at most one of year/month/day may be split, got {present:?}"
                    ))),
                }
            }
            TimeSelector::DateRange { .. } => {
                if self.splits.contains_key("year") || self.splits.contains_key("month") {
                    return Err(ChunkerError::configuration(
                        "year/month splits are not meaningful for the date-range request form",
                    ));
                }
                match self.splits.get("day") {
                    None => Ok(None),
                    Some(&0) => Err(ChunkerError::configuration(
                        "day split size must be at least 1",
                    )),
                    Some(&n) => Ok(Some(TimeSplit::DateRangeDays(n as u32))),
                }
            }
        }
    }

    /// Resolves the split size for a header role, defaulting to "no split"
    /// (i.e. the full length) as spec section 4.E specifies.
    pub fn resolve_header_split(&self, role: HeaderRole, len: usize) -> Result<usize, ChunkerError> {
        let key = role.canonical_axis_name();
        // Both spellings of the level/step roles share one split entry; the
        // planner only ever sees the role, but callers may still write the
        // policy using either spelling, so accept both.
        let alt_key = match role {
            HeaderRole::Step => Some("leadtime_hour"),
            HeaderRole::PressureLevel => Some("levelist"),
            HeaderRole::Number => None,
        };
        let size = self
            .splits
            .get(key)
            .or_else(|| alt_key.and_then(|k| self.splits.get(k)))
            .copied()
            .unwrap_or(len);
        if size == 0 {
            return Err(ChunkerError::configuration(format!(
                "split size for {key} must be at least 1"
            )));
        }
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::TimeOfDay;

    fn ymd() -> TimeSelector {
        TimeSelector::Ymd {
            years: vec![2022],
            months: vec![1, 7],
            days: vec![1, 16],
            times: vec![TimeOfDay::from_hm(0, 0), TimeOfDay::from_hm(12, 0)],
        }
    }

    #[test]
    fn rejects_multi_axis_time_split() {
        let policy = ChunkingPolicy::new().with_split("month", 1).with_split("day", 1);
        assert!(policy.resolve_time_split(&ymd()).is_err());
    }

    #[test]
    fn rejects_non_unit_month_split() {
        let policy = ChunkingPolicy::new().with_split("month", 2);
        assert!(policy.resolve_time_split(&ymd()).is_err());
    }

    #[test]
    fn accepts_day_split_of_one() {
        let policy = ChunkingPolicy::new().with_split("day", 1);
        assert_eq!(
            policy.resolve_time_split(&ymd()).unwrap(),
            Some(TimeSplit::Day)
        );
    }

    #[test]
    fn date_range_allows_any_day_split() {
        use chrono::NaiveDate;
        let sel = TimeSelector::DateRange {
            start: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            stop: NaiveDate::from_ymd_opt(2022, 1, 5).unwrap(),
            times: vec![TimeOfDay::from_hm(0, 0)],
        };
        let policy = ChunkingPolicy::new().with_split("day", 2);
        assert_eq!(
            policy.resolve_time_split(&sel).unwrap(),
            Some(TimeSplit::DateRangeDays(2))
        );
    }
}
