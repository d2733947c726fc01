//! The request data model (spec section 3).
//!
//! The time side is a sum type rather than an overloaded map -- see design
//! note "sum-typed requests" in spec section 9 -- so the planner dispatches
//! on the variant instead of probing which keys happen to be present.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::error::ChunkerError;

/// One clock-time-of-day value, e.g. `00:00` or `12:00`, stored as minutes
/// since midnight so it sorts and hashes cheaply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    pub minutes_since_midnight: u32,
}

impl TimeOfDay {
    pub fn from_hm(hour: u32, minute: u32) -> Self {
        Self {
            minutes_since_midnight: hour * 60 + minute,
        }
    }

    /// Parses `"HH:MM"` (the form the archives use in requests).
    pub fn parse(value: &str) -> Result<Self, ChunkerError> {
        let (h, m) = value.split_once(':').ok_or_else(|| {
            ChunkerError::configuration(format!("malformed time value {value:?}"))
        })?;
        let hour: u32 = h
            .parse()
            .map_err(|_| ChunkerError::configuration(format!("malformed time value {value:?}")))?;
        let minute: u32 = m
            .parse()
            .map_err(|_| ChunkerError::configuration(format!("malformed time value {value:?}")))?;
        if hour >= 24 || minute >= 60 {
            return Err(ChunkerError::configuration(format!(
                "time value out of range {value:?}"
            )));
        }
        Ok(Self::from_hm(hour, minute))
    }

    pub fn as_nanos_of_day(&self) -> i64 {
        i64::from(self.minutes_since_midnight) * 60 * 1_000_000_000
    }
}

/// The two supported ways of describing the time axis. Spec section 4.D
/// requires both to produce identical axes and chunk boundaries for
/// equivalent inputs -- they're kept as distinct variants so the builder
/// never has to guess which one was intended.
#[derive(Debug, Clone)]
pub enum TimeSelector {
    /// `year` x `month` x `day` x `time`, in that iteration order.
    Ymd {
        years: Vec<i32>,
        months: Vec<u32>,
        days: Vec<u32>,
        times: Vec<TimeOfDay>,
    },
    /// `date: "START/STOP"` (inclusive) x `time`.
    DateRange {
        start: NaiveDate,
        stop: NaiveDate,
        times: Vec<TimeOfDay>,
    },
}

/// A header (non-time) request dimension, keyed by the *role* it plays in
/// the canonical axis scheme rather than by its literal request key, since
/// `leadtime_hour`/`step` and `pressure_level`/`levelist` are interchangeable
/// spellings of the same axis (spec section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HeaderRole {
    Step,
    PressureLevel,
    Number,
}

impl HeaderRole {
    pub fn canonical_axis_name(self) -> &'static str {
        match self {
            Self::Step => "step",
            Self::PressureLevel => "isobaricInhPa",
            Self::Number => "number",
        }
    }
}

/// One header dimension as it appeared in the request: which role it plays,
/// the literal key the caller used (needed to rebuild request fragments that
/// the transport client will recognize), and its ordered values.
#[derive(Debug, Clone)]
pub struct HeaderAxisSpec {
    pub role: HeaderRole,
    pub source_key: String,
    pub values: Vec<i64>,
}

/// A fully parsed user request: the time side, any header dimensions, the
/// variables asked for, and everything else forwarded verbatim to the
/// transport client (spec section 6, "Passthrough").
#[derive(Debug, Clone)]
pub struct Request {
    pub time: TimeSelector,
    pub header: Vec<HeaderAxisSpec>,
    pub variable: Vec<String>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Request {
    /// `request_dimensions()` from spec section 4.F item 1: every recognized
    /// key whose value is a sequence, time side included.
    pub fn request_dimensions(&self) -> BTreeMap<String, Vec<serde_json::Value>> {
        let mut dims = BTreeMap::new();

        match &self.time {
            TimeSelector::Ymd {
                years,
                months,
                days,
                times,
            } => {
                dims.insert("year".into(), to_json_vec(years));
                dims.insert("month".into(), to_json_vec(months));
                dims.insert("day".into(), to_json_vec(days));
                dims.insert("time".into(), times_to_json(times));
            }
            TimeSelector::DateRange { start, stop, times } => {
                dims.insert(
                    "date".into(),
                    vec![serde_json::Value::String(format!("{start}/{stop}"))],
                );
                dims.insert("time".into(), times_to_json(times));
            }
        }

        for header in &self.header {
            dims.insert(header.source_key.clone(), to_json_vec(&header.values));
        }

        if !self.variable.is_empty() {
            dims.insert("variable".into(), to_json_vec(&self.variable));
        }

        dims
    }

    /// Restricts this request to a single variable value, as
    /// `variables()` (spec section 4.F item 4) requires of child chunkers.
    pub fn with_single_variable(&self, variable: &str) -> Self {
        Self {
            time: self.time.clone(),
            header: self.header.clone(),
            variable: vec![variable.to_string()],
            extra: self.extra.clone(),
        }
    }

    pub fn header_role(&self, role: HeaderRole) -> Option<&HeaderAxisSpec> {
        self.header.iter().find(|h| h.role == role)
    }
}

fn to_json_vec<T: ToString>(values: &[T]) -> Vec<serde_json::Value> {
    values
        .iter()
        .map(|v| serde_json::Value::String(v.to_string()))
        .collect()
}

fn times_to_json(times: &[TimeOfDay]) -> Vec<serde_json::Value> {
    times
        .iter()
        .map(|t| {
            serde_json::Value::String(format!(
                "{:02}:{:02}",
                t.minutes_since_midnight / 60,
                t.minutes_since_midnight % 60
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_of_day_parses_and_orders() {
        let a = TimeOfDay::parse("00:00").unwrap();
        let b = TimeOfDay::parse("12:00").unwrap();
        assert!(a < b);
        assert_eq!(a.as_nanos_of_day(), 0);
        assert_eq!(b.as_nanos_of_day(), 12 * 3600 * 1_000_000_000);
    }

    #[test]
    fn rejects_malformed_time() {
        assert!(TimeOfDay::parse("25:00").is_err());
        assert!(TimeOfDay::parse("not-a-time").is_err());
    }

    #[test]
    fn request_dimensions_includes_time_and_header() {
        let req = Request {
            time: TimeSelector::Ymd {
                years: vec![2022],
                months: vec![1, 7],
                days: vec![1, 16],
                times: vec![TimeOfDay::from_hm(0, 0), TimeOfDay::from_hm(12, 0)],
            },
            header: vec![HeaderAxisSpec {
                role: HeaderRole::PressureLevel,
                source_key: "pressure_level".into(),
                values: vec![1000, 700, 500],
            }],
            variable: vec!["2m_temperature".into()],
            extra: BTreeMap::new(),
        };
        let dims = req.request_dimensions();
        assert_eq!(dims["year"].len(), 1);
        assert_eq!(dims["month"].len(), 2);
        assert_eq!(dims["pressure_level"].len(), 3);
        assert_eq!(dims["variable"].len(), 1);
    }
}
