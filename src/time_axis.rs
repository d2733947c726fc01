//! Time-axis builder (spec section 4.D, component D, ~25% of the core).
//!
//! Both entry shapes -- `year`/`month`/`day`/`time` and `date-range`/`time`
//! -- are built here and must agree bit-for-bit on the resulting axis and
//! chunk boundaries whenever they describe the same calendar dates
//! (property P4, scenario 2 in spec section 8).

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use itertools::Itertools;
use serde_json::Value;

use crate::axis::{Axis, AxisDType};
use crate::error::ChunkerError;
use crate::plan::{AxisChunks, ChunkSlice, RequestFragment};
use crate::policy::TimeSplit;
use crate::request::TimeOfDay;

const NANOS_PER_DAY: i64 = 86_400 * 1_000_000_000;

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("month in 1..=12");
    next.map(|n| (n - first).num_days() as u32)
        .unwrap_or(31)
}

fn datetime_ns(date: NaiveDate, time: TimeOfDay) -> i64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
    let days = (date - epoch).num_days();
    days * NANOS_PER_DAY + time.as_nanos_of_day()
}

/// One emitted `(date, time)` row before it's turned into an axis value;
/// kept around so the ymd builder can validate *after* generating fragments,
/// per the open question in spec section 9 about fragment-then-validate
/// ordering.
struct YmdRow {
    date: NaiveDate,
    time: TimeOfDay,
}

/// Builds the time axis and (optionally) its chunk plan for the ymd form.
///
/// Iterates years x months x days x times in lexical order; rows whose
/// `(year, month, day)` is calendar-invalid (e.g. day 30 in February) are
/// silently dropped from the axis and never produce a chunk of their own
/// (property P3).
pub fn build_ymd(
    years: &[i32],
    months: &[u32],
    days: &[u32],
    times: &[TimeOfDay],
    split: Option<TimeSplit>,
) -> Result<(Axis, Option<AxisChunks>), ChunkerError> {
    if let Some(split) = split {
        match split {
            TimeSplit::Month | TimeSplit::Day => {}
            TimeSplit::DateRangeDays(_) => {
                return Err(ChunkerError::configuration(
                    "a day-count split is only valid for the date-range request form",
                ))
            }
        }
    }

    // Candidate rows are generated before validity is checked, matching the
    // "fragments before validity" ordering spec section 9 flags -- it only
    // matters when we're building per-day fragments, since an invalid day
    // must never become a phantom chunk.
    let mut valid_rows: Vec<YmdRow> = Vec::new();
    for (&year, &month) in years.iter().cartesian_product(months.iter()) {
        let dim = days_in_month(year, month);
        for &day in days {
            if day < 1 || day > dim {
                continue;
            }
            let date = NaiveDate::from_ymd_opt(year, month, day)
                .expect("day already checked against days_in_month");
            for &time in times {
                valid_rows.push(YmdRow { date, time });
            }
        }
    }

    let values: Vec<i64> = valid_rows
        .iter()
        .map(|row| datetime_ns(row.date, row.time))
        .collect();
    let axis = Axis::new_i64("time", AxisDType::DatetimeNs, values);

    let chunks = match split {
        None => None,
        Some(TimeSplit::Month) => Some(chunk_ymd_by_month(years, months, &valid_rows)),
        Some(TimeSplit::Day) => Some(chunk_ymd_by_day(&valid_rows)),
        Some(TimeSplit::DateRangeDays(_)) => unreachable!("checked above"),
    };

    Ok((axis, chunks))
}

fn chunk_ymd_by_month(years: &[i32], months: &[u32], rows: &[YmdRow]) -> AxisChunks {
    let mut chunks = Vec::new();
    let mut start = 0usize;
    for (&year, &month) in years.iter().cartesian_product(months.iter()) {
        let len = rows
            .iter()
            .filter(|r| r.date.year() == year && r.date.month() == month)
            .count();
        if len == 0 {
            continue;
        }
        let mut fragment = RequestFragment::new();
        fragment.insert("year", Value::from(year));
        fragment.insert("month", Value::from(month));
        chunks.push(ChunkSlice {
            start_index: start,
            len,
            fragment,
        });
        start += len;
    }
    AxisChunks {
        axis_name: "time".into(),
        chunks,
    }
}

fn chunk_ymd_by_day(rows: &[YmdRow]) -> AxisChunks {
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut idx = 0usize;
    while idx < rows.len() {
        let date = rows[idx].date;
        let len = rows[idx..].iter().take_while(|r| r.date == date).count();
        let mut fragment = RequestFragment::new();
        fragment.insert("year", Value::from(date.year()));
        fragment.insert("month", Value::from(date.month()));
        fragment.insert("day", Value::from(date.day()));
        chunks.push(ChunkSlice {
            start_index: start,
            len,
            fragment,
        });
        start += len;
        idx += len;
    }
    AxisChunks {
        axis_name: "time".into(),
        chunks,
    }
}

/// Builds the time axis and (optionally) its chunk plan for the date-range
/// form: every date in `[start, stop]` inclusive, times nested inside.
pub fn build_date_range(
    start: NaiveDate,
    stop: NaiveDate,
    times: &[TimeOfDay],
    split: Option<TimeSplit>,
) -> Result<(Axis, Option<AxisChunks>), ChunkerError> {
    let split_days = match split {
        None => None,
        Some(TimeSplit::DateRangeDays(n)) => Some(n),
        Some(_) => {
            return Err(ChunkerError::configuration(
                "only a day-count split is valid for the date-range request form",
            ))
        }
    };

    let mut values = Vec::new();
    let mut date = start;
    while date <= stop {
        for &time in times {
            values.push(datetime_ns(date, time));
        }
        date = date.succ_opt().expect("date range stays within chrono's representable range");
    }
    let axis = Axis::new_i64("time", AxisDType::DatetimeNs, values);

    let chunks = split_days.map(|n| chunk_date_range(start, stop, times.len(), n));

    Ok((axis, chunks))
}

fn chunk_date_range(start: NaiveDate, stop: NaiveDate, times_len: usize, n: u32) -> AxisChunks {
    let mut chunks = Vec::new();
    let mut chunk_start = start;
    let mut row_start = 0usize;
    while chunk_start <= stop {
        let mut chunk_stop = chunk_start;
        for _ in 1..n {
            match chunk_stop.succ_opt() {
                Some(next) if next <= stop => chunk_stop = next,
                _ => break,
            }
        }
        if chunk_stop > stop {
            chunk_stop = stop;
        }
        let n_dates = (chunk_stop - chunk_start).num_days() as usize + 1;
        let len = n_dates * times_len;

        let mut fragment = RequestFragment::new();
        fragment.insert(
            "date",
            Value::String(format!("{chunk_start}/{chunk_stop}")),
        );
        chunks.push(ChunkSlice {
            start_index: row_start,
            len,
            fragment,
        });

        row_start += len;
        chunk_start = match chunk_stop.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    AxisChunks {
        axis_name: "time".into(),
        chunks,
    }
}

/// Extra attrs common to any time-axis variant, kept separate from
/// [`Axis`] construction so callers can attach archive-specific metadata
/// discovered during the probe without recomputing the axis.
pub fn time_axis_attrs() -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    attrs.insert("calendar".to_string(), "proleptic_gregorian".to_string());
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times(hours: &[u32]) -> Vec<TimeOfDay> {
        hours.iter().map(|&h| TimeOfDay::from_hm(h, 0)).collect()
    }

    #[test]
    fn scenario_1_day_split_yields_four_chunks_of_two() {
        let (axis, chunks) = build_ymd(
            &[2022],
            &[1, 7],
            &[1, 16],
            &times(&[0, 12]),
            Some(TimeSplit::Day),
        )
        .unwrap();
        assert_eq!(axis.len(), 8);
        let chunks = chunks.unwrap();
        assert_eq!(
            chunks.chunks.iter().map(|c| c.len).collect::<Vec<_>>(),
            vec![2, 2, 2, 2]
        );
    }

    #[test]
    fn scenario_1_month_split_yields_two_chunks_of_four() {
        let (axis, chunks) = build_ymd(
            &[2022],
            &[1, 7],
            &[1, 16],
            &times(&[0, 12]),
            Some(TimeSplit::Month),
        )
        .unwrap();
        assert_eq!(axis.len(), 8);
        let chunks = chunks.unwrap();
        assert_eq!(
            chunks.chunks.iter().map(|c| c.len).collect::<Vec<_>>(),
            vec![4, 4]
        );
    }

    #[test]
    fn unchunked_baseline_matches_chunked_axes() {
        let (axis_none, _) = build_ymd(&[2022], &[1, 7], &[1, 16], &times(&[0, 12]), None).unwrap();
        let (axis_day, _) =
            build_ymd(&[2022], &[1, 7], &[1, 16], &times(&[0, 12]), Some(TimeSplit::Day)).unwrap();
        assert_eq!(axis_none.as_i64(), axis_day.as_i64());
    }

    #[test]
    fn calendar_invalid_days_are_dropped_not_phantom_chunks() {
        // Feb 30 never exists; asking for day=31 across all months should
        // produce rows (and, under a day split, chunks) for exactly the
        // months that have a 31st.
        let (axis, chunks) =
            build_ymd(&[2023], &(1..=12).collect::<Vec<_>>(), &[31], &times(&[0]), Some(TimeSplit::Day))
                .unwrap();
        let months_with_31_days = [1, 3, 5, 7, 8, 10, 12];
        assert_eq!(axis.len(), months_with_31_days.len());
        assert_eq!(chunks.unwrap().chunks.len(), months_with_31_days.len());
    }

    #[test]
    fn date_range_day_splits_agree_with_unchunked() {
        let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        let stop = NaiveDate::from_ymd_opt(2022, 1, 5).unwrap();
        let t = times(&[0, 12]);
        let (unchunked, _) = build_date_range(start, stop, &t, None).unwrap();
        let (chunked_1, chunks_1) =
            build_date_range(start, stop, &t, Some(TimeSplit::DateRangeDays(1))).unwrap();
        let (chunked_2, chunks_2) =
            build_date_range(start, stop, &t, Some(TimeSplit::DateRangeDays(2))).unwrap();
        assert_eq!(unchunked.as_i64(), chunked_1.as_i64());
        assert_eq!(unchunked.as_i64(), chunked_2.as_i64());
        assert_eq!(chunks_1.unwrap().chunks.len(), 5);
        assert_eq!(
            chunks_2
                .unwrap()
                .chunks
                .iter()
                .map(|c| c.len)
                .collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
        assert_eq!(unchunked.len(), 10);
    }

    #[test]
    fn date_range_rejects_month_split() {
        let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        let stop = NaiveDate::from_ymd_opt(2022, 1, 5).unwrap();
        assert!(build_date_range(start, stop, &times(&[0]), Some(TimeSplit::Month)).is_err());
    }
}
