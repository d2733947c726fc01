//! Header-axis builder (spec section 4.E, component E, ~10% of the core):
//! step/leadtime, pressure level, and ensemble member, all split uniformly
//! by count rather than by calendar semantics.

use serde_json::Value;

use crate::axis::Axis;
use crate::plan::{AxisChunks, ChunkSlice, RequestFragment};
use crate::request::{HeaderAxisSpec, HeaderRole};

const NANOS_PER_HOUR: i64 = 3_600 * 1_000_000_000;

/// Builds the axis and chunk plan for one header dimension with split size
/// `split` (spec section 4.E: `ceil(L/split)` chunks, each of size `split`
/// except possibly the last).
pub fn build_header_axis(spec: &HeaderAxisSpec, split: usize) -> (Axis, AxisChunks) {
    let axis_name = spec.role.canonical_axis_name();

    let axis = match spec.role {
        HeaderRole::Step => {
            // Step values additionally undergo unit scaling: integer hours
            // become nanosecond durations in the axis, while the request
            // fragments still carry the original hour values.
            let ns: Vec<i64> = spec.values.iter().map(|h| h * NANOS_PER_HOUR).collect();
            Axis::new_i64(axis_name, crate::axis::AxisDType::DurationNs, ns)
        }
        HeaderRole::PressureLevel => {
            let levels: Vec<i32> = spec.values.iter().map(|&v| v as i32).collect();
            Axis::new_i32_level(axis_name, levels)
        }
        HeaderRole::Number => Axis::new_i64(axis_name, crate::axis::AxisDType::Int64, spec.values.clone()),
    };

    let len = spec.values.len();
    let n_chunks = len.div_ceil(split);
    let mut chunks = Vec::with_capacity(n_chunks);
    for k in 0..n_chunks {
        let lo = k * split;
        let hi = (lo + split).min(len);
        let mut fragment = RequestFragment::new();
        let slice: Vec<Value> = spec.values[lo..hi].iter().map(|&v| Value::from(v)).collect();
        fragment.insert(spec.source_key.clone(), Value::Array(slice));
        chunks.push(ChunkSlice {
            start_index: lo,
            len: hi - lo,
            fragment,
        });
    }

    (
        axis,
        AxisChunks {
            axis_name: axis_name.to_string(),
            chunks,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_4_pressure_level_splits_two_one() {
        let spec = HeaderAxisSpec {
            role: HeaderRole::PressureLevel,
            source_key: "pressure_level".into(),
            values: vec![1000, 700, 500],
        };
        let (axis, chunks) = build_header_axis(&spec, 2);
        assert_eq!(axis.len(), 3);
        assert_eq!(
            chunks.chunks.iter().map(|c| c.len).collect::<Vec<_>>(),
            vec![2, 1]
        );
    }

    #[test]
    fn step_values_scale_to_nanosecond_durations() {
        let spec = HeaderAxisSpec {
            role: HeaderRole::Step,
            source_key: "leadtime_hour".into(),
            values: vec![36, 72],
        };
        let (axis, _) = build_header_axis(&spec, 1);
        assert_eq!(axis.as_i64(), &[36 * NANOS_PER_HOUR, 72 * NANOS_PER_HOUR]);
    }

    #[test]
    fn default_split_is_one_chunk() {
        let spec = HeaderAxisSpec {
            role: HeaderRole::Number,
            source_key: "number".into(),
            values: vec![1, 2, 3, 4],
        };
        let (_, chunks) = build_header_axis(&spec, spec.values.len());
        assert_eq!(chunks.chunks.len(), 1);
        assert_eq!(chunks.chunks[0].len, 4);
    }

    #[test]
    fn scenario_6_step_and_number_split_by_one() {
        let step = HeaderAxisSpec {
            role: HeaderRole::Step,
            source_key: "step".into(),
            values: vec![12, 24, 48],
        };
        let number = HeaderAxisSpec {
            role: HeaderRole::Number,
            source_key: "number".into(),
            values: vec![1, 2],
        };
        let (_, step_chunks) = build_header_axis(&step, 1);
        let (_, number_chunks) = build_header_axis(&number, 1);
        assert_eq!(step_chunks.chunks.len(), 3);
        assert_eq!(number_chunks.chunks.len(), 2);
    }
}
