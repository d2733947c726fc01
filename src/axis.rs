//! Coordinate axes (spec section 3): named, uniformly-typed sequences of
//! values. Values are kept in `arrow2` primitive arrays -- the same
//! columnar representation the teacher's chunk store uses for its time and
//! component columns -- so the crate never has to invent its own numeric
//! container. [`Axis::concat`] reassembles a full axis from its per-chunk
//! slices using `arrow2`'s own `concatenate` kernel, the same kernel
//! `re_chunk::util::arrays_to_list_array` uses to stitch sorted arrays back
//! together (property P1).

use std::collections::BTreeMap;

use arrow2::array::{Array as ArrowArray, Float64Array, Int32Array, Int64Array};

/// The dtype tag attached to an axis, matching the canonical table in spec
/// section 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AxisDType {
    /// Nanosecond datetime64, used for `time`/`valid_time`.
    DatetimeNs,
    /// Nanosecond duration (hour-scaled), used for `step`.
    DurationNs,
    /// `isobaricInhPa`: int32 with a `units=hPa` attribute.
    Int32Level,
    /// `number` (ensemble member): int64.
    Int64,
    /// Any server-discovered coordinate axis (e.g. `latitude`/`longitude`)
    /// that isn't one of the request's own declared dims.
    Float64,
}

/// One coordinate axis: a name, its values, and the dtype/attrs pair that
/// the eventual labeled-array runtime will attach to it.
#[derive(Debug, Clone)]
pub struct Axis {
    pub name: String,
    pub dtype: AxisDType,
    pub attrs: BTreeMap<String, String>,
    values_ns_or_i64: Int64Array,
    values_i32: Option<Int32Array>,
    values_f64: Option<Float64Array>,
}

impl Axis {
    pub fn new_i64(name: impl Into<String>, dtype: AxisDType, values: Vec<i64>) -> Self {
        let mut attrs = BTreeMap::new();
        if dtype == AxisDType::DurationNs {
            attrs.insert("units".to_string(), "ns".to_string());
        }
        Self {
            name: name.into(),
            dtype,
            attrs,
            values_ns_or_i64: Int64Array::from_vec(values),
            values_i32: None,
            values_f64: None,
        }
    }

    pub fn new_i32_level(name: impl Into<String>, values: Vec<i32>) -> Self {
        let mut attrs = BTreeMap::new();
        attrs.insert("units".to_string(), "hPa".to_string());
        Self {
            name: name.into(),
            dtype: AxisDType::Int32Level,
            attrs,
            values_ns_or_i64: Int64Array::from_vec(vec![]),
            values_i32: Some(Int32Array::from_vec(values)),
            values_f64: None,
        }
    }

    /// Server-discovered float coordinate axis (spec section 4.F: axes the
    /// decoder reports that weren't part of the request at all).
    pub fn new_f64(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            dtype: AxisDType::Float64,
            attrs: BTreeMap::new(),
            values_ns_or_i64: Int64Array::from_vec(vec![]),
            values_i32: None,
            values_f64: Some(Float64Array::from_vec(values)),
        }
    }

    pub fn len(&self) -> usize {
        if let Some(arr) = &self.values_i32 {
            arr.len()
        } else if let Some(arr) = &self.values_f64 {
            arr.len()
        } else {
            self.values_ns_or_i64.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_i64(&self) -> &[i64] {
        self.values_ns_or_i64.values().as_slice()
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        self.values_i32.as_ref().map(|a| a.values().as_slice())
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        self.values_f64.as_ref().map(|a| a.values().as_slice())
    }

    /// Returns a new axis containing only `[start, start+len)` of this one,
    /// preserving name/dtype/attrs -- used by property P1 tests to
    /// reconstruct the full axis from its chunk slices.
    pub fn sliced(&self, start: usize, len: usize) -> Self {
        if let Some(arr) = &self.values_i32 {
            return Self {
                name: self.name.clone(),
                dtype: self.dtype,
                attrs: self.attrs.clone(),
                values_ns_or_i64: Int64Array::from_vec(vec![]),
                values_i32: Some(Int32Array::from_vec(
                    arr.values().as_slice()[start..start + len].to_vec(),
                )),
                values_f64: None,
            };
        }
        if let Some(arr) = &self.values_f64 {
            return Self {
                name: self.name.clone(),
                dtype: self.dtype,
                attrs: self.attrs.clone(),
                values_ns_or_i64: Int64Array::from_vec(vec![]),
                values_i32: None,
                values_f64: Some(Float64Array::from_vec(
                    arr.values().as_slice()[start..start + len].to_vec(),
                )),
            };
        }
        Self {
            name: self.name.clone(),
            dtype: self.dtype,
            attrs: self.attrs.clone(),
            values_ns_or_i64: Int64Array::from_vec(
                self.values_ns_or_i64.values().as_slice()[start..start + len].to_vec(),
            ),
            values_i32: None,
            values_f64: None,
        }
    }

    fn dyn_array(&self) -> &dyn ArrowArray {
        if let Some(arr) = &self.values_i32 {
            arr
        } else if let Some(arr) = &self.values_f64 {
            arr
        } else {
            &self.values_ns_or_i64
        }
    }

    /// Reassembles a full axis from its per-chunk slices via `arrow2`'s own
    /// `concatenate` kernel, the same one `re_chunk`'s `util::arrays_to_list_array`
    /// uses to stitch sorted per-chunk arrays back together. This is the
    /// concrete reconstruction step property P1 ("concatenating the
    /// per-chunk value slices in order reproduces the full axis exactly")
    /// checks against.
    pub fn concat(chunks: &[&Axis]) -> Self {
        let first = chunks.first().expect("concat requires at least one chunk");
        let arrays: Vec<&dyn ArrowArray> = chunks.iter().map(|c| c.dyn_array()).collect();
        let combined = arrow2::compute::concatenate::concatenate(&arrays)
            .expect("all chunks of one axis share a dtype");

        let name = first.name.clone();
        let dtype = first.dtype;
        let attrs = first.attrs.clone();
        match dtype {
            AxisDType::Int32Level => Self {
                name,
                dtype,
                attrs,
                values_ns_or_i64: Int64Array::from_vec(vec![]),
                values_i32: Some(
                    combined
                        .as_any()
                        .downcast_ref::<Int32Array>()
                        .expect("Int32Level axis concatenates to an Int32Array")
                        .clone(),
                ),
                values_f64: None,
            },
            AxisDType::Float64 => Self {
                name,
                dtype,
                attrs,
                values_ns_or_i64: Int64Array::from_vec(vec![]),
                values_i32: None,
                values_f64: Some(
                    combined
                        .as_any()
                        .downcast_ref::<Float64Array>()
                        .expect("Float64 axis concatenates to a Float64Array")
                        .clone(),
                ),
            },
            AxisDType::DatetimeNs | AxisDType::DurationNs | AxisDType::Int64 => Self {
                name,
                dtype,
                attrs,
                values_ns_or_i64: combined
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .expect("i64-backed axis concatenates to an Int64Array")
                    .clone(),
                values_i32: None,
                values_f64: None,
            },
        }
    }
}

/// A serializable snapshot of an [`Axis`], used by the probe cache
/// (spec section 4.C) to persist server-discovered axes to disk across
/// dataset opens without round-tripping through `arrow2` arrays, which
/// aren't `serde`-serializable.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AxisSnapshot {
    pub name: String,
    pub dtype: AxisDType,
    pub attrs: BTreeMap<String, String>,
    pub i64_values: Vec<i64>,
    pub i32_values: Vec<i32>,
    pub f64_values: Vec<f64>,
}

impl From<&Axis> for AxisSnapshot {
    fn from(axis: &Axis) -> Self {
        Self {
            name: axis.name.clone(),
            dtype: axis.dtype,
            attrs: axis.attrs.clone(),
            i64_values: if axis.values_i32.is_none() && axis.values_f64.is_none() {
                axis.as_i64().to_vec()
            } else {
                Vec::new()
            },
            i32_values: axis.as_i32().map(|v| v.to_vec()).unwrap_or_default(),
            f64_values: axis.as_f64().map(|v| v.to_vec()).unwrap_or_default(),
        }
    }
}

impl From<&AxisSnapshot> for Axis {
    fn from(snapshot: &AxisSnapshot) -> Self {
        let mut axis = match snapshot.dtype {
            AxisDType::Int32Level => Axis::new_i32_level(snapshot.name.clone(), snapshot.i32_values.clone()),
            AxisDType::Float64 => Axis::new_f64(snapshot.name.clone(), snapshot.f64_values.clone()),
            AxisDType::DatetimeNs | AxisDType::DurationNs | AxisDType::Int64 => {
                Axis::new_i64(snapshot.name.clone(), snapshot.dtype, snapshot.i64_values.clone())
            }
        };
        axis.attrs = snapshot.attrs.clone();
        axis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_axis_round_trips() {
        let axis = Axis::new_i64("time", AxisDType::DatetimeNs, vec![10, 20, 30, 40]);
        let left = axis.sliced(0, 2);
        let right = axis.sliced(2, 2);
        assert_eq!(left.as_i64(), &[10, 20]);
        assert_eq!(right.as_i64(), &[30, 40]);
    }

    #[test]
    fn level_axis_carries_hpa_units() {
        let axis = Axis::new_i32_level("isobaricInhPa", vec![1000, 700, 500]);
        assert_eq!(axis.attrs.get("units").map(String::as_str), Some("hPa"));
        assert_eq!(axis.as_i32().unwrap(), &[1000, 700, 500]);
    }

    #[test]
    fn p1_concatenating_chunk_slices_reproduces_the_full_axis() {
        let axis = Axis::new_i64("time", AxisDType::DatetimeNs, vec![10, 20, 30, 40, 50]);
        let chunks = [axis.sliced(0, 2), axis.sliced(2, 2), axis.sliced(4, 1)];
        let refs: Vec<&Axis> = chunks.iter().collect();
        let reassembled = Axis::concat(&refs);
        assert_eq!(reassembled.as_i64(), axis.as_i64());
    }

    #[test]
    fn p1_concat_preserves_level_dtype_and_attrs() {
        let axis = Axis::new_i32_level("isobaricInhPa", vec![1000, 700, 500]);
        let chunks = [axis.sliced(0, 2), axis.sliced(2, 1)];
        let refs: Vec<&Axis> = chunks.iter().collect();
        let reassembled = Axis::concat(&refs);
        assert_eq!(reassembled.as_i32().unwrap(), &[1000, 700, 500]);
        assert_eq!(reassembled.attrs.get("units").map(String::as_str), Some("hPa"));
    }

    #[test]
    fn axis_snapshot_round_trips_through_each_dtype() {
        let level = Axis::new_i32_level("isobaricInhPa", vec![1000, 700, 500]);
        let restored: Axis = (&AxisSnapshot::from(&level)).into();
        assert_eq!(restored.as_i32().unwrap(), level.as_i32().unwrap());
        assert_eq!(restored.attrs, level.attrs);

        let float = Axis::new_f64("latitude", vec![1.5, 2.5]);
        let restored: Axis = (&AxisSnapshot::from(&float)).into();
        assert_eq!(restored.as_f64().unwrap(), float.as_f64().unwrap());

        let time = Axis::new_i64("time", AxisDType::DatetimeNs, vec![10, 20, 30]);
        let restored: Axis = (&AxisSnapshot::from(&time)).into();
        assert_eq!(restored.as_i64(), time.as_i64());
    }
}
