//! `ChunkPlan` (spec section 3): for each chunked axis, an ordered list of
//! `(start_index, request_fragment)` pairs, plus the bisection used by the
//! chunk locator (spec section 4.F) to map a global index to its chunk.

use std::collections::BTreeMap;

/// The subset of request keys/values that selects exactly the rows of one
/// chunk from the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFragment(pub BTreeMap<String, serde_json::Value>);

impl RequestFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    /// Merges `other` into `self`, `other` winning on key collisions. Used
    /// by the locator to accumulate the union of every selected chunk's
    /// fragment into one combined sub-request.
    pub fn merge(&mut self, other: &Self) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }
}

/// One chunk along one axis: where it starts, how long it is, and the
/// request fragment that selects it.
#[derive(Debug, Clone)]
pub struct ChunkSlice {
    pub start_index: usize,
    pub len: usize,
    pub fragment: RequestFragment,
}

/// The ordered chunk list for a single chunked axis.
#[derive(Debug, Clone)]
pub struct AxisChunks {
    pub axis_name: String,
    pub chunks: Vec<ChunkSlice>,
}

impl AxisChunks {
    pub fn single_chunk(axis_name: impl Into<String>, len: usize, fragment: RequestFragment) -> Self {
        Self {
            axis_name: axis_name.into(),
            chunks: vec![ChunkSlice {
                start_index: 0,
                len,
                fragment,
            }],
        }
    }

    pub fn starts(&self) -> Vec<usize> {
        self.chunks.iter().map(|c| c.start_index).collect()
    }

    pub fn total_len(&self) -> usize {
        self.chunks.iter().map(|c| c.len).sum()
    }

    /// `P2 Unique chunk`: for a global index, find the chunk index `i` via
    /// `bisect_right(starts, index) - 1`, as spec section 4.F's locator
    /// algorithm specifies.
    pub fn chunk_index_for(&self, global_index: usize) -> Option<usize> {
        if self.chunks.is_empty() || global_index >= self.total_len() {
            return None;
        }
        let starts = self.starts();
        let i = starts.partition_point(|&s| s <= global_index);
        if i == 0 {
            None
        } else {
            Some(i - 1)
        }
    }

    /// Same bisection, but for the start of a range selection; `None` start
    /// is treated as `0` per spec section 4.F.
    pub fn chunk_index_for_range_start(&self, start: Option<usize>) -> Option<usize> {
        self.chunk_index_for(start.unwrap_or(0))
    }
}

/// The complete plan: one [`AxisChunks`] per chunked axis, plus the
/// canonical dim order (chunked and unchunked alike) used to lay out
/// [`crate::variable::VirtualVariable`] shapes.
#[derive(Debug, Clone, Default)]
pub struct ChunkPlan {
    pub axes: Vec<AxisChunks>,
}

impl ChunkPlan {
    pub fn axis(&self, name: &str) -> Option<&AxisChunks> {
        self.axes.iter().find(|a| a.axis_name == name)
    }

    pub fn axis_names(&self) -> Vec<&str> {
        self.axes.iter().map(|a| a.axis_name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with_chunks(sizes: &[usize]) -> AxisChunks {
        let mut start = 0;
        let chunks = sizes
            .iter()
            .map(|&len| {
                let c = ChunkSlice {
                    start_index: start,
                    len,
                    fragment: RequestFragment::new(),
                };
                start += len;
                c
            })
            .collect();
        AxisChunks {
            axis_name: "time".into(),
            chunks,
        }
    }

    #[test]
    fn bisect_finds_unique_chunk_for_every_index() {
        let axis = plan_with_chunks(&[2, 2, 2, 2]);
        let expected = [0, 0, 1, 1, 2, 2, 3, 3];
        for (i, &want) in expected.iter().enumerate() {
            assert_eq!(axis.chunk_index_for(i), Some(want));
        }
        assert_eq!(axis.chunk_index_for(8), None);
    }

    #[test]
    fn bisect_handles_ragged_final_chunk() {
        let axis = plan_with_chunks(&[4, 4, 2]);
        assert_eq!(axis.chunk_index_for(7), Some(1));
        assert_eq!(axis.chunk_index_for(8), Some(2));
        assert_eq!(axis.chunk_index_for(9), Some(2));
        assert_eq!(axis.chunk_index_for(10), None);
    }

    #[test]
    fn none_start_treated_as_zero() {
        let axis = plan_with_chunks(&[2, 2]);
        assert_eq!(axis.chunk_index_for_range_start(None), Some(0));
    }
}
