//! A minimal dense N-dimensional array used as the stand-in for whatever
//! the (out-of-scope) decoder hands back. The real labeled-array runtime
//! this backend feeds into has its own tensor type; this one exists only so
//! the chunker can transpose/expand/slice a decoded payload before handing
//! it to the lazy array adapter (spec section 4.F, `get_chunk`).
//!
//! Values are always `f64`, with `f64::NAN` as the missing-value sentinel
//! used by the short-first-chunk fix-up (spec section 4.F) -- every
//! variable this backend serves is floating point in practice, and
//! non-float dtypes are metadata-only as far as this crate is concerned.

use std::collections::BTreeMap;

/// A row-major dense array with named dims.
#[derive(Debug, Clone, PartialEq)]
pub struct RawArray {
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl RawArray {
    pub fn new(dims: Vec<String>, shape: Vec<usize>, data: Vec<f64>) -> Self {
        let expected: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected,
            "RawArray data length must match the product of its shape"
        );
        assert_eq!(dims.len(), shape.len(), "dims and shape must have equal rank");
        Self { dims, shape, data }
    }

    pub fn filled(dims: Vec<String>, shape: Vec<usize>, value: f64) -> Self {
        let len: usize = shape.iter().product();
        Self::new(dims, shape, vec![value; len])
    }

    fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1usize; self.shape.len()];
        for i in (0..self.shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.shape[i + 1];
        }
        strides
    }

    /// Reorders dims to `order`, physically permuting the underlying data.
    /// Dims in `order` that aren't present are silently skipped (the caller
    /// is expected to have already expanded missing dims to size 1).
    pub fn transposed(&self, order: &[String]) -> Self {
        let perm: Vec<usize> = order
            .iter()
            .filter_map(|name| self.dims.iter().position(|d| d == name))
            .collect();
        assert_eq!(perm.len(), self.dims.len(), "transpose order must cover every dim");

        let old_strides = self.strides();
        let new_shape: Vec<usize> = perm.iter().map(|&i| self.shape[i]).collect();
        let new_dims: Vec<String> = perm.iter().map(|&i| self.dims[i].clone()).collect();
        let new_strides = {
            let mut s = vec![1usize; new_shape.len()];
            for i in (0..new_shape.len().saturating_sub(1)).rev() {
                s[i] = s[i + 1] * new_shape[i + 1];
            }
            s
        };

        let total: usize = new_shape.iter().product();
        let mut data = vec![0.0; total];
        let mut new_idx = vec![0usize; new_shape.len()];
        for flat in 0..total {
            let mut rem = flat;
            for d in 0..new_shape.len() {
                new_idx[d] = rem / new_strides[d];
                rem %= new_strides[d];
            }
            let old_flat: usize = new_idx
                .iter()
                .enumerate()
                .map(|(d, &i)| i * old_strides[perm[d]])
                .sum();
            data[flat] = self.data[old_flat];
        }

        Self {
            dims: new_dims,
            shape: new_shape,
            data,
        }
    }

    /// Inserts a size-1 dim named `name` at canonical position `pos`, for
    /// dims the decoder didn't return for this particular variable (spec
    /// section 4.F: "expand any missing dims (size 1) at their canonical
    /// axis positions").
    pub fn with_expanded_dim(&self, name: &str, pos: usize) -> Self {
        if self.dims.iter().any(|d| d == name) {
            return self.clone();
        }
        let mut dims = self.dims.clone();
        let mut shape = self.shape.clone();
        let pos = pos.min(dims.len());
        dims.insert(pos, name.to_string());
        shape.insert(pos, 1);
        Self {
            dims,
            shape,
            data: self.data.clone(),
        }
    }

    /// Slices each dim by `[start, start+len)`, returning a new dense
    /// array with the requested sub-shape.
    pub fn sliced(&self, ranges: &BTreeMap<String, (usize, usize)>) -> Self {
        let strides = self.strides();
        let mut new_shape = Vec::with_capacity(self.shape.len());
        let mut starts = Vec::with_capacity(self.shape.len());
        for (i, dim) in self.dims.iter().enumerate() {
            let (start, len) = ranges.get(dim).copied().unwrap_or((0, self.shape[i]));
            new_shape.push(len);
            starts.push(start);
        }

        let total: usize = new_shape.iter().product();
        let mut data = Vec::with_capacity(total);
        let mut idx = vec![0usize; new_shape.len()];
        for _ in 0..total {
            let old_flat: usize = idx
                .iter()
                .enumerate()
                .map(|(d, &i)| (i + starts[d]) * strides[d])
                .sum();
            data.push(self.data[old_flat]);

            for d in (0..idx.len()).rev() {
                idx[d] += 1;
                if idx[d] < new_shape[d] {
                    break;
                }
                idx[d] = 0;
            }
        }

        Self {
            dims: self.dims.clone(),
            shape: new_shape,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transpose_reorders_data() {
        // shape (time=2, level=3), row-major: [[1,2,3],[4,5,6]]
        let arr = RawArray::new(
            vec!["time".into(), "level".into()],
            vec![2, 3],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        );
        let t = arr.transposed(&["level".into(), "time".into()]);
        assert_eq!(t.shape, vec![3, 2]);
        assert_eq!(t.data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn expand_dim_inserts_size_one() {
        let arr = RawArray::new(vec!["time".into()], vec![2], vec![1.0, 2.0]);
        let expanded = arr.with_expanded_dim("number", 1);
        assert_eq!(expanded.dims, vec!["time", "number"]);
        assert_eq!(expanded.shape, vec![2, 1]);
        assert_eq!(expanded.data, vec![1.0, 2.0]);
    }

    #[test]
    fn slice_extracts_sub_block() {
        let arr = RawArray::new(
            vec!["time".into(), "level".into()],
            vec![4, 2],
            (0..8).map(|v| v as f64).collect(),
        );
        let mut ranges = BTreeMap::new();
        ranges.insert("time".to_string(), (1usize, 2usize));
        let sliced = arr.sliced(&ranges);
        assert_eq!(sliced.shape, vec![2, 2]);
        assert_eq!(sliced.data, vec![2.0, 3.0, 4.0, 5.0]);
    }
}
