//! Lazy array adapter (spec section 4.G, component G): the read-only array
//! stub the eventual labeled-array runtime indexes into. It carries no state
//! of its own beyond shape/dtype and a chunker reference -- every read
//! delegates straight to [`RequestChunker::get_chunk`].

use std::sync::Arc;

use crate::chunker::{IndexSelector, RequestChunker};
use crate::decoder::Decoder;
use crate::error::ChunkerError;
use crate::raw_array::RawArray;
use crate::transport::TransportClient;
use crate::variable::DType;

/// One index component a caller may pass to [`LazyArray::get_item`]: a
/// single position, or a contiguous half-open range. Fancy (non-contiguous)
/// indexing is a Non-goal (spec section 4.G).
#[derive(Debug, Clone, Copy)]
pub enum ArrayIndex {
    Index(usize),
    Range(Option<usize>, Option<usize>),
}

impl From<ArrayIndex> for IndexSelector {
    fn from(index: ArrayIndex) -> Self {
        match index {
            ArrayIndex::Index(i) => IndexSelector::Index(i),
            ArrayIndex::Range(start, stop) => IndexSelector::Range { start, stop },
        }
    }
}

/// A read-only, shape-and-dtype-only array view backed by a chunker. This is
/// the seam spec section 4.H puts between the backend entrypoint and the
/// chunker: `open_dataset` wraps each variable in exactly one of these
/// rather than handing the runtime a `RequestChunker` directly.
pub struct LazyArray<C: TransportClient, D: Decoder> {
    shape: Vec<usize>,
    dtype: DType,
    chunker: Arc<RequestChunker<C, D>>,
}

impl<C: TransportClient, D: Decoder> Clone for LazyArray<C, D> {
    fn clone(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            dtype: self.dtype,
            chunker: Arc::clone(&self.chunker),
        }
    }
}

impl<C: TransportClient, D: Decoder> LazyArray<C, D> {
    pub fn new(chunker: Arc<RequestChunker<C, D>>) -> Self {
        Self {
            shape: chunker.shape(),
            dtype: chunker.probe_result().dtype,
            chunker,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// The chunker this adapter delegates every read to. Exposed so callers
    /// that need the chunker directly (e.g. `VirtualVariable`'s own
    /// metadata fields, built before the adapter wraps it) don't have to go
    /// through `get_item`.
    pub fn chunker(&self) -> &Arc<RequestChunker<C, D>> {
        &self.chunker
    }

    /// `__getitem__` (spec section 4.G): `key` must have one entry per dim.
    /// A bare index collapses that dim from the result; a range keeps it.
    pub fn get_item(&self, key: &[ArrayIndex]) -> Result<RawArray, ChunkerError> {
        if key.len() != self.shape.len() {
            return Err(ChunkerError::configuration(format!(
                "array index has {} components, expected {} for shape {:?}",
                key.len(),
                self.shape.len(),
                self.shape
            )));
        }
        let selectors: Vec<IndexSelector> = key.iter().copied().map(Into::into).collect();
        let chunk = self.chunker.get_chunk(&selectors)?;
        Ok(drop_integer_dims(chunk, key))
    }
}

/// `Index(_)` components collapse their dim entirely (basic-indexing
/// semantics), matching what `get_chunk` already sliced to length 1.
fn drop_integer_dims(array: RawArray, key: &[ArrayIndex]) -> RawArray {
    let keep: Vec<usize> = (0..array.dims.len())
        .filter(|&i| !matches!(key[i], ArrayIndex::Index(_)))
        .collect();
    if keep.len() == array.dims.len() {
        return array;
    }
    let dims: Vec<String> = keep.iter().map(|&i| array.dims[i].clone()).collect();
    let shape: Vec<usize> = keep.iter().map(|&i| array.shape[i]).collect();
    RawArray::new(dims, shape, array.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_indices_collapse_their_dim() {
        let array = RawArray::new(
            vec!["time".into(), "level".into()],
            vec![1, 3],
            vec![1.0, 2.0, 3.0],
        );
        let key = [ArrayIndex::Index(0), ArrayIndex::Range(None, None)];
        let result = drop_integer_dims(array, &key);
        assert_eq!(result.dims, vec!["level".to_string()]);
        assert_eq!(result.shape, vec![3]);
    }

    #[test]
    fn range_indices_are_kept() {
        let array = RawArray::new(vec!["time".into()], vec![2], vec![1.0, 2.0]);
        let key = [ArrayIndex::Range(Some(0), Some(2))];
        let result = drop_integer_dims(array, &key);
        assert_eq!(result.dims, vec!["time".to_string()]);
    }
}
