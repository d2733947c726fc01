//! `VirtualVariable` (spec section 3): everything the lazy array adapter and
//! the eventual labeled-array runtime need to know about one variable
//! without having downloaded a single byte of its payload.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::decoder::Decoder;
use crate::lazy_array::LazyArray;
use crate::transport::TransportClient;

/// The element dtype of a variable's payload, as discovered by the
/// metadata probe (spec section 4.F item 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DType {
    Float32,
    Float64,
    Int32,
    Int64,
}

/// One variable in the virtual dataset: its dims (a subset of the canonical
/// order), shape, dtype, attributes, and the lazy array adapter (spec
/// section 4.G, component G) that wraps its chunker -- multiple variables
/// from the same user request share one plan and differ only in which
/// payload slice they extract (spec section 3).
pub struct VirtualVariable<C: TransportClient, D: Decoder> {
    pub name: String,
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub attrs: BTreeMap<String, Value>,
    pub preferred_chunks: BTreeMap<String, usize>,
    pub array: LazyArray<C, D>,
}

impl<C: TransportClient, D: Decoder> Clone for VirtualVariable<C, D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            dims: self.dims.clone(),
            shape: self.shape.clone(),
            dtype: self.dtype,
            attrs: self.attrs.clone(),
            preferred_chunks: self.preferred_chunks.clone(),
            array: self.array.clone(),
        }
    }
}

impl<C: TransportClient, D: Decoder> VirtualVariable<C, D> {
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }
}

impl<C: TransportClient, D: Decoder> std::fmt::Debug for VirtualVariable<C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualVariable")
            .field("name", &self.name)
            .field("dims", &self.dims)
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .finish()
    }
}
