//! The decoder contract (spec section 1/4.B): turns a downloaded file into
//! an in-memory labeled array. The actual binary decoder is an external
//! collaborator and out of scope; this module only defines what the core
//! needs from it.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::axis::Axis;
use crate::raw_array::RawArray;
use crate::variable::DType;

/// What `Decoder::open` hands back for one file: the decoder-assigned
/// variable name (which may differ from the request's label, e.g.
/// `"2m_temperature"` vs `"t2m"`), its dims/dtype/attrs, every coordinate
/// axis present in the payload (including server-only ones), and the dense
/// payload itself.
#[derive(Debug, Clone)]
pub struct DecodedArray {
    pub variable_name: String,
    pub dims: Vec<String>,
    pub dtype: DType,
    pub dataset_attrs: BTreeMap<String, Value>,
    pub var_attrs: BTreeMap<String, Value>,
    pub coords: BTreeMap<String, Axis>,
    pub payload: RawArray,
}

/// Archive-tuned decoder options (spec section 4.C item 5): a flag disables
/// the decoder's own side-car index when caching is off, plus whatever
/// opaque `open_dataset_kwargs` the caller supplied.
#[derive(Debug, Clone, Default)]
pub struct DecoderOptions {
    pub use_sidecar_index: bool,
    /// Set by the metadata probe (spec section 4.F) when neither
    /// `leadtime_hour` nor `step` was in the request but the sample array
    /// reports a `step` dimension anyway: folds `step` into `time` on every
    /// subsequent retrieval instead of surfacing it as an extra array dim.
    pub collapse_step_into_time: bool,
    pub extra: BTreeMap<String, Value>,
}

/// `open(path) -> DecodedArray` (spec section 4.B). Implemented by the
/// (out-of-scope) binary decoder; this crate only calls it.
pub trait Decoder: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn open(&self, path: &Path, options: &DecoderOptions) -> Result<DecodedArray, Self::Error>;
}
