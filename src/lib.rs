//! Request-space chunker and lazy-materialisation engine for remote climate
//! archives (CDS API, `ecmwf-opendata`, Polytope).
//!
//! This crate turns one user request into a tree of small, independently
//! retrievable sub-requests ("chunks"), fetches and decodes them through a
//! content-addressed on-disk cache, and exposes the result as a set of
//! lazily-materialised virtual variables. It does not speak any archive wire
//! protocol itself, decode any binary format, or provide a labeled-array
//! runtime -- those are external collaborators this crate is built to sit
//! between (see [`transport`] and [`decoder`] for the seams).
//!
//! # Layout
//!
//! - [`request`] / [`policy`]: the request data model and chunking policy.
//! - [`time_axis`] / [`header_axis`] / [`axis`] / [`plan`]: axis builders and
//!   the chunk plan they produce.
//! - [`cache`]: the content-addressed retrieval cache.
//! - [`chunker`]: ties the above together and resolves `get_chunk` calls.
//! - [`lazy_array`] / [`variable`]: the lazy array adapter and per-variable
//!   metadata a labeled-array runtime would consume.
//! - [`backend`]: the `open_dataset` entrypoint.

pub mod axis;
pub mod backend;
pub mod cache;
pub mod chunker;
pub mod decoder;
pub mod error;
pub mod header_axis;
pub mod lazy_array;
mod log_ext;
pub mod plan;
pub mod policy;
pub mod raw_array;
pub mod request;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod time_axis;
pub mod transport;
pub mod variable;

pub use axis::{Axis, AxisDType, AxisSnapshot};
pub use backend::{open_dataset, BackendOptions, VirtualDataset};
pub use cache::{CacheOptions, CachedProbe, RetrievalCache};
pub use chunker::{ChunkerOptions, IndexSelector, ProbeResult, RequestChunker};
pub use decoder::{DecodedArray, Decoder, DecoderOptions};
pub use error::{ChunkerError, ChunkerResult};
pub use lazy_array::{ArrayIndex, LazyArray};
pub use plan::{AxisChunks, ChunkPlan, ChunkSlice, RequestFragment};
pub use policy::{ChunkingPolicy, TimeSplit};
pub use raw_array::RawArray;
pub use request::{HeaderAxisSpec, HeaderRole, Request, TimeOfDay, TimeSelector};
pub use transport::{ClientKind, SubmittedRequest, TransportClient};
pub use variable::{DType, VirtualVariable};
