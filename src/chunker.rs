//! Request chunker (spec section 4.F, component F, ~35% of the core): ties
//! the time- and header-axis builders together, probes the archive once for
//! server-only axes, and resolves array indices to chunks.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::axis::Axis;
use crate::cache::RetrievalCache;
use crate::decoder::{Decoder, DecoderOptions};
use crate::error::ChunkerError;
use crate::header_axis::build_header_axis;
use crate::log_ext::ResultExt as _;
use crate::plan::{AxisChunks, ChunkSlice, RequestFragment};
use crate::policy::ChunkingPolicy;
use crate::raw_array::RawArray;
use crate::request::{HeaderRole, Request, TimeSelector};
use crate::time_axis::{build_date_range, build_ymd};
use crate::transport::TransportClient;
use crate::variable::DType;

/// One component of a `get_chunk` key: either a single index or a
/// half-open, contiguous range. Fancy (non-contiguous) indexing isn't
/// supported, matching the lazy array adapter's own restriction (spec
/// section 4.G).
#[derive(Debug, Clone, Copy)]
pub enum IndexSelector {
    Index(usize),
    Range {
        start: Option<usize>,
        stop: Option<usize>,
    },
}

impl IndexSelector {
    fn start(&self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Range { start, .. } => *start,
        }
    }

    fn resolve(&self, axis_len: usize) -> (usize, usize) {
        match self {
            Self::Index(i) => (*i, 1),
            Self::Range { start, stop } => {
                let s = start.unwrap_or(0);
                let e = stop.unwrap_or(axis_len).min(axis_len);
                (s, e.saturating_sub(s))
            }
        }
    }
}

/// What the metadata probe discovers (spec section 4.F item 3): the
/// decoder-assigned variable name, the full dim list in canonical order
/// (declared axes, then server-discovered ones in decoder-reported order),
/// dtype, attrs, and the server-only axes themselves.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub variable_name: String,
    pub full_dims: Vec<String>,
    pub dtype: DType,
    pub dataset_attrs: BTreeMap<String, Value>,
    pub var_attrs: BTreeMap<String, Value>,
    pub server_axes: BTreeMap<String, Axis>,
    pub collapse_step_into_time: bool,
}

/// Chunker-specific options not covered by [`crate::cache::CacheOptions`]:
/// the short-first-chunk fix-up switch spec section 9 says implementers
/// should expose per archive, since it's only confirmed on ERA5.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerOptions {
    pub fix_up_short_first_chunk: bool,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self {
            fix_up_short_first_chunk: true,
        }
    }
}

/// One axis that has been chunked, with its coordinate values and its
/// chunk plan kept together so the locator never has to zip two parallel
/// collections.
#[derive(Debug, Clone)]
struct ChunkedAxis {
    axis: Axis,
    chunks: AxisChunks,
}

/// The request chunker (spec section 4.F): owns the immutable plan for one
/// variable of one user request, and resolves `get_chunk` calls against it.
pub struct RequestChunker<C: TransportClient, D: Decoder> {
    request: Request,
    time: ChunkedAxis,
    header: Vec<ChunkedAxis>,
    options: ChunkerOptions,
    probe: ProbeResult,
    cache: Arc<RetrievalCache>,
    client: Arc<C>,
    decoder: Arc<D>,
    decoder_options: DecoderOptions,
}

impl<C: TransportClient, D: Decoder> Clone for RequestChunker<C, D> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
            time: self.time.clone(),
            header: self.header.clone(),
            options: self.options,
            probe: self.probe.clone(),
            cache: Arc::clone(&self.cache),
            client: Arc::clone(&self.client),
            decoder: Arc::clone(&self.decoder),
            decoder_options: self.decoder_options.clone(),
        }
    }
}

impl<C: TransportClient, D: Decoder> RequestChunker<C, D> {
    /// Builds the plan (time + header axes, still without server-only
    /// axes) and immediately performs the metadata probe (spec section 4.F
    /// items 2-3) -- both happen once, at dataset open, per spec section 3's
    /// lifecycle note.
    pub fn open(
        request: Request,
        policy: &ChunkingPolicy,
        options: ChunkerOptions,
        cache: Arc<RetrievalCache>,
        client: Arc<C>,
        decoder: Arc<D>,
        decoder_options: DecoderOptions,
    ) -> Result<Self, ChunkerError> {
        if request.variable.len() != 1 {
            return Err(ChunkerError::configuration(
                "RequestChunker::open expects a request already reduced to a single variable; \
                 use Request::with_single_variable first",
            ));
        }

        let time = Self::build_time_axis(&request.time, policy)?;

        let mut header = Vec::new();
        for role in [HeaderRole::Step, HeaderRole::PressureLevel, HeaderRole::Number] {
            if let Some(spec) = request.header_role(role) {
                let split = policy.resolve_header_split(role, spec.values.len())?;
                let (axis, chunks) = build_header_axis(spec, split);
                header.push(ChunkedAxis { axis, chunks });
            }
        }

        let declared_dims: Vec<String> = std::iter::once("time".to_string())
            .chain(header.iter().map(|h| h.axis.name.clone()))
            .collect();

        let mut chunker = Self {
            request,
            time,
            header,
            options,
            probe: ProbeResult {
                variable_name: String::new(),
                full_dims: declared_dims,
                dtype: DType::Float64,
                dataset_attrs: BTreeMap::new(),
                var_attrs: BTreeMap::new(),
                server_axes: BTreeMap::new(),
                collapse_step_into_time: false,
            },
            cache,
            client,
            decoder,
            decoder_options,
        };

        chunker.probe = chunker.run_probe()?;
        chunker.decoder_options.collapse_step_into_time = chunker.probe.collapse_step_into_time;
        Ok(chunker)
    }

    fn build_time_axis(
        selector: &TimeSelector,
        policy: &ChunkingPolicy,
    ) -> Result<ChunkedAxis, ChunkerError> {
        let split = policy.resolve_time_split(selector)?;
        let (axis, chunks) = match selector {
            TimeSelector::Ymd {
                years,
                months,
                days,
                times,
            } => build_ymd(years, months, days, times, split)?,
            TimeSelector::DateRange { start, stop, times } => {
                build_date_range(*start, *stop, times, split)?
            }
        };
        let len = axis.len();
        let chunks = chunks.unwrap_or_else(|| {
            AxisChunks::single_chunk("time", len, whole_time_fragment(selector))
        });
        Ok(ChunkedAxis { axis, chunks })
    }

    /// `request_dimensions()` (spec section 4.F item 1).
    pub fn request_dimensions(&self) -> BTreeMap<String, Vec<serde_json::Value>> {
        self.request.request_dimensions()
    }

    /// `chunks()` (spec section 4.F item 5): per-axis chunk size tuple.
    pub fn chunks(&self) -> BTreeMap<String, Vec<usize>> {
        let mut out = BTreeMap::new();
        out.insert(
            self.time.axis.name.clone(),
            self.time.chunks.chunks.iter().map(|c| c.len).collect(),
        );
        for h in &self.header {
            out.insert(h.axis.name.clone(), h.chunks.chunks.iter().map(|c| c.len).collect());
        }
        out
    }

    pub fn probe_result(&self) -> &ProbeResult {
        &self.probe
    }

    pub fn full_dims(&self) -> &[String] {
        &self.probe.full_dims
    }

    pub fn shape(&self) -> Vec<usize> {
        self.probe
            .full_dims
            .iter()
            .map(|dim| self.axis_len(dim))
            .collect()
    }

    fn axis_len(&self, dim: &str) -> usize {
        if dim == self.time.axis.name {
            return self.time.chunks.total_len();
        }
        if let Some(h) = self.header.iter().find(|h| h.axis.name == dim) {
            return h.chunks.total_len();
        }
        self.probe
            .server_axes
            .get(dim)
            .map(Axis::len)
            .unwrap_or(0)
    }

    fn base_fragment(&self) -> RequestFragment {
        let mut fragment = RequestFragment::new();
        fragment.insert(
            "variable",
            Value::Array(
                self.request
                    .variable
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        for (k, v) in &self.request.extra {
            fragment.insert(k.clone(), v.clone());
        }
        fragment
    }

    /// `probe(cache)` (spec section 4.F item 3): fetches the sample
    /// sub-request combining the first fragment of every chunked axis, and
    /// discovers server-only axes, dtype, attrs, and the reanalysis
    /// step-collapsing flag.
    fn run_probe(&self) -> Result<ProbeResult, ChunkerError> {
        let mut fragment = self.base_fragment();
        fragment.merge(&self.time.chunks.chunks[0].fragment);
        for h in &self.header {
            fragment.merge(&h.chunks.chunks[0].fragment);
        }

        // Repeated opens of the same virtual dataset shouldn't re-download
        // the sample sub-request just to re-discover axes this chunker
        // already learned once (spec section 4.C).
        if let Some(cached) = self
            .cache
            .load_cached_probe(&fragment)
            .ok_or_warn("reading cached probe metadata")
            .flatten()
        {
            return Ok(ProbeResult {
                variable_name: cached.variable_name,
                full_dims: cached.full_dims,
                dtype: cached.dtype,
                dataset_attrs: cached.dataset_attrs,
                var_attrs: cached.var_attrs,
                server_axes: cached.server_axes,
                collapse_step_into_time: cached.collapse_step_into_time,
            });
        }

        let variable_label = self.request.variable[0].clone();
        let decoded = self
            .cache
            .retrieve_with_retry(
                &fragment,
                self.client.as_ref(),
                self.decoder.as_ref(),
                &self.decoder_options,
                |array| array.clone(),
            )
            .map_err(|source| ChunkerError::Probe {
                variable: variable_label.clone(),
                source: Box::new(source),
            })?;

        let declared: Vec<String> = std::iter::once(self.time.axis.name.clone())
            .chain(self.header.iter().map(|h| h.axis.name.clone()))
            .collect();

        let mut server_axes = BTreeMap::new();
        let mut server_order = Vec::new();
        for dim in &decoded.payload.dims {
            if declared.contains(dim) {
                continue;
            }
            if let Some(axis) = decoded.coords.get(dim) {
                server_axes.insert(dim.clone(), axis.clone());
            }
            server_order.push(dim.clone());
        }

        let collapse_step_into_time = self.request.header_role(HeaderRole::Step).is_none()
            && decoded.payload.dims.iter().any(|d| d == "step");

        let mut full_dims = declared;
        full_dims.extend(server_order);

        self.cache
            .cached_empty_dataset(&fragment, &decoded, &full_dims, &server_axes, collapse_step_into_time)
            .ok_or_warn("writing probe metadata cache entry");

        Ok(ProbeResult {
            variable_name: decoded.variable_name.clone(),
            full_dims,
            dtype: decoded.dtype,
            dataset_attrs: decoded.dataset_attrs.clone(),
            var_attrs: decoded.var_attrs.clone(),
            server_axes,
            collapse_step_into_time,
        })
    }

    fn chunked_axis(&self, dim: &str) -> Option<&ChunkedAxis> {
        if self.time.axis.name == dim {
            Some(&self.time)
        } else {
            self.header.iter().find(|h| h.axis.name == dim)
        }
    }

    /// `get_chunk(key)` (spec section 4.F): the chunk locator. `key` must
    /// have one entry per dim in [`Self::full_dims`].
    pub fn get_chunk(&self, key: &[IndexSelector]) -> Result<RawArray, ChunkerError> {
        let dims = self.full_dims();
        if key.len() != dims.len() {
            return Err(ChunkerError::configuration(format!(
                "get_chunk key has {} components, expected {} (one per dim: {dims:?})",
                key.len(),
                dims.len()
            )));
        }

        let mut combined = self.base_fragment();
        // (axis name) -> (chunk start on the global axis, requested local range)
        let mut rebase: BTreeMap<String, (usize, usize, usize)> = BTreeMap::new();
        let mut requested_lens: Vec<usize> = Vec::with_capacity(dims.len());
        let mut any_empty = false;

        for (dim, selector) in dims.iter().zip(key.iter()) {
            let axis_len = self.axis_len(dim);
            let (local_start, local_len) = selector.resolve(axis_len);
            requested_lens.push(local_len);
            if local_len == 0 {
                any_empty = true;
            }

            if let Some(chunked) = self.chunked_axis(dim) {
                let chunk_idx = chunked
                    .chunks
                    .chunk_index_for_range_start(selector.start())
                    .unwrap_or(0);
                let chunk = &chunked.chunks.chunks[chunk_idx];
                debug_assert!(
                    local_len == 0 || local_start + local_len <= chunk.start_index + chunk.len,
                    "a single get_chunk call must address at most one chunk per chunked axis"
                );
                combined.merge(&chunk.fragment);
                rebase.insert(dim.clone(), (chunk.start_index, local_start, local_len));
            }
        }

        // P7: a selection that straddles no axis value performs no
        // sub-request and yields a zero-length result immediately.
        if any_empty {
            return Ok(RawArray::new(dims.to_vec(), requested_lens, Vec::new()));
        }

        let decoded = self.cache.retrieve_with_retry(
            &combined,
            self.client.as_ref(),
            self.decoder.as_ref(),
            &self.decoder_options,
            |array| array.clone(),
        )?;

        let mut payload = decoded.payload.clone();
        for dim in dims {
            payload = payload.with_expanded_dim(dim, dims.iter().position(|d| d == dim).unwrap());
        }
        payload = payload.transposed(dims);

        // Short-first-chunk fix-up (spec section 4.F): only ever applies to
        // chunk 0 of the time axis, and only when the returned extent is
        // short. All later chunks come back full.
        if self.options.fix_up_short_first_chunk {
            if let Some(&(chunk_start, _, _)) = rebase.get(self.time.axis.name.as_str()) {
                if chunk_start == 0 {
                    let time_pos = dims.iter().position(|d| d == &self.time.axis.name).unwrap();
                    let expected_len = self.time.chunks.chunks[0].len;
                    let actual_len = payload.shape[time_pos];
                    if actual_len < expected_len {
                        payload = pad_short_time_head(&payload, time_pos, expected_len);
                    }
                }
            }
        }

        let mut ranges = BTreeMap::new();
        for (dim, (chunk_start, local_start, local_len)) in &rebase {
            ranges.insert(dim.clone(), (*local_start - *chunk_start, *local_len));
        }
        for dim in dims {
            if !ranges.contains_key(dim) {
                let (start, len) = key[dims.iter().position(|d| d == dim).unwrap()]
                    .resolve(self.axis_len(dim));
                ranges.insert(dim.clone(), (start, len));
            }
        }

        Ok(payload.sliced(&ranges))
    }
}

/// Pads a short first time-chunk: allocates a destination shaped to
/// `expected_len` along `time_pos`, copies the returned payload into the
/// tail, and fills the head with `NaN` (spec section 4.F).
fn pad_short_time_head(payload: &RawArray, time_pos: usize, expected_len: usize) -> RawArray {
    let actual_len = payload.shape[time_pos];
    let missing = expected_len - actual_len;

    let mut new_shape = payload.shape.clone();
    new_shape[time_pos] = expected_len;

    let mut ranges: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for (i, dim) in payload.dims.iter().enumerate() {
        if i != time_pos {
            ranges.insert(dim.clone(), (0, payload.shape[i]));
        }
    }

    let total: usize = new_shape.iter().product();
    let mut data = vec![f64::NAN; total];

    // Copy the actual payload into the tail along `time_pos` by slicing the
    // source at its own full extent and writing it into the back of `data`
    // using the same row-major strides `RawArray` uses internally.
    let mut strides = vec![1usize; new_shape.len()];
    for i in (0..new_shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * new_shape[i + 1];
    }
    let mut src_strides = vec![1usize; payload.shape.len()];
    for i in (0..payload.shape.len().saturating_sub(1)).rev() {
        src_strides[i] = src_strides[i + 1] * payload.shape[i + 1];
    }

    let total_src: usize = payload.shape.iter().product();
    let mut idx = vec![0usize; payload.shape.len()];
    for flat in 0..total_src {
        let mut dest_idx = idx.clone();
        dest_idx[time_pos] += missing;
        let dest_flat: usize = dest_idx
            .iter()
            .zip(strides.iter())
            .map(|(&i, &s)| i * s)
            .sum();
        data[dest_flat] = payload.data[flat];

        for d in (0..idx.len()).rev() {
            idx[d] += 1;
            if idx[d] < payload.shape[d] {
                break;
            }
            idx[d] = 0;
        }
    }

    RawArray {
        dims: payload.dims.clone(),
        shape: new_shape,
        data,
    }
}

fn whole_time_fragment(selector: &TimeSelector) -> RequestFragment {
    let mut fragment = RequestFragment::new();
    match selector {
        TimeSelector::Ymd {
            years,
            months,
            days,
            times,
        } => {
            fragment.insert("year", Value::Array(years.iter().map(|&v| Value::from(v)).collect()));
            fragment.insert("month", Value::Array(months.iter().map(|&v| Value::from(v)).collect()));
            fragment.insert("day", Value::Array(days.iter().map(|&v| Value::from(v)).collect()));
            fragment.insert(
                "time",
                Value::Array(
                    times
                        .iter()
                        .map(|t| {
                            Value::String(format!(
                                "{:02}:{:02}",
                                t.minutes_since_midnight / 60,
                                t.minutes_since_midnight % 60
                            ))
                        })
                        .collect(),
                ),
            );
        }
        TimeSelector::DateRange { start, stop, times } => {
            fragment.insert("date", Value::String(format!("{start}/{stop}")));
            fragment.insert(
                "time",
                Value::Array(
                    times
                        .iter()
                        .map(|t| {
                            Value::String(format!(
                                "{:02}:{:02}",
                                t.minutes_since_midnight / 60,
                                t.minutes_since_midnight % 60
                            ))
                        })
                        .collect(),
                ),
            );
        }
    }
    fragment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScenarioFixture;

    #[test]
    fn scenario_1_day_split_produces_four_sub_requests() {
        let fixture = ScenarioFixture::temperature_day_split();
        let chunker = fixture.open_chunker().unwrap();
        assert_eq!(chunker.chunks()["time"], vec![2, 2, 2, 2]);
        assert_eq!(fixture.client.submitted_fragment_count(), 1); // only the probe so far
    }

    #[test]
    fn empty_range_performs_no_sub_request() {
        let fixture = ScenarioFixture::temperature_day_split();
        let chunker = fixture.open_chunker().unwrap();
        let before = fixture.client.submitted_fragment_count();

        let dims = chunker.full_dims().to_vec();
        let key: Vec<IndexSelector> = dims
            .iter()
            .map(|_| IndexSelector::Range {
                start: Some(100),
                stop: Some(100),
            })
            .collect();
        let result = chunker.get_chunk(&key).unwrap();
        assert_eq!(result.data.len(), 0);
        assert_eq!(fixture.client.submitted_fragment_count(), before);
    }

    #[test]
    fn scenario_4_pressure_level_chunk_sizes() {
        let fixture = ScenarioFixture::pressure_level_day_split();
        let chunker = fixture.open_chunker().unwrap();
        assert_eq!(chunker.chunks()["isobaricInhPa"], vec![2, 1]);
    }

    #[test]
    fn reopening_the_same_request_reuses_the_cached_probe() {
        let fixture = ScenarioFixture::temperature_day_split();
        let first = fixture.open_chunker().unwrap();
        let after_first_open = fixture.client.submitted_fragment_count();

        let second = fixture.open_chunker().unwrap();
        assert_eq!(fixture.client.submitted_fragment_count(), after_first_open);
        assert_eq!(second.probe_result().variable_name, first.probe_result().variable_name);
        assert_eq!(second.full_dims(), first.full_dims());
    }

    #[test]
    fn collapse_step_into_time_flag_reaches_subsequent_retrievals() {
        let fixture = ScenarioFixture::opendata_step_and_number_split();
        let chunker = fixture.open_chunker().unwrap();
        // This fixture's request declares its own `step` header axis, so the
        // probe must not ask the decoder to collapse it.
        assert!(!chunker.probe_result().collapse_step_into_time);
    }
}
