//! In-memory transport/decoder test doubles plus a couple of named request
//! fixtures matching the scenarios in spec section 8. Gated behind the
//! `test-support` feature so integration tests under `tests/` can use them
//! without pulling this scaffolding into normal library consumers.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::axis::Axis;
use crate::cache::{CacheOptions, RetrievalCache};
use crate::chunker::{ChunkerOptions, RequestChunker};
use crate::decoder::{DecodedArray, Decoder, DecoderOptions};
use crate::error::ChunkerError;
use crate::plan::RequestFragment;
use crate::policy::ChunkingPolicy;
use crate::raw_array::RawArray;
use crate::request::{HeaderAxisSpec, HeaderRole, Request, TimeOfDay, TimeSelector};
use crate::transport::{SubmittedRequest, TransportClient};
use crate::variable::DType;

#[derive(Debug, Clone)]
pub struct FakeHandle {
    filename: String,
}

impl SubmittedRequest for FakeHandle {
    fn filename(&self) -> String {
        self.filename.clone()
    }
}

/// Records every fragment it's asked to submit, and hands back a
/// deterministic filename. `download` never touches the filesystem content
/// meaningfully -- [`FakeDecoder`] ignores it and always returns the same
/// canned payload, which is enough for tests that only exercise planning and
/// probing, not real chunk content.
pub struct FakeClient {
    submissions: Mutex<Vec<RequestFragment>>,
    submit_count: AtomicUsize,
    download_count: AtomicUsize,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
            submit_count: AtomicUsize::new(0),
            download_count: AtomicUsize::new(0),
        }
    }

    pub fn submitted_fragment_count(&self) -> usize {
        self.submit_count.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.download_count.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<RequestFragment> {
        self.submissions.lock().unwrap().clone()
    }
}

impl Default for FakeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportClient for FakeClient {
    type Handle = FakeHandle;
    type Error = Infallible;

    fn submit(&self, fragment: &RequestFragment) -> Result<Self::Handle, Self::Error> {
        self.submissions.lock().unwrap().push(fragment.clone());
        self.submit_count.fetch_add(1, Ordering::SeqCst);
        Ok(FakeHandle {
            filename: format!("{}.bin", crate::cache::canonical_md5_hex(fragment)),
        })
    }

    fn download(&self, _handle: &Self::Handle, target_path: Option<&Path>) -> Result<(), Self::Error> {
        self.download_count.fetch_add(1, Ordering::SeqCst);
        if let Some(path) = target_path {
            std::fs::write(path, b"fake-payload").expect("test tempdir is writable");
        }
        Ok(())
    }
}

/// A transport client that fails its first `fail_times` downloads (with a
/// caller-chosen transient classification) before succeeding, for exercising
/// the retry loop (P nothing-specific, spec section 4.C "Retries") and the
/// abort-cleanup path (P6 Atomicity).
#[derive(Debug, thiserror::Error)]
#[error("flaky transport failure (transient={transient})")]
pub struct FlakyError {
    pub transient: bool,
}

pub struct FlakyClient {
    fail_remaining: AtomicUsize,
    transient: bool,
    download_count: AtomicUsize,
}

impl FlakyClient {
    pub fn new(fail_times: usize, transient: bool) -> Self {
        Self {
            fail_remaining: AtomicUsize::new(fail_times),
            transient,
            download_count: AtomicUsize::new(0),
        }
    }

    pub fn download_count(&self) -> usize {
        self.download_count.load(Ordering::SeqCst)
    }
}

impl TransportClient for FlakyClient {
    type Handle = FakeHandle;
    type Error = FlakyError;

    fn submit(&self, fragment: &RequestFragment) -> Result<Self::Handle, Self::Error> {
        Ok(FakeHandle {
            filename: format!("{}.bin", crate::cache::canonical_md5_hex(fragment)),
        })
    }

    fn download(&self, _handle: &Self::Handle, target_path: Option<&Path>) -> Result<(), Self::Error> {
        self.download_count.fetch_add(1, Ordering::SeqCst);
        let mut remaining = self.fail_remaining.load(Ordering::SeqCst);
        loop {
            if remaining == 0 {
                break;
            }
            match self.fail_remaining.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Err(FlakyError { transient: self.transient }),
                Err(actual) => remaining = actual,
            }
        }
        if let Some(path) = target_path {
            std::fs::write(path, b"fake-payload").expect("test tempdir is writable");
        }
        Ok(())
    }

    fn is_transient(&self, error: &Self::Error) -> bool {
        error.transient
    }
}

/// Ignores the downloaded bytes entirely and always reports the same
/// single-variable payload over a `latitude`/`longitude` grid -- enough for
/// the metadata probe to discover two server-only axes regardless of which
/// sub-request fragment produced the file.
pub struct FakeDecoder;

impl Decoder for FakeDecoder {
    type Error = Infallible;

    fn open(&self, _path: &Path, _options: &DecoderOptions) -> Result<DecodedArray, Self::Error> {
        let mut coords = BTreeMap::new();
        coords.insert("latitude".to_string(), Axis::new_f64("latitude", vec![90.0, 89.75]));
        coords.insert(
            "longitude".to_string(),
            Axis::new_f64("longitude", vec![0.0, 0.25, 0.5]),
        );
        Ok(DecodedArray {
            variable_name: "t2m".to_string(),
            dims: vec!["time".to_string(), "latitude".to_string(), "longitude".to_string()],
            dtype: DType::Float32,
            dataset_attrs: BTreeMap::new(),
            var_attrs: BTreeMap::new(),
            coords,
            payload: RawArray::filled(
                vec!["time".to_string(), "latitude".to_string(), "longitude".to_string()],
                vec![1, 2, 3],
                0.0,
            ),
        })
    }
}

/// Like [`FakeDecoder`], but also reports one extra server-only axis ahead
/// of `latitude`/`longitude` -- for scenario 3 (spec section 8), where
/// `product_type: [ensemble_members]` makes the archive hand back a
/// `number` axis the request never declared, and for the seasonal scenario
/// 5, where every product is ensemble regardless of what the request asked
/// for.
pub struct ExtraAxisFakeDecoder {
    axis_name: String,
    axis: Axis,
}

impl ExtraAxisFakeDecoder {
    pub fn new(axis_name: impl Into<String>, axis: Axis) -> Self {
        Self {
            axis_name: axis_name.into(),
            axis,
        }
    }
}

impl Decoder for ExtraAxisFakeDecoder {
    type Error = Infallible;

    fn open(&self, _path: &Path, _options: &DecoderOptions) -> Result<DecodedArray, Self::Error> {
        let mut coords = BTreeMap::new();
        coords.insert(self.axis_name.clone(), self.axis.clone());
        coords.insert("latitude".to_string(), Axis::new_f64("latitude", vec![90.0, 89.75]));
        coords.insert(
            "longitude".to_string(),
            Axis::new_f64("longitude", vec![0.0, 0.25, 0.5]),
        );
        let dims = vec![
            "time".to_string(),
            self.axis_name.clone(),
            "latitude".to_string(),
            "longitude".to_string(),
        ];
        Ok(DecodedArray {
            variable_name: "t2m".to_string(),
            dims: dims.clone(),
            dtype: DType::Float32,
            dataset_attrs: BTreeMap::new(),
            var_attrs: BTreeMap::new(),
            coords,
            payload: RawArray::filled(dims, vec![1, self.axis.len(), 2, 3], 0.0),
        })
    }
}

/// A fully wired chunker fixture for one named spec-section-8 scenario:
/// real [`RequestChunker`] plumbing, fake transport underneath, and a
/// scratch cache directory that's cleaned up when the fixture drops. Most
/// scenarios only ever see server-discovered `latitude`/`longitude`, so
/// [`FakeDecoder`] is the default decoder; scenarios that rely on an extra
/// discovered axis (ensemble `number`) plug in [`ExtraAxisFakeDecoder`]
/// instead via [`Self::with_decoder`].
pub struct ScenarioFixture<D: Decoder = FakeDecoder> {
    pub request: Request,
    pub policy: ChunkingPolicy,
    pub cache: Arc<RetrievalCache>,
    pub client: Arc<FakeClient>,
    pub decoder: Arc<D>,
    pub decoder_options: DecoderOptions,
    pub options: ChunkerOptions,
    _tempdir: tempfile::TempDir,
}

impl<D: Decoder> ScenarioFixture<D> {
    fn with_decoder(request: Request, policy: ChunkingPolicy, decoder: D) -> Self {
        let tempdir = tempfile::tempdir().expect("failed to create scratch cache dir");
        let cache = RetrievalCache::new(CacheOptions {
            cache_file: true,
            cache_folder: tempdir.path().to_path_buf(),
            max_attempts: 2,
        })
        .expect("failed to initialize scratch cache");
        Self {
            request,
            policy,
            cache: Arc::new(cache),
            client: Arc::new(FakeClient::new()),
            decoder: Arc::new(decoder),
            decoder_options: DecoderOptions::default(),
            options: ChunkerOptions::default(),
            _tempdir: tempdir,
        }
    }

    pub fn open_chunker(&self) -> Result<RequestChunker<FakeClient, D>, ChunkerError> {
        RequestChunker::open(
            self.request.clone(),
            &self.policy,
            self.options,
            Arc::clone(&self.cache),
            Arc::clone(&self.client),
            Arc::clone(&self.decoder),
            self.decoder_options.clone(),
        )
    }
}

impl ScenarioFixture<FakeDecoder> {
    fn new(request: Request, policy: ChunkingPolicy) -> Self {
        Self::with_decoder(request, policy, FakeDecoder)
    }

    /// Scenario 1 (spec section 8): year x month x day x time, split by day
    /// into four chunks of two rows each.
    pub fn temperature_day_split() -> Self {
        let request = Request {
            time: TimeSelector::Ymd {
                years: vec![2022],
                months: vec![1, 7],
                days: vec![1, 16],
                times: vec![TimeOfDay::from_hm(0, 0), TimeOfDay::from_hm(12, 0)],
            },
            header: vec![],
            variable: vec!["2m_temperature".to_string()],
            extra: BTreeMap::new(),
        };
        let policy = ChunkingPolicy::new().with_split("day", 1);
        Self::new(request, policy)
    }

    /// Scenario 2 (spec section 8): a date-range request, day-split two ways.
    pub fn date_range_day_split(chunk_days: usize) -> Self {
        use chrono::NaiveDate;
        let request = Request {
            time: TimeSelector::DateRange {
                start: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
                stop: NaiveDate::from_ymd_opt(2022, 1, 5).unwrap(),
                times: vec![TimeOfDay::from_hm(0, 0), TimeOfDay::from_hm(12, 0)],
            },
            header: vec![],
            variable: vec!["2m_temperature".to_string()],
            extra: BTreeMap::new(),
        };
        let policy = ChunkingPolicy::new().with_split("day", chunk_days);
        Self::new(request, policy)
    }

    /// Scenario 4 (spec section 8): three pressure levels split two-and-one.
    pub fn pressure_level_day_split() -> Self {
        let request = Request {
            time: TimeSelector::Ymd {
                years: vec![2022],
                months: vec![1],
                days: vec![1],
                times: vec![TimeOfDay::from_hm(0, 0)],
            },
            header: vec![HeaderAxisSpec {
                role: HeaderRole::PressureLevel,
                source_key: "pressure_level".to_string(),
                values: vec![1000, 700, 500],
            }],
            variable: vec!["temperature".to_string()],
            extra: BTreeMap::new(),
        };
        let policy = ChunkingPolicy::new().with_split("isobaricInhPa", 2);
        Self::new(request, policy)
    }

    /// Scenario 6 (spec section 8): open-data-style request declaring both
    /// `step` and `number` as header dims (neither discovered -- both are
    /// already present, exactly as `client_ecmwf_opendata.py`'s requests
    /// carry them explicitly), split one-each by policy.
    pub fn opendata_step_and_number_split() -> Self {
        let request = Request {
            time: TimeSelector::Ymd {
                years: vec![2024],
                months: vec![1],
                days: vec![1],
                times: vec![TimeOfDay::from_hm(0, 0), TimeOfDay::from_hm(12, 0)],
            },
            header: vec![
                HeaderAxisSpec {
                    role: HeaderRole::Step,
                    source_key: "step".to_string(),
                    values: vec![12, 24, 48],
                },
                HeaderAxisSpec {
                    role: HeaderRole::Number,
                    source_key: "number".to_string(),
                    values: vec![1, 2],
                },
            ],
            variable: vec!["msl".to_string()],
            extra: BTreeMap::new(),
        };
        let policy = ChunkingPolicy::new().with_split("step", 1).with_split("number", 1);
        Self::new(request, policy)
    }
}

impl ScenarioFixture<ExtraAxisFakeDecoder> {
    /// Scenario 3 (spec section 8): `product_type: [ensemble_members]`
    /// never appears as a request dim, so `number` must come back as a
    /// server-discovered axis from the probe alone.
    pub fn ensemble_members() -> Self {
        let request = Request {
            time: TimeSelector::Ymd {
                years: vec![2022],
                months: vec![1, 7],
                days: vec![1, 16],
                times: vec![TimeOfDay::from_hm(0, 0), TimeOfDay::from_hm(12, 0)],
            },
            header: vec![],
            variable: vec!["2m_temperature".to_string()],
            extra: BTreeMap::new(),
        };
        let policy = ChunkingPolicy::new().with_split("day", 1);
        let decoder = ExtraAxisFakeDecoder::new("number", Axis::new_i64("number", crate::axis::AxisDType::Int64, (0..10).collect()));
        Self::with_decoder(request, policy, decoder)
    }

    /// Scenario 5 (spec section 8): `leadtime_hour` is declared (mapped to
    /// the `step` role) and split by one; the seasonal product is always
    /// ensemble, so `number` still comes back from the probe alone.
    pub fn seasonal_leadtime_split() -> Self {
        let request = Request {
            time: TimeSelector::Ymd {
                years: vec![2022, 2023],
                months: vec![8, 9],
                days: vec![1],
                times: vec![TimeOfDay::from_hm(0, 0)],
            },
            header: vec![HeaderAxisSpec {
                role: HeaderRole::Step,
                source_key: "leadtime_hour".to_string(),
                values: vec![36, 72],
            }],
            variable: vec!["2m_temperature".to_string()],
            extra: BTreeMap::new(),
        };
        let policy = ChunkingPolicy::new().with_split("day", 1).with_split("leadtime_hour", 1);
        let decoder = ExtraAxisFakeDecoder::new("number", Axis::new_i64("number", crate::axis::AxisDType::Int64, (0..25).collect()));
        Self::with_decoder(request, policy, decoder)
    }
}
