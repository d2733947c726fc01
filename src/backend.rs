//! Backend entrypoint (spec section 4.H, component H): `open_dataset` opens
//! one [`RequestChunker`] per requested variable, probes each, and assembles
//! the virtual dataset. A single variable's probe failure is tolerated; the
//! call only fails once every variable has failed (spec section 7, kind 2).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::cache::{CacheOptions, RetrievalCache};
use crate::chunker::{ChunkerOptions, RequestChunker};
use crate::decoder::{Decoder, DecoderOptions};
use crate::error::ChunkerError;
use crate::lazy_array::LazyArray;
use crate::policy::ChunkingPolicy;
use crate::request::Request;
use crate::transport::{ClientKind, TransportClient};
use crate::variable::VirtualVariable;

/// `open_dataset`'s `backend_kwargs` (spec section 6): the client/chunker
/// tags, passthrough cache/decoder options, the chunking policy, and the
/// variables to drop before the probe ever runs.
#[derive(Clone)]
pub struct BackendOptions {
    pub client: String,
    pub chunker: String,
    pub drop_variables: Vec<String>,
    pub cache_options: CacheOptions,
    pub chunker_options: ChunkerOptions,
    pub decoder_options: DecoderOptions,
    pub policy: ChunkingPolicy,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            client: "cdsapi".to_string(),
            chunker: "request-chunker".to_string(),
            drop_variables: Vec::new(),
            cache_options: CacheOptions::default(),
            chunker_options: ChunkerOptions::default(),
            decoder_options: DecoderOptions::default(),
            policy: ChunkingPolicy::default(),
        }
    }
}

/// The assembled virtual dataset: one [`VirtualVariable`] per surviving
/// requested variable, keyed by its decoder-assigned name, plus the
/// dataset-level attrs the probe discovered.
pub struct VirtualDataset<C: TransportClient, D: Decoder> {
    pub variables: BTreeMap<String, VirtualVariable<C, D>>,
    pub dataset_attrs: BTreeMap<String, Value>,
}

/// `open_dataset(request, client, decoder, options)` (spec section 4.H): the
/// one function the out-of-scope registration layer calls into.
pub fn open_dataset<C: TransportClient, D: Decoder>(
    request: Request,
    client: Arc<C>,
    decoder: Arc<D>,
    options: BackendOptions,
) -> Result<VirtualDataset<C, D>, ChunkerError> {
    if ClientKind::parse(&options.client).is_none() {
        return Err(ChunkerError::configuration(format!(
            "unrecognized client tag {:?}; expected one of cdsapi, ecmwf-opendata, polytope",
            options.client
        )));
    }
    if options.chunker != "request-chunker" {
        return Err(ChunkerError::configuration(format!(
            "unrecognized chunker tag {:?}; this backend only implements \"request-chunker\"",
            options.chunker
        )));
    }

    let cache = Arc::new(RetrievalCache::new(options.cache_options.clone()).map_err(|e| {
        ChunkerError::configuration(format!("failed to initialize retrieval cache: {e}"))
    })?);

    let mut variables = BTreeMap::new();
    let mut last_failure: Option<ChunkerError> = None;
    let mut dataset_attrs = BTreeMap::new();

    for label in &request.variable {
        if options.drop_variables.iter().any(|d| d == label) {
            continue;
        }

        let per_variable_request = request.with_single_variable(label);
        let opened = RequestChunker::open(
            per_variable_request,
            &options.policy,
            options.chunker_options,
            Arc::clone(&cache),
            Arc::clone(&client),
            Arc::clone(&decoder),
            options.decoder_options.clone(),
        );

        let chunker = match opened {
            Ok(chunker) => chunker,
            Err(err) => {
                last_failure = Some(err);
                continue;
            }
        };

        let probe = chunker.probe_result();
        // `drop_variables` matches both the user's request label and the
        // decoder-assigned name (spec section 4.H).
        if options.drop_variables.iter().any(|d| d == &probe.variable_name) {
            continue;
        }

        let variable_name = probe.variable_name.clone();
        let dtype = probe.dtype;
        let var_attrs = probe.var_attrs.clone();
        dataset_attrs = probe.dataset_attrs.clone();
        let dims = chunker.full_dims().to_vec();
        let shape = chunker.shape();
        let preferred_chunks: BTreeMap<String, usize> = chunker
            .chunks()
            .into_iter()
            .map(|(axis, sizes)| (axis, sizes.first().copied().unwrap_or(0)))
            .collect();

        variables.insert(
            variable_name.clone(),
            VirtualVariable {
                name: variable_name,
                dims,
                shape,
                dtype,
                attrs: var_attrs,
                preferred_chunks,
                array: LazyArray::new(Arc::new(chunker)),
            },
        );
    }

    if variables.is_empty() {
        return Err(last_failure.unwrap_or_else(|| {
            ChunkerError::configuration("no variables remained after drop_variables filtering")
        }));
    }

    Ok(VirtualDataset {
        variables,
        dataset_attrs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScenarioFixture;

    #[test]
    fn unrecognized_client_tag_is_a_configuration_error() {
        let fixture = ScenarioFixture::temperature_day_split();
        let options = BackendOptions {
            client: "not-a-real-client".to_string(),
            ..BackendOptions::default()
        };
        let err = open_dataset(
            fixture.request.clone(),
            Arc::clone(&fixture.client),
            Arc::clone(&fixture.decoder),
            options,
        )
        .unwrap_err();
        assert!(matches!(err, ChunkerError::Configuration { .. }));
    }

    #[test]
    fn opens_one_variable_successfully() {
        let fixture = ScenarioFixture::temperature_day_split();
        let options = BackendOptions {
            cache_options: fixture.cache.options().clone(),
            policy: fixture.policy.clone(),
            ..BackendOptions::default()
        };
        let dataset = open_dataset(
            fixture.request.clone(),
            Arc::clone(&fixture.client),
            Arc::clone(&fixture.decoder),
            options,
        )
        .unwrap();
        assert_eq!(dataset.variables.len(), 1);
    }
}
