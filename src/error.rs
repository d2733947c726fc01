//! Error kinds for the chunker, grouped the way spec section 7 groups them:
//! configuration mistakes never retry, probe failures are per-variable,
//! transient retrieval failures get a bounded local retry, and cache-hygiene
//! failures never reach the caller at all (see [`crate::log_ext`]).

/// Everything that can go wrong while planning, probing, or resolving chunks.
#[derive(thiserror::Error, Debug)]
pub enum ChunkerError {
    /// The request or chunking policy was malformed; caught before any
    /// transport call is made.
    #[error("invalid request or policy: {reason}")]
    Configuration { reason: String },

    /// The metadata probe's sample sub-request failed for `variable`. Other
    /// variables may still succeed; this is only raised to the caller when
    /// every variable's probe has failed.
    #[error("metadata probe failed for variable {variable:?}: {source}")]
    Probe {
        variable: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A transport, I/O, or decode failure. `retryable` records whether the
    /// transport client classified this as worth a bounded local retry
    /// (spec section 4.C/7, kind 3); decode-stage failures are never
    /// retryable, since re-parsing the same bytes can't succeed differently.
    #[error("retrieval of {fragment_desc} failed after {attempts} attempt(s): {source}")]
    Transient {
        fragment_desc: String,
        attempts: u32,
        retryable: bool,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type ChunkerResult<T> = Result<T, ChunkerError>;

impl ChunkerError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}
