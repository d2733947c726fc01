//! The transport-client contract (spec section 6). The actual clients that
//! speak to CDS API, the open-data server, or Polytope are external
//! collaborators -- out of scope here (spec section 1) -- so this module
//! only defines the trait the retrieval cache dispatches through, modeled
//! on `re_data_loader`'s `DataLoader` trait: the core never implements it,
//! only calls it.

use std::path::Path;

use crate::plan::RequestFragment;

/// An opaque handle returned by [`TransportClient::submit`]. Transport
/// implementations attach whatever they need (a job id, a poll token) via
/// their own concrete handle type behind this trait object.
pub trait SubmittedRequest: Send + Sync {
    /// The stable filename the archive (or our own MD5-derived scheme)
    /// assigns to this sub-request's payload.
    fn filename(&self) -> String;
}

/// `submit(request) -> handle`, `filename(handle) -> string`,
/// `download(handle, target_path) -> target_path` from spec section 6.
pub trait TransportClient: Send + Sync {
    type Handle: SubmittedRequest;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Submits one sub-request fragment, returning an opaque handle.
    fn submit(&self, fragment: &RequestFragment) -> Result<Self::Handle, Self::Error>;

    /// Downloads the payload for `handle` to `target_path`. A `None`
    /// target means the client is free to choose the destination; this
    /// crate always passes `Some` since the retrieval cache owns placement.
    fn download(&self, handle: &Self::Handle, target_path: Option<&Path>) -> Result<(), Self::Error>;

    /// Whether the last operation's error is worth a bounded local retry
    /// (spec section 7, kind 3) as opposed to a configuration or protocol
    /// error that will never succeed on retry. Transport implementations
    /// that can't distinguish may conservatively return `true`.
    fn is_transient(&self, error: &Self::Error) -> bool {
        let _ = error;
        true
    }
}

/// The three recognized client/chunker tags from spec section 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    CdsApi,
    EcmwfOpenData,
    Polytope,
}

impl ClientKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "cdsapi" => Some(Self::CdsApi),
            "ecmwf-opendata" => Some(Self::EcmwfOpenData),
            "polytope" => Some(Self::Polytope),
            _ => None,
        }
    }
}
