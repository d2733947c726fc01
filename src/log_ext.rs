//! Log-and-swallow helpers for cache-hygiene paths.
//!
//! Spec section 7 calls cache hygiene (deleting a stale temp file, removing
//! a side-car index) its own error kind that must never fail a user call.
//! These helpers are that kind made concrete: log at warn level, then move on.

pub trait ResultExt<T, E> {
    /// Logs a warning if `self` is an `Err` and discards the error.
    fn ok_or_warn(self, context: &str) -> Option<T>
    where
        E: std::fmt::Display;
}

impl<T, E> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn ok_or_warn(self, context: &str) -> Option<T>
    where
        E: std::fmt::Display,
    {
        match self {
            Ok(value) => Some(value),
            Err(err) => {
                log::warn!("{context}: {err}");
                None
            }
        }
    }
}
