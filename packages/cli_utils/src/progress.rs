//! Rendering-agnostic progress reporting.
//!
//! The ingest pipeline only talks to [`ProgressCallback`]; the binary hands
//! it `indicatif` bars and tests hand it [`NullProgress`].

/// Receives progress updates from a running ingest.
///
/// One instance may be shared by several dates processed at once, hence
/// `Send + Sync`.
pub trait ProgressCallback: Send + Sync {
    /// Announces how many units of work to expect.
    fn set_total(&self, total: u64);

    /// Marks `delta` more units as done.
    fn inc(&self, delta: u64);

    /// Replaces the status text.
    fn set_message(&self, msg: &str);

    /// Stops the indicator and leaves `msg` behind.
    fn finish(&self, msg: &str);

    /// Stops the indicator and removes it.
    fn finish_and_clear(&self);
}

/// Discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: &str) {}
    fn finish(&self, _msg: &str) {}
    fn finish_and_clear(&self) {}
}
