//! Suspension used by the join loop between actions and during backoff.

use std::future::Future;
use std::time::Duration;

/// Waits for a duration. The join loop races every pause against its stop
/// token, so implementations need not be cancellation-aware.
pub trait Pacer: Send + Sync + 'static {
    fn pause(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Real wall-clock pacing on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPacer;

impl Pacer for TokioPacer {
    fn pause(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
