/// Group-wide cancellation shared by every supervised child.
///
/// Any task may trigger it; the transition is one-shot and never reverts.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    token: CancellationToken,
    triggered: Arc<AtomicBool>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Returns `true` only for the call that performed the
    /// unset -> set transition; later calls are no-ops.
    pub fn trigger(&self) -> bool {
        let first = !self.triggered.swap(true, Ordering::AcqRel);
        self.token.cancel();
        if first {
            tracing::debug!("group cancellation triggered");
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal has been triggered.
    #[allow(dead_code)]
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    /// A per-child scope: cancelled when the group is, or when the owner
    /// cancels it directly. Cancelling a scope never touches the group.
    pub fn scope(&self) -> CancellationToken {
        self.token.child_token()
    }
}
