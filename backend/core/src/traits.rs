use anyhow::Result;
use async_trait::async_trait;

use crate::types::SignalSet;

/// An external collector that yields one snapshot of signals per call.
///
/// Implementations are responsible for their own request timeouts; callers
/// wrap `fetch` in the retry executor.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Stable name, also used as the cache namespace.
    fn name(&self) -> &str;

    /// Fetch a fresh snapshot.
    async fn fetch(&self) -> Result<SignalSet>;
}
