use crate::connection::{CacheManager, CacheStats, SessionInfo, SessionReference, SessionRequest};
use crate::core::{HandleClass, HandleKind, Result};
use crate::native::RemoteDriver;
use crate::registry::HandleId;
use crate::transaction::TransactionObserver;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Connection cache shared between tasks
///
/// Every call takes one global lock around the underlying [`CacheManager`],
/// so operations on different sessions are serialized as well.
///
/// # Examples
///
/// ```
/// use dbbridge::{BridgeClient, SessionRequest};
/// use dbbridge::native::LoopbackDriver;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = BridgeClient::new(LoopbackDriver::new().with_account("scott", "tiger"));
///
/// let sref = client
///     .acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(1))
///     .await?;
/// client.end_transaction(&sref, true, false).await?;
/// # Ok(())
/// # }
/// ```
pub struct BridgeClient<D: RemoteDriver> {
    cache: Arc<Mutex<CacheManager<D>>>,
}

impl<D: RemoteDriver> Clone for BridgeClient<D> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<D: RemoteDriver> BridgeClient<D> {
    pub fn new(driver: D) -> Self {
        Self::from_cache(CacheManager::new(driver))
    }

    pub fn from_cache(cache: CacheManager<D>) -> Self {
        Self {
            cache: Arc::new(Mutex::new(cache)),
        }
    }

    pub async fn acquire_session(&self, request: &SessionRequest) -> Result<SessionReference> {
        self.cache.lock().await.acquire_session(request)
    }

    pub async fn begin_or_advance(&self, sref: &SessionReference, level: u32) -> Result<()> {
        self.cache.lock().await.begin_or_advance(sref, level)
    }

    pub async fn end_subtransaction(&self, sref: &SessionReference, nest_level: u32, commit: bool) -> Result<()> {
        self.cache.lock().await.end_subtransaction(sref, nest_level, commit)
    }

    pub async fn end_transaction(&self, sref: &SessionReference, commit: bool, suppress_errors: bool) -> Result<()> {
        self.cache.lock().await.end_transaction(sref, commit, suppress_errors)
    }

    /// Forward a client subtransaction event to every registered session
    pub async fn subtransaction_end(&self, nest_level: u32, commit: bool) -> Result<()> {
        self.cache.lock().await.on_subtransaction_end(nest_level, commit)
    }

    /// Forward a client top-level commit or abort to every registered session
    pub async fn top_level_end(&self, commit: bool) -> Result<()> {
        self.cache.lock().await.on_top_level_end(commit)
    }

    pub async fn allocate_handle(&self, sref: &SessionReference, kind: HandleKind) -> Result<HandleId> {
        self.cache
            .lock()
            .await
            .allocate_handle(sref, kind, kind.default_class())
    }

    pub async fn allocate_descriptor(&self, sref: &SessionReference, kind: HandleKind) -> Result<HandleId> {
        self.cache
            .lock()
            .await
            .allocate_handle(sref, kind, HandleClass::Descriptor)
    }

    pub async fn free_handle(&self, sref: &SessionReference, id: HandleId) -> Result<()> {
        self.cache.lock().await.free_handle(sref, id)
    }

    pub async fn close_session(&self, sref: SessionReference, disconnect: bool) -> Result<()> {
        self.cache.lock().await.close_session(sref, disconnect)
    }

    pub async fn xact_level(&self, sref: &SessionReference) -> Result<u32> {
        self.cache.lock().await.xact_level(sref)
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.cache.lock().await.sessions()
    }

    pub async fn shutdown(&self) {
        self.cache.lock().await.shutdown_all();
    }

    /// Run `f` with exclusive access to the cache
    pub async fn with_cache<R>(&self, f: impl FnOnce(&mut CacheManager<D>) -> R) -> R {
        let mut cache = self.cache.lock().await;
        f(&mut cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::LoopbackDriver;

    #[tokio::test]
    async fn test_clones_share_one_cache() {
        let client = BridgeClient::new(LoopbackDriver::new().with_account("scott", "tiger"));
        let other = client.clone();

        let first = client
            .acquire_session(&SessionRequest::new("orcl", "scott", "tiger"))
            .await
            .unwrap();
        let second = other
            .acquire_session(&SessionRequest::new("orcl", "scott", "tiger"))
            .await
            .unwrap();

        assert_eq!(first.session_id(), second.session_id());
        assert_eq!(client.stats().await.sessions, 1);
    }

    #[tokio::test]
    async fn test_shutdown_empties_cache() {
        let client = BridgeClient::new(LoopbackDriver::new().with_account("scott", "tiger"));
        client
            .acquire_session(&SessionRequest::new("orcl", "scott", "tiger").nest_level(1))
            .await
            .unwrap();

        client.shutdown().await;
        assert_eq!(client.stats().await, CacheStats::default());
        assert_eq!(client.with_cache(|cache| cache.driver().open_session_count()).await, 0);
    }
}
