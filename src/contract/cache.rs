use std::sync::Arc;

use async_trait::async_trait;
use moka::future::Cache;

use super::script::TypeDescriptor;
use crate::client::ClientError;

/// Where descriptors come from on a cache miss.
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    async fn load_descriptor(&self, address: &str) -> Result<TypeDescriptor, ClientError>;
}

/// Bounded cache of contract type descriptors keyed by address.
///
/// Eviction is size based (TinyLFU). Concurrent misses for the same address
/// share one load. Entries are never refreshed; a contract whose storage
/// layout changes keeps its old descriptor until it is evicted or removed
/// with [`DescriptorCache::invalidate`].
#[derive(Clone)]
pub struct DescriptorCache {
    cache: Cache<String, Arc<TypeDescriptor>>,
}

impl DescriptorCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(capacity).build(),
        }
    }

    /// Returns the cached descriptor for `address`, loading it from `source` on a miss.
    pub async fn resolve(
        &self,
        address: &str,
        source: &dyn DescriptorSource,
    ) -> Result<Arc<TypeDescriptor>, ClientError> {
        self.cache
            .try_get_with(address.to_string(), async {
                tracing::trace!("loading contract {}", address);
                source.load_descriptor(address).await.map(Arc::new)
            })
            .await
            .map_err(|err| ClientError::Descriptor {
                address: address.to_string(),
                source: err,
            })
    }

    pub async fn get(&self, address: &str) -> Option<Arc<TypeDescriptor>> {
        self.cache.get(address).await
    }

    /// Adds a descriptor the caller already holds.
    pub async fn insert(&self, address: impl Into<String>, descriptor: TypeDescriptor) {
        self.cache.insert(address.into(), Arc::new(descriptor)).await;
    }

    pub async fn invalidate(&self, address: &str) {
        self.cache.invalidate(address).await;
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl std::fmt::Debug for DescriptorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}
