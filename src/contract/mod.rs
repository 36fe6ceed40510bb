//! Contract type descriptors and their cache.

pub mod cache;
pub mod script;

use std::sync::Arc;

use async_trait::async_trait;

pub use cache::{DescriptorCache, DescriptorSource};
pub use script::{ContractScript, Entrypoint, Script, TypeDescriptor};

use crate::client::{Call, Client, ClientError};
use crate::micheline::{decode_value, OnError, Value};

#[async_trait]
impl DescriptorSource for Client {
    async fn load_descriptor(&self, address: &str) -> Result<TypeDescriptor, ClientError> {
        let script: ContractScript = self
            .get(format!("explorer/contract/{}/script?prim=1", address))
            .await?;
        Ok(TypeDescriptor::from_script(script)?)
    }
}

impl Client {
    /// Descriptor for the contract at `address`, fetched once and cached.
    pub async fn resolve_descriptor(&self, address: &str) -> Result<Arc<TypeDescriptor>, ClientError> {
        self.descriptors().resolve(address, self).await
    }

    /// Seeds the cache with a script the caller already has.
    pub async fn add_cached_script(&self, address: &str, script: ContractScript) -> Result<(), ClientError> {
        let descriptor = TypeDescriptor::from_script(script)?;
        self.descriptors().insert(address, descriptor).await;
        Ok(())
    }

    /// Decodes raw contract bytes of `address`'s storage.
    pub async fn decode_storage(
        &self,
        address: &str,
        buf: &[u8],
        on_error: OnError,
    ) -> Result<Value, ClientError> {
        let descriptor = self.resolve_descriptor(address).await?;
        Ok(decode_value(Some(descriptor.storage_type()), buf, on_error)?)
    }

    /// Fetches the script without touching the cache.
    pub async fn get_contract_script(&self, address: &str) -> Result<ContractScript, ClientError> {
        self.call_async(Call::get(format!("explorer/contract/{}/script?prim=1", address)))
            .wait()
            .await
            .map(|r| r.value)
    }
}
