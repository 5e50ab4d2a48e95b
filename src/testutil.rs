//! Shared test environment: a provider wired to a registry, a key
//! serializer, and an in-memory row store, assembled the way callers do.

use std::sync::Arc;

use crate::codec::Approach;
use crate::crypto::SecretKey;
use crate::error::Result;
use crate::id::IdSerializer;
use crate::pack::{pack, IdRetriever, Item, PackOptions, PackParams, UnpackParams};
use crate::provider::{
    EnvelopeKeyProvider, EnvelopeKeyProviderInfo, MasterKeyProvider, ProviderRegistry,
};
use crate::store::MemoryStore;
use crate::table_key::{TableKey, TableKeyCreator, TableKeySerializer};

pub(crate) struct TestEnv {
    pub registry: ProviderRegistry,
    pub provider: Arc<dyn EnvelopeKeyProvider>,
    pub serializer: Arc<TableKeySerializer>,
    pub store: MemoryStore<TableKey>,
}

impl TestEnv {
    pub fn new(provider_id: &str) -> Self {
        let registry = ProviderRegistry::new();
        let provider: Arc<dyn EnvelopeKeyProvider> = Arc::new(
            MasterKeyProvider::with_finder(
                EnvelopeKeyProviderInfo::new(provider_id, SecretKey::generate()),
                registry.finder(),
            )
            .unwrap(),
        );
        registry.register(provider.clone());

        Self {
            registry,
            provider,
            serializer: Arc::new(TableKeySerializer::new()),
            store: MemoryStore::new(),
        }
    }

    /// Register an additional provider on the same registry
    pub fn add_provider(&self, provider_id: &str) -> Arc<dyn EnvelopeKeyProvider> {
        let provider: Arc<dyn EnvelopeKeyProvider> = Arc::new(
            MasterKeyProvider::with_finder(
                EnvelopeKeyProviderInfo::new(provider_id, SecretKey::generate()),
                self.registry.finder(),
            )
            .unwrap(),
        );
        self.registry.register(provider.clone());
        provider
    }

    pub fn pack_params(&self) -> PackParams<TableKey> {
        PackParams::new()
            .with_provider(self.provider.clone())
            .with_creator(Arc::new(TableKeyCreator::default()))
            .with_packer(self.serializer.clone())
            .with_approach(Approach::CompactV1)
    }

    pub fn id_retriever(&self) -> IdRetriever<TableKey> {
        let serializer = Arc::clone(&self.serializer);
        Arc::new(move |_name| Ok(serializer.clone() as Arc<dyn IdSerializer<TableKey>>))
    }

    pub fn unpack_params(&self) -> UnpackParams<TableKey> {
        UnpackParams::new()
            .with_data_loader(self.store.loader())
            .with_id_retriever(self.id_retriever())
            .with_provider(self.provider.clone())
    }

    /// Pack an item and persist its rows in the in-memory store
    pub fn pack_and_store(&self, item: &Item<TableKey>) -> Result<Vec<u8>> {
        let (data, rows) = pack(item, &self.pack_params(), PackOptions::new())?;
        self.store.put_rows(rows);
        Ok(data)
    }
}
