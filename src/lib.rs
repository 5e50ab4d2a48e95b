//! # rowpack
//!
//! Envelope-encrypted item packing for key-addressed durable stores.
//!
//! An [`Item`] is a caller-defined key plus a map of named attribute values
//! of heterogeneous types. [`pack`] turns it into an opaque envelope and a
//! set of size-bounded storage rows:
//!
//! - every attribute is serialized and sealed under a fresh per-call
//!   **data encryption key** (DEK), split into chunks when oversized, and
//!   bin-packed into rows addressed by the item key and, when needed, by
//!   freshly minted overflow keys;
//! - the DEK itself travels inside the envelope, wrapped under a
//!   provider-identified AES-256-GCM master key, so any party that can
//!   reach the right [`EnvelopeKeyProvider`] — directly or through a
//!   finder — can reopen the item.
//!
//! [`unpack`] recovers the key and reassembles the attribute ciphertexts
//! immediately, but leaves them encrypted: [`EncryptedItem::get_values`]
//! decrypts a named subset on demand, concurrently per attribute.
//!
//! The durable store stays external; rows are handed over as a plain
//! [`RowMap`] and loaded back through a [`DataLoader`]. [`MemoryStore`]
//! covers tests and single-process embedding.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use rowpack::{
//!     pack, unpack, Approach, EnvelopeKeyProvider, EnvelopeKeyProviderInfo, IdSerializer,
//!     Item, MasterKeyProvider, MemoryStore, PackOptions, PackParams, ProviderRegistry,
//!     RequestContext, SecretKey, TableKey, TableKeyCreator, TableKeySerializer,
//!     UnpackParams, Value,
//! };
//!
//! # fn main() -> rowpack::Result<()> {
//! // A provider holding the master key, registered so peers can find it
//! let registry = ProviderRegistry::new();
//! let provider: Arc<dyn EnvelopeKeyProvider> = Arc::new(MasterKeyProvider::with_finder(
//!     EnvelopeKeyProviderInfo::new("tenant-keys", SecretKey::generate()),
//!     registry.finder(),
//! )?);
//! registry.register(provider.clone());
//!
//! let serializer = Arc::new(TableKeySerializer::new());
//!
//! // Pack an item into an envelope plus storage rows
//! let item = Item::new(TableKey::new("user-7", "profile"))
//!     .with_attribute("name", "Fred Flintstone")
//!     .with_attribute("age", 52i64);
//! let params = PackParams::new()
//!     .with_provider(provider.clone())
//!     .with_creator(Arc::new(TableKeyCreator::default()))
//!     .with_packer(serializer.clone())
//!     .with_approach(Approach::CompactV1);
//! let (envelope, rows) = pack(&item, &params, PackOptions::new())?;
//!
//! // Persist the rows; an in-memory store stands in for the real one here
//! let store = MemoryStore::new();
//! store.put_rows(rows);
//!
//! // Reopen lazily, then decrypt one attribute
//! let ctx = RequestContext::new();
//! let unpack_params = UnpackParams::new()
//!     .with_data_loader(store.loader())
//!     .with_id_retriever({
//!         let serializer = serializer.clone();
//!         Arc::new(move |_name: &str| {
//!             Ok(serializer.clone() as Arc<dyn IdSerializer<TableKey>>)
//!         })
//!     })
//!     .with_provider(provider.clone());
//! let encrypted = unpack(&ctx, &envelope, &unpack_params)?;
//! assert_eq!(encrypted.key(), &TableKey::new("user-7", "profile"));
//!
//! let values = encrypted.get_values(&ctx, &["name"], Some(provider.as_ref()))?;
//! assert_eq!(values["name"], Value::from("Fred Flintstone"));
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod context;
pub mod crypto;
pub mod encrypted_item;
pub mod error;
pub mod id;
pub mod pack;
pub mod provider;
pub mod store;
pub mod table_key;
pub mod value;

mod packing_v1;

#[cfg(test)]
mod testutil;

// ============================================================================
// Error Exports
// ============================================================================

pub use error::{PackError, Result};

// ============================================================================
// Crypto Exports
// ============================================================================

/// AES-256-GCM sealing of byte blobs.
pub use crypto::AesGcmCipher;

/// Zeroize-on-drop key material for master keys and DEKs.
pub use crypto::SecretKey;

pub use crypto::{AES_256_KEY_SIZE, NONCE_SIZE, TAG_SIZE};

// ============================================================================
// Codec Exports
// ============================================================================

/// Named serialization configuration, resolvable at decode time.
pub use codec::Approach;

/// One tagged value inside a codec record.
pub use codec::Datum;

// ============================================================================
// Core Types
// ============================================================================

pub use context::RequestContext;
pub use encrypted_item::EncryptedItem;
pub use value::Value;

// ============================================================================
// Provider Exports
// ============================================================================

pub use provider::{
    EnvelopeKeyProvider, EnvelopeKeyProviderInfo, MasterKeyProvider, ProviderFinder, ProviderId,
    ProviderRegistry, MASTER_KEY_VAR, PROVIDER_ID_VAR,
};

// ============================================================================
// Key Identity Exports
// ============================================================================

pub use id::{IdCreator, IdSerializer, UuidCreator, UuidSerializer};
pub use table_key::{TableKey, TableKeyCreator, TableKeySerializer};

// ============================================================================
// Packing Exports
// ============================================================================

pub use pack::{
    pack, pack_key, unpack, unpack_key, DataLoader, IdRetriever, Item, PackOptions, PackParams,
    PackVersion, UnpackParams, MIN_ROW_SIZE,
};

// ============================================================================
// Store Exports
// ============================================================================

pub use store::{MemoryStore, RowMap};
