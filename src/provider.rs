//! Envelope key providers
//!
//! A provider vends fresh data encryption keys (DEKs) for packing and
//! recovers them at unpack time. Each DEK is wrapped under the provider's
//! long-lived AES-256-GCM master key and tagged with the provider's id in
//! cleartext, so any recipient can route a wrapped DEK back to a provider
//! that holds the right master key — directly, or through a finder.

use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::codec::{Codec, Datum};
use crate::context::RequestContext;
use crate::crypto::{AesGcmCipher, SecretKey, AES_256_KEY_SIZE};
use crate::error::{PackError, Result};

/// Identifier distinguishing envelope key providers from other strings
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProviderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identity and master key of an envelope key provider
pub struct EnvelopeKeyProviderInfo {
    pub id: ProviderId,
    pub master_key: SecretKey,
}

/// Environment variable holding the provider id
pub const PROVIDER_ID_VAR: &str = "ROWPACK_PROVIDER_ID";
/// Environment variable holding the base64-encoded 32-byte master key
pub const MASTER_KEY_VAR: &str = "ROWPACK_MASTER_KEY_BASE64";

impl EnvelopeKeyProviderInfo {
    pub fn new(id: impl Into<ProviderId>, master_key: SecretKey) -> Self {
        Self { id: id.into(), master_key }
    }

    /// Load provider info from the environment.
    ///
    /// Reads [`PROVIDER_ID_VAR`] and [`MASTER_KEY_VAR`]; the key must decode
    /// to exactly 32 bytes of standard base64.
    pub fn from_env() -> Result<Self> {
        let id = std::env::var(PROVIDER_ID_VAR)
            .map_err(|_| PackError::Config(format!("{PROVIDER_ID_VAR} not set")))?;

        let key_b64 = std::env::var(MASTER_KEY_VAR)
            .map_err(|_| PackError::Config(format!("{MASTER_KEY_VAR} not set")))?;
        let key_bytes = STANDARD
            .decode(&key_b64)
            .map_err(|e| PackError::Config(format!("invalid {MASTER_KEY_VAR}: {e}")))?;
        if key_bytes.len() != AES_256_KEY_SIZE {
            return Err(PackError::Config(format!(
                "{MASTER_KEY_VAR} must decode to exactly {AES_256_KEY_SIZE} bytes, got {}",
                key_bytes.len()
            )));
        }

        let info = Self::new(id, SecretKey::new(key_bytes));
        info.validate()?;
        Ok(info)
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(PackError::ProviderNoId);
        }
        if self.master_key.len() != AES_256_KEY_SIZE {
            return Err(PackError::ProviderInvalidKey);
        }
        Ok(())
    }
}

/// Vends and recovers per-pack data encryption keys.
///
/// `new_dek` mints a fresh key and its wrapped form; `decrypt` reverses the
/// wrapping, delegating to a peer provider when the embedded id is not its
/// own. The request context is forwarded unchanged so implementations may
/// verify caller access; the core applies no policy of its own.
pub trait EnvelopeKeyProvider: Send + Sync {
    /// Identifier of this provider instance
    fn id(&self) -> &ProviderId;

    /// Mint a fresh DEK, returning `(wrapped, raw)`
    fn new_dek(&self) -> Result<(Vec<u8>, SecretKey)>;

    /// Recover the raw DEK from a wrapped form produced by `new_dek`
    fn decrypt(&self, ctx: &RequestContext, wrapped: &[u8]) -> Result<SecretKey>;
}

/// Locates a provider for a given id during cross-provider decryption
pub type ProviderFinder =
    Arc<dyn Fn(&ProviderId) -> Result<Arc<dyn EnvelopeKeyProvider>> + Send + Sync>;

/// The standard [`EnvelopeKeyProvider`]: wraps DEKs under a single master
/// key and routes foreign wrapped DEKs through an optional finder.
pub struct MasterKeyProvider {
    id: ProviderId,
    master_key: SecretKey,
    finder: Option<ProviderFinder>,
}

impl MasterKeyProvider {
    /// Create a provider with no finder; it can only decrypt DEKs it
    /// wrapped itself
    pub fn new(info: EnvelopeKeyProviderInfo) -> Result<Self> {
        info.validate()?;
        Ok(Self { id: info.id, master_key: info.master_key, finder: None })
    }

    /// Create a provider that resolves foreign wrapped DEKs via `finder`
    pub fn with_finder(info: EnvelopeKeyProviderInfo, finder: ProviderFinder) -> Result<Self> {
        let mut provider = Self::new(info)?;
        provider.finder = Some(finder);
        Ok(provider)
    }
}

impl EnvelopeKeyProvider for MasterKeyProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn new_dek(&self) -> Result<(Vec<u8>, SecretKey)> {
        let raw = SecretKey::generate();
        let ciphertext = AesGcmCipher::seal(&self.master_key, raw.as_bytes())?;

        let wrapped = Codec::pinned().encode(&[
            Datum::Str(self.id.to_string()),
            Datum::Bytes(ciphertext),
        ])?;

        Ok((wrapped, raw))
    }

    fn decrypt(&self, ctx: &RequestContext, wrapped: &[u8]) -> Result<SecretKey> {
        let fields = Codec::pinned().decode(wrapped)?;
        if fields.len() != 2 {
            return Err(PackError::KeyDeserialization);
        }

        let mut fields = fields.into_iter();
        let Some(Datum::Str(id)) = fields.next() else {
            return Err(PackError::KeyDeserialization);
        };

        let id = ProviderId::from(id);
        if id != self.id {
            let finder = self.finder.as_ref().ok_or(PackError::MissingFinder)?;
            let other = finder(&id)?;
            return other.decrypt(ctx, wrapped);
        }

        let Some(Datum::Bytes(ciphertext)) = fields.next() else {
            return Err(PackError::KeyDeserialization);
        };

        AesGcmCipher::open(&self.master_key, &ciphertext).map(SecretKey::new)
    }
}

/// Shared id → provider map backing cross-provider decryption.
///
/// Cheaply clonable; clones share the same registrations.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Arc<RwLock<HashMap<ProviderId, Arc<dyn EnvelopeKeyProvider>>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own id
    pub fn register(&self, provider: Arc<dyn EnvelopeKeyProvider>) {
        self.providers.write().insert(provider.id().clone(), provider);
    }

    /// Look up a provider by id
    pub fn get(&self, id: &ProviderId) -> Option<Arc<dyn EnvelopeKeyProvider>> {
        self.providers.read().get(id).cloned()
    }

    /// A finder backed by this registry; misses surface as
    /// [`PackError::UnknownProvider`]
    pub fn finder(&self) -> ProviderFinder {
        let registry = self.clone();
        Arc::new(move |id| {
            registry
                .get(id)
                .ok_or_else(|| PackError::UnknownProvider(id.clone()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_info(id: &str, seed: u8) -> EnvelopeKeyProviderInfo {
        EnvelopeKeyProviderInfo::new(id, SecretKey::new(vec![seed; AES_256_KEY_SIZE]))
    }

    #[test]
    fn test_new_dek_roundtrip() {
        let provider = MasterKeyProvider::new(test_info("Key1", 1)).unwrap();
        let ctx = RequestContext::new();

        let (wrapped, raw) = provider.new_dek().unwrap();
        let recovered = provider.decrypt(&ctx, &wrapped).unwrap();

        assert_eq!(raw.as_bytes(), recovered.as_bytes());
    }

    #[test]
    fn test_dek_freshness() {
        let provider = MasterKeyProvider::new(test_info("Key1", 1)).unwrap();

        let (wrapped_a, raw_a) = provider.new_dek().unwrap();
        let (wrapped_b, raw_b) = provider.new_dek().unwrap();

        assert_ne!(raw_a.as_bytes(), raw_b.as_bytes());
        assert_ne!(wrapped_a, wrapped_b);
    }

    #[test]
    fn test_info_validation() {
        assert!(matches!(
            MasterKeyProvider::new(test_info("", 1)),
            Err(PackError::ProviderNoId)
        ));

        let short = EnvelopeKeyProviderInfo::new("Key1", SecretKey::new(vec![0; 16]));
        assert!(matches!(
            MasterKeyProvider::new(short),
            Err(PackError::ProviderInvalidKey)
        ));
    }

    #[test]
    fn test_cross_provider_decrypt() {
        let registry = ProviderRegistry::new();
        let a = Arc::new(
            MasterKeyProvider::with_finder(test_info("A", 1), registry.finder()).unwrap(),
        );
        let b = Arc::new(
            MasterKeyProvider::with_finder(test_info("B", 2), registry.finder()).unwrap(),
        );
        registry.register(a.clone());
        registry.register(b.clone());

        let ctx = RequestContext::new();
        let (wrapped, raw) = a.new_dek().unwrap();

        // B can route A's wrapped DEK through the registry finder
        let recovered = b.decrypt(&ctx, &wrapped).unwrap();
        assert_eq!(raw.as_bytes(), recovered.as_bytes());
    }

    #[test]
    fn test_unknown_provider_propagates() {
        let registry = ProviderRegistry::new();
        let b = Arc::new(
            MasterKeyProvider::with_finder(test_info("B", 2), registry.finder()).unwrap(),
        );
        registry.register(b.clone());

        let lone = MasterKeyProvider::new(test_info("A", 1)).unwrap();
        let (wrapped, _) = lone.new_dek().unwrap();

        let result = b.decrypt(&RequestContext::new(), &wrapped);
        assert!(matches!(result, Err(PackError::UnknownProvider(id)) if id.as_str() == "A"));
    }

    #[test]
    fn test_missing_finder() {
        let a = MasterKeyProvider::new(test_info("A", 1)).unwrap();
        let b = MasterKeyProvider::new(test_info("B", 2)).unwrap();

        let (wrapped, _) = a.new_dek().unwrap();
        assert!(matches!(
            b.decrypt(&RequestContext::new(), &wrapped),
            Err(PackError::MissingFinder)
        ));
    }

    #[test]
    fn test_tampered_wrapped_dek() {
        let provider = MasterKeyProvider::new(test_info("Key1", 1)).unwrap();
        let (mut wrapped, _) = provider.new_dek().unwrap();
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0x01;

        // Flipping a ciphertext byte fails authentication; flipping framing
        // bytes surfaces the codec's own decode error instead
        assert!(provider.decrypt(&RequestContext::new(), &wrapped).is_err());
    }

    #[test]
    fn test_from_env() {
        std::env::set_var(PROVIDER_ID_VAR, "env-provider");
        std::env::set_var(MASTER_KEY_VAR, STANDARD.encode([7u8; AES_256_KEY_SIZE]));

        let info = EnvelopeKeyProviderInfo::from_env().unwrap();
        assert_eq!(info.id.as_str(), "env-provider");
        assert_eq!(info.master_key.len(), AES_256_KEY_SIZE);

        std::env::set_var(MASTER_KEY_VAR, "not base64!!");
        assert!(matches!(
            EnvelopeKeyProviderInfo::from_env(),
            Err(PackError::Config(_))
        ));

        std::env::remove_var(PROVIDER_ID_VAR);
        std::env::remove_var(MASTER_KEY_VAR);
    }
}
