//! Packing façade
//!
//! Entry points for turning items into envelope-encrypted rows and back:
//! [`pack`], [`pack_key`], [`unpack`] and [`unpack_key`], together with the
//! parameter and option types they validate.

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

use crate::codec::{Approach, Codec, Datum};
use crate::context::RequestContext;
use crate::encrypted_item::EncryptedItem;
use crate::error::{PackError, Result};
use crate::id::{IdCreator, IdSerializer};
use crate::packing_v1::{self, V1Engine};
use crate::provider::EnvelopeKeyProvider;
use crate::store::RowMap;
use crate::value::Value;

/// Something to be packed: a unique key plus named attribute values
pub struct Item<T> {
    pub key: T,
    pub attributes: HashMap<String, Value<T>>,
}

impl<T> Item<T> {
    /// An item with no attributes yet
    pub fn new(key: T) -> Self {
        Self { key, attributes: HashMap::new() }
    }

    /// Add an attribute, returning the updated item
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<Value<T>>,
    ) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// Version of the packing wire format.
///
/// Every breaking serialization change increments the version, so existing
/// envelopes stay readable. The version prefix is always decoded with the
/// pinned codec, which keeps future versions discoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum PackVersion {
    Unknown = 0,
    V1 = 1,
    OutOfRange = 2,
}

impl PackVersion {
    /// Resolve a wire-carried version byte to a supported version
    fn from_wire(version: i8) -> Option<Self> {
        match version {
            1 => Some(PackVersion::V1),
            _ => None,
        }
    }
}

/// Smallest permitted row size; the primary row's fill budget is held this
/// far below the row size
pub const MIN_ROW_SIZE: usize = 10 * 1024;

const DEFAULT_MAX_ROW_SIZE: usize = 350 * 1024;
const DEFAULT_MAX_ATTR_VALUE_SIZE: usize = 100 * 1024;
const DEFAULT_ATTR_NAME_SIZE: u8 = 6;
const DEFAULT_ATTR_NAME_RETRIES: u8 = 1;

/// Tuning knobs for the packing process.
///
/// All values have working defaults; zero or out-of-range settings fall
/// back to them, except for the row size, which must be at least
/// [`MIN_ROW_SIZE`].
#[derive(Debug, Clone)]
pub struct PackOptions {
    version: PackVersion,
    max_row_size: usize,
    max_attr_value_size: usize,
    attr_name_size: u8,
    attr_name_retries: u8,
    compress: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            version: PackVersion::V1,
            max_row_size: DEFAULT_MAX_ROW_SIZE,
            max_attr_value_size: DEFAULT_MAX_ATTR_VALUE_SIZE,
            attr_name_size: DEFAULT_ATTR_NAME_SIZE,
            attr_name_retries: DEFAULT_ATTR_NAME_RETRIES,
            compress: false,
        }
    }
}

impl PackOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the packing version
    pub fn with_version(mut self, version: PackVersion) -> Self {
        self.version = version;
        self
    }

    /// Maximum size of each stored row, in KiB
    pub fn with_max_row_kb(mut self, kb: u16) -> Self {
        self.max_row_size = kb as usize * 1024;
        self
    }

    /// Maximum size of a single attribute ciphertext chunk, in KiB; clamped
    /// to the row size
    pub fn with_max_attribute_kb(mut self, kb: u16) -> Self {
        self.max_attr_value_size = kb as usize * 1024;
        self
    }

    /// Length of generated row names; at least 2
    pub fn with_attribute_name_size(mut self, size: u8) -> Self {
        self.attr_name_size = size;
        self
    }

    /// Attempts allowed when a generated row name collides
    pub fn with_attribute_name_retries(mut self, retries: u8) -> Self {
        self.attr_name_retries = retries;
        self
    }

    /// Compress attribute and bookkeeping records before sealing them
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub(crate) fn resolve(&self) -> Result<ResolvedOptions> {
        let version = if self.version == PackVersion::Unknown {
            PackVersion::V1
        } else {
            self.version
        };

        let max_row_size = if self.max_row_size == 0 {
            DEFAULT_MAX_ROW_SIZE
        } else {
            self.max_row_size
        };
        if max_row_size < MIN_ROW_SIZE {
            return Err(PackError::MaxSizeTooSmall);
        }

        let mut max_attr_value_size = if self.max_attr_value_size == 0 {
            DEFAULT_MAX_ATTR_VALUE_SIZE
        } else {
            self.max_attr_value_size
        };
        if max_attr_value_size > max_row_size {
            max_attr_value_size = max_row_size;
        }

        let attr_name_size = if self.attr_name_size < 2 {
            DEFAULT_ATTR_NAME_SIZE
        } else {
            self.attr_name_size
        };
        let attr_name_retries = if self.attr_name_retries == 0 {
            DEFAULT_ATTR_NAME_RETRIES
        } else {
            self.attr_name_retries
        };

        Ok(ResolvedOptions {
            version,
            max_row_size,
            max_attr_value_size,
            attr_name_size: attr_name_size as usize,
            attr_name_retries,
            compress: self.compress,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedOptions {
    pub(crate) version: PackVersion,
    pub(crate) max_row_size: usize,
    pub(crate) max_attr_value_size: usize,
    pub(crate) attr_name_size: usize,
    pub(crate) attr_name_retries: u8,
    pub(crate) compress: bool,
}

/// Retrieves the rows stored against the given element keys, flattened into
/// one name → bytes map; row names are unique per pack call, so flattening
/// cannot clash
pub type DataLoader<T> =
    Arc<dyn Fn(&RequestContext, &[T]) -> Result<HashMap<String, Vec<u8>>> + Send + Sync>;

/// Resolves the [`IdSerializer`] registered under a wire-carried name
pub type IdRetriever<T> =
    Arc<dyn Fn(&str) -> Result<Arc<dyn IdSerializer<T>>> + Send + Sync>;

/// Collaborators used by [`pack`] and [`pack_key`].
///
/// All fields must be set; validation reports the first missing one.
pub struct PackParams<T> {
    pub provider: Option<Arc<dyn EnvelopeKeyProvider>>,
    pub creator: Option<Arc<dyn IdCreator<T>>>,
    pub packer: Option<Arc<dyn IdSerializer<T>>>,
    pub approach: Option<Approach>,
}

impl<T> Default for PackParams<T> {
    fn default() -> Self {
        Self { provider: None, creator: None, packer: None, approach: None }
    }
}

impl<T> PackParams<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Arc<dyn EnvelopeKeyProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_creator(mut self, creator: Arc<dyn IdCreator<T>>) -> Self {
        self.creator = Some(creator);
        self
    }

    pub fn with_packer(mut self, packer: Arc<dyn IdSerializer<T>>) -> Self {
        self.packer = Some(packer);
        self
    }

    pub fn with_approach(mut self, approach: Approach) -> Self {
        self.approach = Some(approach);
        self
    }

    fn validate(&self) -> Result<ValidatedPackParams<'_, T>> {
        let provider = self.provider.as_deref().ok_or(PackError::NoProvider)?;
        let creator = self.creator.as_deref().ok_or(PackError::NoIdCreator)?;
        let packer = self.packer.as_deref().ok_or(PackError::NoIdSerializer)?;
        let approach = self.approach.ok_or(PackError::NoApproach)?;
        Ok(ValidatedPackParams { provider, creator, packer, approach })
    }
}

struct ValidatedPackParams<'p, T> {
    provider: &'p dyn EnvelopeKeyProvider,
    creator: &'p dyn IdCreator<T>,
    packer: &'p dyn IdSerializer<T>,
    approach: Approach,
}

/// Collaborators used by [`unpack`] and [`unpack_key`]
pub struct UnpackParams<T> {
    pub data_loader: Option<DataLoader<T>>,
    pub id_retriever: Option<IdRetriever<T>>,
    pub provider: Option<Arc<dyn EnvelopeKeyProvider>>,
}

impl<T> Default for UnpackParams<T> {
    fn default() -> Self {
        Self { data_loader: None, id_retriever: None, provider: None }
    }
}

impl<T> UnpackParams<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_loader(mut self, loader: DataLoader<T>) -> Self {
        self.data_loader = Some(loader);
        self
    }

    pub fn with_id_retriever(mut self, retriever: IdRetriever<T>) -> Self {
        self.id_retriever = Some(retriever);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn EnvelopeKeyProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[allow(clippy::type_complexity)]
    fn validate(&self) -> Result<(&DataLoader<T>, &IdRetriever<T>, &dyn EnvelopeKeyProvider)> {
        let loader = self.data_loader.as_ref().ok_or(PackError::NoDataLoader)?;
        let retriever = self.id_retriever.as_ref().ok_or(PackError::NoIdRetriever)?;
        let provider = self.provider.as_deref().ok_or(PackError::NoKeyProvider)?;
        Ok((loader, retriever, provider))
    }
}

/// Pack an item into `(envelope, rows)`.
///
/// The envelope is the opaque byte form to hand back to the caller; the
/// rows are what to persist in the store, one entry per element key. The
/// row map is built in memory and returned atomically, so a failure at any
/// phase leaks nothing.
pub fn pack<T>(
    item: &Item<T>,
    params: &PackParams<T>,
    opts: PackOptions,
) -> Result<(Vec<u8>, RowMap<T>)>
where
    T: Clone + Eq + Hash,
{
    if item.attributes.is_empty() {
        return Err(PackError::NoAttributes);
    }
    pack_item(item, params, opts)
}

/// Pack only a key, producing an envelope with no attribute rows
pub fn pack_key<T>(key: &T, params: &PackParams<T>, opts: PackOptions) -> Result<Vec<u8>>
where
    T: Clone + Eq + Hash,
{
    let item = Item::new(key.clone());
    pack_item(&item, params, opts).map(|(envelope, _)| envelope)
}

fn pack_item<T>(
    item: &Item<T>,
    params: &PackParams<T>,
    opts: PackOptions,
) -> Result<(Vec<u8>, RowMap<T>)>
where
    T: Clone + Eq + Hash,
{
    // User-supplied creators, serializers and providers run inside; a panic
    // from any of them surfaces as an ordinary error
    catch_unwind(AssertUnwindSafe(|| pack_item_inner(item, params, opts)))
        .unwrap_or_else(|panic| Err(PackError::Internal(panic_message(panic))))
}

fn pack_item_inner<T>(
    item: &Item<T>,
    params: &PackParams<T>,
    opts: PackOptions,
) -> Result<(Vec<u8>, RowMap<T>)>
where
    T: Clone + Eq + Hash,
{
    let params = params.validate()?;
    let opts = opts.resolve()?;

    // One fresh DEK per pack call; every secret byte is sealed under it
    let (wrapped_dek, dek) = params.provider.new_dek()?;

    let (envelope, rows) = match opts.version {
        PackVersion::V1 => {
            let engine = V1Engine {
                creator: params.creator,
                packer: params.packer,
                approach: params.approach,
                opts: &opts,
            };
            engine.pack(item, &wrapped_dek, &dek)?
        }
        other => return Err(PackError::UnsupportedVersion(other as i8)),
    };

    // Version prefix, always in the pinned codec
    let data = Codec::pinned().encode(&[
        Datum::I8(opts.version as i8),
        Datum::Bytes(envelope),
    ])?;

    debug!(version = ?opts.version, bytes = data.len(), "pack complete");
    Ok((data, rows))
}

/// Reopen an envelope produced by [`pack`] into an [`EncryptedItem`].
///
/// The context is forwarded to the provider and the data loader; a
/// cancelled or rejected request surfaces as their error and aborts the
/// unpack with nothing retained.
pub fn unpack<T>(
    ctx: &RequestContext,
    data: &[u8],
    params: &UnpackParams<T>,
) -> Result<EncryptedItem<T>>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    catch_unwind(AssertUnwindSafe(|| unpack_inner(ctx, data, params)))
        .unwrap_or_else(|panic| Err(PackError::Internal(panic_message(panic))))
}

/// Recover the key from an envelope produced by [`pack_key`] or [`pack`]
pub fn unpack_key<T>(ctx: &RequestContext, data: &[u8], params: &UnpackParams<T>) -> Result<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    unpack(ctx, data, params).map(|item| item.key().clone())
}

fn unpack_inner<T>(
    ctx: &RequestContext,
    data: &[u8],
    params: &UnpackParams<T>,
) -> Result<EncryptedItem<T>>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    if data.is_empty() {
        return Err(PackError::NoData);
    }
    let (loader, retriever, provider) = params.validate()?;

    let fields = Codec::pinned().decode(data)?;
    if fields.len() != 2 {
        return Err(PackError::InvalidData);
    }
    let mut fields = fields.into_iter();
    let Some(Datum::I8(version)) = fields.next() else {
        return Err(PackError::InvalidData);
    };
    let Some(Datum::Bytes(envelope)) = fields.next() else {
        return Err(PackError::InvalidData);
    };

    match PackVersion::from_wire(version) {
        Some(PackVersion::V1) => packing_v1::unpack(ctx, &envelope, provider, loader, retriever),
        _ => Err(PackError::UnsupportedVersion(version)),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected panic".to_string()
    }
}
