//! Error types for the packing core

use thiserror::Error;

use crate::provider::ProviderId;

/// Result type alias for packing operations
pub type Result<T> = std::result::Result<T, PackError>;

/// Errors that can occur while packing or unpacking items
#[derive(Error, Debug)]
pub enum PackError {
    /// `pack` called with an item carrying no attributes
    #[error("no attributes to pack")]
    NoAttributes,

    /// Pack params lack the envelope key provider
    #[error("params must include a provider to vend the data encryption key")]
    NoProvider,

    /// Pack params lack the id creator
    #[error("params must include a creator so new row keys can be minted when required")]
    NoIdCreator,

    /// Pack params lack the id serializer
    #[error("params must include a serializer so row keys can be encoded correctly")]
    NoIdSerializer,

    /// Pack params lack the serialization approach
    #[error("params must include the serialization approach to use for attribute data")]
    NoApproach,

    /// A packing version was requested that this build does not support
    #[error("unsupported pack version {0}")]
    UnsupportedVersion(i8),

    /// The configured row size cannot guarantee a successful pack
    #[error("max row size must be at least 10KiB")]
    MaxSizeTooSmall,

    /// Random row-name generation kept colliding until retries ran out
    #[error("retries exceeded when creating random row names - increase the row name size option")]
    UniqueNameRetriesExceeded,

    /// `unpack` called with an empty byte slice
    #[error("no data to unpack")]
    NoData,

    /// Unpack params lack the data loader
    #[error("a data loader must be provided so attribute values can be retrieved")]
    NoDataLoader,

    /// Unpack params lack the id retriever
    #[error("an id retriever must be provided so key information can be decoded")]
    NoIdRetriever,

    /// No provider available to decrypt the envelope key
    #[error("a key provider must be provided to decrypt the envelope key")]
    NoKeyProvider,

    /// The outermost version frame does not have the expected shape
    #[error("unable to unpack - invalid data")]
    InvalidData,

    /// Packed item data does not decode to the expected structure
    #[error("the provided data cannot be decoded")]
    InvalidItemData,

    /// The attribute map record does not decode
    #[error("invalid data, cannot decode the attribute map")]
    InvalidAttrMap,

    /// The element list record does not decode
    #[error("invalid data, cannot decode the element list")]
    InvalidElementList,

    /// An optional id value was absent at pack time
    #[error("optional id values must be present when packing")]
    EmptyOptionalId,

    /// Provider info carries an empty id
    #[error("envelope key provider must have a valid id")]
    ProviderNoId,

    /// Provider info carries a key of the wrong length
    #[error("envelope key provider must have a 32-byte AES-256-GCM key")]
    ProviderInvalidKey,

    /// A foreign wrapped key was presented but no finder is configured
    #[error("no finder configured to resolve other envelope key providers")]
    MissingFinder,

    /// The finder has no provider registered under the given id
    #[error("unknown envelope key provider: {0}")]
    UnknownProvider(ProviderId),

    /// Authenticated decryption failed; tampering and a wrong key surface
    /// identically
    #[error("decryption failed")]
    Decrypt,

    /// Bytes presented as a serialized key do not decode to one
    #[error("invalid data - cannot decode key instance")]
    KeyDeserialization,

    /// No approach is registered under the given wire name
    #[error("unknown serialization approach: {0}")]
    UnknownApproach(String),

    /// The underlying record codec rejected the data
    #[error("codec error: {0}")]
    Codec(String),

    /// A compressed record payload failed to decompress
    #[error("decompression failed")]
    Decompression,

    /// Configuration error, typically while loading provider info
    #[error("configuration error: {0}")]
    Config(String),

    /// A trapped panic from user-supplied callbacks or internal state
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<postcard::Error> for PackError {
    fn from(err: postcard::Error) -> Self {
        PackError::Codec(err.to_string())
    }
}
