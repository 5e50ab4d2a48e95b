//! Key identity traits
//!
//! Items and overflow rows are addressed by a caller-chosen key type `T`.
//! The core never inspects `T` itself; it mints fresh instances through an
//! [`IdCreator`] and moves them on and off the wire through an
//! [`IdSerializer`].

use uuid::Uuid;

use crate::error::{PackError, Result};

/// Mints unique instances of `T`.
///
/// Implementations draw from a CSPRNG so that two calls collide only with
/// negligible probability. Deterministic seeded implementations are for
/// tests only and must never be a default.
pub trait IdCreator<T>: Send + Sync {
    /// Return a new unique instance of `T`
    fn id(&self) -> T;
}

/// Encodes and decodes instances of `T`.
///
/// The name travels inside every envelope so the matching serializer can be
/// located at unpack time; once released it must stay stable, as must the
/// byte encoding. Round-trip law: `unpack(&pack(&t)?)? == t`.
pub trait IdSerializer<T>: Send + Sync {
    /// Stable wire-carried identifier of this serializer
    fn name(&self) -> &str;
    /// Convert an instance of `T` to bytes
    fn pack(&self, id: &T) -> Result<Vec<u8>>;
    /// Recover an instance of `T` from bytes
    fn unpack(&self, data: &[u8]) -> Result<T>;
}

/// [`IdCreator`] for [`Uuid`] keys, backed by random v4 identifiers
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidCreator;

impl IdCreator<Uuid> for UuidCreator {
    fn id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// [`IdSerializer`] for [`Uuid`] keys; the wire form is the 16 raw bytes
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidSerializer;

impl IdSerializer<Uuid> for UuidSerializer {
    fn name(&self) -> &str {
        "uuid.v1"
    }

    fn pack(&self, id: &Uuid) -> Result<Vec<u8>> {
        Ok(id.as_bytes().to_vec())
    }

    fn unpack(&self, data: &[u8]) -> Result<Uuid> {
        Uuid::from_slice(data).map_err(|_| PackError::KeyDeserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_creator_unique() {
        let creator = UuidCreator;
        assert_ne!(creator.id(), creator.id());
    }

    #[test]
    fn test_uuid_serializer_roundtrip() {
        let creator = UuidCreator;
        let serializer = UuidSerializer;

        let id = creator.id();
        let packed = serializer.pack(&id).unwrap();
        assert_eq!(serializer.unpack(&packed).unwrap(), id);
    }

    #[test]
    fn test_uuid_serializer_rejects_bad_length() {
        let serializer = UuidSerializer;
        assert!(matches!(
            serializer.unpack(&[1, 2, 3]),
            Err(PackError::KeyDeserialization)
        ));
    }
}
