//! Lazily decrypted items
//!
//! [`EncryptedItem`] is the partially reopened form of a packed item: the
//! key is already recovered, the attribute ciphertexts are reassembled from
//! their rows, and nothing is decrypted until a caller asks for named
//! values with a provider that can unwrap the envelope key.

use std::collections::HashMap;
use std::sync::{mpsc, Arc};
use std::thread;

use crate::codec::{Approach, Codec, Datum};
use crate::context::RequestContext;
use crate::crypto::SecretKey;
use crate::error::{PackError, Result};
use crate::id::IdSerializer;
use crate::provider::EnvelopeKeyProvider;
use crate::value::Value;

/// A packed item whose attribute values are still encrypted at rest.
///
/// Immutable once constructed and safe to share across threads.
pub struct EncryptedItem<T> {
    key: T,
    attributes: HashMap<String, Vec<u8>>,
    wrapped_dek: Vec<u8>,
    approach: Approach,
    packer: Arc<dyn IdSerializer<T>>,
}

impl<T> EncryptedItem<T>
where
    T: Send + Sync,
{
    pub(crate) fn new(
        key: T,
        attributes: HashMap<String, Vec<u8>>,
        wrapped_dek: Vec<u8>,
        approach: Approach,
        packer: Arc<dyn IdSerializer<T>>,
    ) -> Self {
        Self { key, attributes, wrapped_dek, approach, packer }
    }

    /// The key of this item
    pub fn key(&self) -> &T {
        &self.key
    }

    /// Decrypt and return the requested attributes.
    ///
    /// Names not present in this item are skipped, not errors. The context
    /// is forwarded to the provider so it may verify caller access; no
    /// access checks happen here. Attributes are decrypted concurrently,
    /// one worker per name; the first failure fails the whole call.
    pub fn get_values(
        &self,
        ctx: &RequestContext,
        names: &[&str],
        provider: Option<&dyn EnvelopeKeyProvider>,
    ) -> Result<HashMap<String, Value<T>>> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }
        let provider = provider.ok_or(PackError::NoKeyProvider)?;

        // Unwrap once; workers share the key read-only
        let dek = provider.decrypt(ctx, &self.wrapped_dek)?;

        let (tx, rx) = mpsc::channel();
        thread::scope(|scope| {
            for &name in names {
                let tx = tx.clone();
                let dek = &dek;
                scope.spawn(move || {
                    let result = self
                        .attributes
                        .get(name)
                        .map(|blob| self.decode_value(blob, dek));
                    let _ = tx.send((name.to_string(), result));
                });
            }
            drop(tx);

            let mut values = HashMap::new();
            for (name, result) in rx {
                match result {
                    None => {}
                    Some(Ok(value)) => {
                        values.insert(name, value);
                    }
                    Some(Err(e)) => return Err(e),
                }
            }
            Ok(values)
        })
    }

    /// Reconstruct one attribute value from its sealed record. The record
    /// arity and leading fields identify the encoding family.
    fn decode_value(&self, blob: &[u8], dek: &SecretKey) -> Result<Value<T>> {
        let fields = Codec::new(self.approach).with_encryption(dek).decode(blob)?;

        match fields.as_slice() {
            [] => Err(PackError::InvalidItemData),
            [datum] => Ok(Value::Plain(datum.clone())),
            [Datum::Bool(by_value), Datum::Bytes(bytes)] => {
                let id = self
                    .packer
                    .unpack(bytes)
                    .map_err(|_| PackError::InvalidItemData)?;
                Ok(if *by_value {
                    Value::Id(id)
                } else {
                    Value::OptionalId(Some(id))
                })
            }
            [Datum::Bool(by_value), Datum::I64(size), rest @ ..] => {
                if *size < 0 || rest.len() != *size as usize {
                    return Err(PackError::InvalidItemData);
                }
                let mut ids = Vec::with_capacity(rest.len());
                for field in rest {
                    let Datum::Bytes(bytes) = field else {
                        return Err(PackError::InvalidItemData);
                    };
                    ids.push(
                        self.packer
                            .unpack(bytes)
                            .map_err(|_| PackError::InvalidItemData)?,
                    );
                }
                Ok(if *by_value {
                    Value::IdSeq(ids)
                } else {
                    Value::OptionalIdSeq(ids.into_iter().map(Some).collect())
                })
            }
            _ => Err(PackError::InvalidItemData),
        }
    }
}
