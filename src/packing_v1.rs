//! V1 packing engine
//!
//! Turns an item into an envelope plus a map of storage rows, and an
//! envelope back into an [`EncryptedItem`] skeleton. The pipeline:
//! serialize each attribute under the DEK, split oversized ciphertexts
//! into chunks with random row names, fill the primary row, bin-pack the
//! overflow into synthetic rows, then frame the bookkeeping in a sealed
//! inner record inside a pinned outer record.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use tracing::debug;

use crate::codec::{Approach, Codec, Datum};
use crate::context::RequestContext;
use crate::crypto::{random_alphanumeric, SecretKey};
use crate::encrypted_item::EncryptedItem;
use crate::error::{PackError, Result};
use crate::id::{IdCreator, IdSerializer};
use crate::pack::{DataLoader, IdRetriever, Item, ResolvedOptions, MIN_ROW_SIZE};
use crate::provider::EnvelopeKeyProvider;
use crate::store::RowMap;
use crate::value::Value;

pub(crate) struct V1Engine<'a, T> {
    pub(crate) creator: &'a dyn IdCreator<T>,
    pub(crate) packer: &'a dyn IdSerializer<T>,
    pub(crate) approach: Approach,
    pub(crate) opts: &'a ResolvedOptions,
}

impl<T> V1Engine<'_, T>
where
    T: Clone + Eq + Hash,
{
    pub(crate) fn pack(
        &self,
        item: &Item<T>,
        wrapped_dek: &[u8],
        dek: &SecretKey,
    ) -> Result<(Vec<u8>, RowMap<T>)> {
        let (attr_map, val_map) = self.encode_attributes(&item.attributes, dek)?;
        let (elements, rows) = self.assign_rows(item.key.clone(), val_map);

        let key_bytes = self.packer.pack(&item.key)?;
        let attr_map_bytes = self.encode_attr_map(&attr_map)?;
        let element_bytes = self.encode_elements(&elements)?;

        // Sealed under the DEK: the bookkeeping is readable only once the
        // envelope key has been recovered
        let inner = Codec::new(self.approach)
            .with_compression(self.opts.compress)
            .with_encryption(dek)
            .encode(&[
                Datum::Bytes(key_bytes),
                Datum::Bytes(attr_map_bytes),
                Datum::Bytes(element_bytes),
            ])?;

        // Bootstrap frame: always the pinned codec, so the wrapped key and
        // the serializer/approach names stay recoverable forever
        let outer = Codec::pinned().encode(&[
            Datum::Bytes(wrapped_dek.to_vec()),
            Datum::Str(self.packer.name().to_string()),
            Datum::Str(self.approach.name().to_string()),
            Datum::Bytes(inner),
        ])?;

        debug!(
            attributes = item.attributes.len(),
            rows = rows.len(),
            "packed item"
        );

        Ok((outer, rows))
    }

    /// Serialize and seal every attribute, splitting oversized ciphertexts
    /// into chunks. Returns the name → ordered-chunk-names map and the
    /// chunk-name → bytes map.
    fn encode_attributes(
        &self,
        attrs: &HashMap<String, Value<T>>,
        dek: &SecretKey,
    ) -> Result<(HashMap<String, Vec<String>>, HashMap<String, Vec<u8>>)> {
        let codec = Codec::new(self.approach)
            .with_compression(self.opts.compress)
            .with_encryption(dek);

        let mut used = HashSet::new();
        let mut attr_map = HashMap::with_capacity(attrs.len());
        let mut val_map = HashMap::new();

        for (name, value) in attrs {
            let blob = codec.encode(&self.value_fields(value)?)?;

            let mut chunk_names = Vec::new();
            for chunk in blob.chunks(self.opts.max_attr_value_size) {
                let row_name = self.unique_row_name(&mut used)?;
                val_map.insert(row_name.clone(), chunk.to_vec());
                chunk_names.push(row_name);
            }
            attr_map.insert(name.clone(), chunk_names);
        }

        Ok((attr_map, val_map))
    }

    /// The record fields for one attribute value. The leading flag/length
    /// fields make the five families distinguishable by arity at decode
    /// time.
    fn value_fields(&self, value: &Value<T>) -> Result<Vec<Datum>> {
        Ok(match value {
            Value::Plain(datum) => vec![datum.clone()],
            Value::Id(id) => vec![Datum::Bool(true), Datum::Bytes(self.packer.pack(id)?)],
            Value::OptionalId(Some(id)) => {
                vec![Datum::Bool(false), Datum::Bytes(self.packer.pack(id)?)]
            }
            Value::OptionalId(None) => return Err(PackError::EmptyOptionalId),
            Value::IdSeq(ids) => self.seq_fields(true, ids.iter().map(Some))?,
            Value::OptionalIdSeq(ids) => {
                self.seq_fields(false, ids.iter().map(Option::as_ref))?
            }
        })
    }

    fn seq_fields<'v>(
        &self,
        by_value: bool,
        ids: impl ExactSizeIterator<Item = Option<&'v T>>,
    ) -> Result<Vec<Datum>>
    where
        T: 'v,
    {
        let mut fields = Vec::with_capacity(ids.len() + 2);
        fields.push(Datum::Bool(by_value));
        fields.push(Datum::I64(ids.len() as i64));
        for id in ids {
            let id = id.ok_or(PackError::EmptyOptionalId)?;
            fields.push(Datum::Bytes(self.packer.pack(id)?));
        }
        Ok(fields)
    }

    fn unique_row_name(&self, used: &mut HashSet<String>) -> Result<String> {
        for _ in 0..self.opts.attr_name_retries {
            let name = random_alphanumeric(self.opts.attr_name_size);
            if used.insert(name.clone()) {
                return Ok(name);
            }
        }
        Err(PackError::UniqueNameRetriesExceeded)
    }

    /// Fill the primary row with the chunks that fit its budget, then
    /// first-fit the rest (ascending by length) into overflow rows keyed by
    /// freshly minted synthetic keys. Returns the element list (item key
    /// first) and the rows to store.
    fn assign_rows(&self, key: T, val_map: HashMap<String, Vec<u8>>) -> (Vec<T>, RowMap<T>) {
        // The primary row is held below max_row_size by a safety margin
        let mut remaining = self.opts.max_row_size.saturating_sub(MIN_ROW_SIZE);
        let mut primary = HashMap::new();
        let mut rest: Vec<(String, Vec<u8>)> = Vec::new();

        for (name, bytes) in val_map {
            let need = name.len() + bytes.len();
            if need <= remaining {
                remaining -= need;
                primary.insert(name, bytes);
            } else {
                rest.push((name, bytes));
            }
        }

        let mut elements = vec![key.clone()];
        let mut rows: RowMap<T> = HashMap::new();
        rows.insert(key, primary);

        if rest.is_empty() {
            return (elements, rows);
        }

        rest.sort_by_key(|(_, bytes)| bytes.len());

        let mut bins: Vec<(usize, HashMap<String, Vec<u8>>)> = Vec::new();
        for (name, bytes) in rest {
            let need = name.len() + bytes.len();
            match bins
                .iter_mut()
                .find(|bin| bin.0 + need < self.opts.max_row_size)
            {
                Some(bin) => {
                    bin.0 += need;
                    bin.1.insert(name, bytes);
                }
                None => bins.push((need, HashMap::from([(name, bytes)]))),
            }
        }

        for (_, content) in bins {
            let overflow_key = self.creator.id();
            elements.push(overflow_key.clone());
            rows.insert(overflow_key, content);
        }

        (elements, rows)
    }

    /// One string sequence per attribute: original name first, then the
    /// row names whose chunks reassemble its ciphertext, in order
    fn encode_attr_map(&self, attr_map: &HashMap<String, Vec<String>>) -> Result<Vec<u8>> {
        let fields: Vec<Datum> = attr_map
            .iter()
            .map(|(name, rows)| {
                let mut seq = Vec::with_capacity(rows.len() + 1);
                seq.push(name.clone());
                seq.extend(rows.iter().cloned());
                Datum::StrSeq(seq)
            })
            .collect();
        Codec::new(self.approach).encode(&fields)
    }

    fn encode_elements(&self, elements: &[T]) -> Result<Vec<u8>> {
        let mut fields = Vec::with_capacity(elements.len());
        for element in elements {
            fields.push(Datum::Bytes(self.packer.pack(element)?));
        }
        Codec::new(self.approach).encode(&fields)
    }
}

/// Reopen a V1 envelope into an [`EncryptedItem`], loading its rows through
/// `loader` and reassembling each attribute's ciphertext
pub(crate) fn unpack<T>(
    ctx: &RequestContext,
    data: &[u8],
    provider: &dyn EnvelopeKeyProvider,
    loader: &DataLoader<T>,
    retriever: &IdRetriever<T>,
) -> Result<EncryptedItem<T>>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    let fields = Codec::pinned().decode(data)?;
    if fields.len() != 4 {
        return Err(PackError::InvalidItemData);
    }
    let mut fields = fields.into_iter();

    let Some(Datum::Bytes(wrapped_dek)) = fields.next() else {
        return Err(PackError::InvalidItemData);
    };
    let Some(Datum::Str(packer_name)) = fields.next() else {
        return Err(PackError::InvalidItemData);
    };
    let packer = retriever(&packer_name)?;
    let Some(Datum::Str(approach_name)) = fields.next() else {
        return Err(PackError::InvalidItemData);
    };
    let approach = Approach::from_name(&approach_name)?;
    let Some(Datum::Bytes(inner)) = fields.next() else {
        return Err(PackError::InvalidItemData);
    };

    let dek = provider.decrypt(ctx, &wrapped_dek)?;

    let inner_fields = Codec::new(approach).with_encryption(&dek).decode(&inner)?;
    if inner_fields.len() != 3 {
        return Err(PackError::InvalidItemData);
    }
    let mut inner_fields = inner_fields.into_iter();

    let Some(Datum::Bytes(key_bytes)) = inner_fields.next() else {
        return Err(PackError::InvalidItemData);
    };
    let key = packer.unpack(&key_bytes)?;
    let Some(Datum::Bytes(attr_map_bytes)) = inner_fields.next() else {
        return Err(PackError::InvalidItemData);
    };
    let attr_map = decode_attr_map(approach, &attr_map_bytes)?;
    let Some(Datum::Bytes(element_bytes)) = inner_fields.next() else {
        return Err(PackError::InvalidItemData);
    };
    let elements = decode_elements(approach, &element_bytes, packer.as_ref())?;

    let loaded = loader(ctx, &elements)?;

    let mut attributes = HashMap::with_capacity(attr_map.len());
    for (name, chunk_names) in attr_map {
        let mut blob = Vec::new();
        for chunk_name in &chunk_names {
            let part = loaded.get(chunk_name).ok_or(PackError::InvalidItemData)?;
            blob.extend_from_slice(part);
        }
        attributes.insert(name, blob);
    }

    debug!(
        elements = elements.len(),
        attributes = attributes.len(),
        "unpacked item skeleton"
    );

    Ok(EncryptedItem::new(key, attributes, wrapped_dek, approach, packer))
}

fn decode_attr_map(approach: Approach, data: &[u8]) -> Result<HashMap<String, Vec<String>>> {
    let fields = Codec::new(approach).decode(data)?;

    let mut attr_map = HashMap::with_capacity(fields.len());
    for field in fields {
        let Datum::StrSeq(seq) = field else {
            return Err(PackError::InvalidAttrMap);
        };
        if seq.len() < 2 {
            return Err(PackError::InvalidAttrMap);
        }
        let mut seq = seq.into_iter();
        let Some(name) = seq.next() else {
            return Err(PackError::InvalidAttrMap);
        };
        attr_map.insert(name, seq.collect());
    }
    Ok(attr_map)
}

fn decode_elements<T>(
    approach: Approach,
    data: &[u8],
    packer: &dyn IdSerializer<T>,
) -> Result<Vec<T>> {
    let fields = Codec::new(approach).decode(data)?;

    let mut elements = Vec::with_capacity(fields.len());
    for field in fields {
        let Datum::Bytes(bytes) = field else {
            return Err(PackError::InvalidElementList);
        };
        elements.push(packer.unpack(&bytes)?);
    }
    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::PackOptions;
    use crate::table_key::{TableKey, TableKeyCreator, TableKeySerializer};

    fn test_engine<'a>(
        creator: &'a TableKeyCreator,
        packer: &'a TableKeySerializer,
        opts: &'a ResolvedOptions,
    ) -> V1Engine<'a, TableKey> {
        V1Engine {
            creator,
            packer,
            approach: Approach::CompactV1,
            opts,
        }
    }

    #[test]
    fn test_elements_roundtrip() {
        let creator = TableKeyCreator::default();
        let packer = TableKeySerializer::new();
        let opts = PackOptions::new().resolve().unwrap();
        let engine = test_engine(&creator, &packer, &opts);

        let cases: Vec<Vec<TableKey>> = vec![
            vec![],
            vec![TableKey::new("A", "B")],
            vec![TableKey::new("A", "B"), TableKey::new("ABC", "BDE")],
            vec![
                TableKey::new("A", "B"),
                TableKey::new("ABC", "BDE"),
                TableKey::new("ABCDERFHDGEWUGWIEDGHWEUDF", "BDEWEDW Hhyewoddweduh3"),
            ],
        ];

        for elements in cases {
            let encoded = engine.encode_elements(&elements).unwrap();
            let decoded = decode_elements(Approach::CompactV1, &encoded, &packer).unwrap();
            assert_eq!(elements, decoded);
        }
    }

    #[test]
    fn test_attr_map_roundtrip() {
        let creator = TableKeyCreator::default();
        let packer = TableKeySerializer::new();
        let opts = PackOptions::new().resolve().unwrap();
        let engine = test_engine(&creator, &packer, &opts);

        let attr_map = HashMap::from([
            ("name".to_string(), vec!["aB3kZp".to_string()]),
            (
                "payload".to_string(),
                vec!["Zk2LmQ".to_string(), "pQ7xYw".to_string(), "Mn0RsT".to_string()],
            ),
        ]);

        let encoded = engine.encode_attr_map(&attr_map).unwrap();
        let decoded = decode_attr_map(Approach::CompactV1, &encoded).unwrap();
        assert_eq!(attr_map, decoded);
    }

    #[test]
    fn test_attr_map_rejects_short_sequence() {
        let encoded = Codec::new(Approach::CompactV1)
            .encode(&[Datum::StrSeq(vec!["only-name".to_string()])])
            .unwrap();
        assert!(matches!(
            decode_attr_map(Approach::CompactV1, &encoded),
            Err(PackError::InvalidAttrMap)
        ));
    }

    #[test]
    fn test_chunking_counts() {
        let creator = TableKeyCreator::default();
        let packer = TableKeySerializer::new();
        let opts = PackOptions::new().resolve().unwrap();
        let engine = test_engine(&creator, &packer, &opts);

        let dek = SecretKey::generate();
        let attrs = HashMap::from([(
            "big".to_string(),
            Value::Plain(Datum::Bytes(vec![0xAB; 1_200_000])),
        )]);

        let (attr_map, val_map) = engine.encode_attributes(&attrs, &dek).unwrap();

        // 1.2 MB of ciphertext at 100 KiB per chunk lands in 12 chunks
        assert_eq!(attr_map["big"].len(), 12);
        assert_eq!(val_map.len(), 12);

        // Every chunk except the tail is exactly the configured size, and
        // the chunks reassemble the original blob
        let sizes: Vec<usize> = attr_map["big"]
            .iter()
            .map(|name| val_map[name].len())
            .collect();
        for size in &sizes[..sizes.len() - 1] {
            assert_eq!(*size, opts.max_attr_value_size);
        }
        let total: usize = sizes.iter().sum();

        let reassembled: Vec<u8> = attr_map["big"]
            .iter()
            .flat_map(|name| val_map[name].clone())
            .collect();
        assert_eq!(reassembled.len(), total);

        let codec = Codec::new(Approach::CompactV1).with_encryption(&dek);
        let fields = codec.decode(&reassembled).unwrap();
        assert_eq!(fields, vec![Datum::Bytes(vec![0xAB; 1_200_000])]);
    }

    #[test]
    fn test_assign_rows_budget() {
        let creator = TableKeyCreator::default();
        let packer = TableKeySerializer::new();
        let opts = PackOptions::new().resolve().unwrap();
        let engine = test_engine(&creator, &packer, &opts);

        // 60 chunks of 100 KiB cannot fit a 350 KiB row; overflow rows
        // must each stay within the budget
        let val_map: HashMap<String, Vec<u8>> = (0..60)
            .map(|i| (format!("chunk{i:02}"), vec![0u8; 100 * 1024]))
            .collect();

        let (elements, rows) = engine.assign_rows(TableKey::new("A", "B"), val_map);

        assert_eq!(elements.len(), rows.len());
        assert!(rows.len() > 1);
        assert_eq!(elements[0], TableKey::new("A", "B"));

        let mut stored = 0;
        for row in rows.values() {
            let size: usize = row.iter().map(|(n, b)| n.len() + b.len()).sum();
            assert!(size <= opts.max_row_size);
            stored += row.len();
        }
        assert_eq!(stored, 60);
    }

    #[test]
    fn test_assign_rows_single_row_when_small() {
        let creator = TableKeyCreator::default();
        let packer = TableKeySerializer::new();
        let opts = PackOptions::new().resolve().unwrap();
        let engine = test_engine(&creator, &packer, &opts);

        let val_map = HashMap::from([("aB3kZp".to_string(), vec![1u8, 2, 3])]);
        let (elements, rows) = engine.assign_rows(TableKey::new("A", "B"), val_map);

        assert_eq!(elements, vec![TableKey::new("A", "B")]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[&TableKey::new("A", "B")].len(), 1);
    }

    #[test]
    fn test_unique_row_name_exhaustion() {
        let creator = TableKeyCreator::default();
        let packer = TableKeySerializer::new();
        let opts = ResolvedOptions {
            attr_name_size: 2,
            attr_name_retries: 0,
            ..PackOptions::new().resolve().unwrap()
        };
        let engine = test_engine(&creator, &packer, &opts);

        let mut used = HashSet::new();
        assert!(matches!(
            engine.unique_row_name(&mut used),
            Err(PackError::UniqueNameRetriesExceeded)
        ));
    }

    #[test]
    fn test_value_fields_reject_missing_ids() {
        let creator = TableKeyCreator::default();
        let packer = TableKeySerializer::new();
        let opts = PackOptions::new().resolve().unwrap();
        let engine = test_engine(&creator, &packer, &opts);

        assert!(matches!(
            engine.value_fields(&Value::OptionalId(None)),
            Err(PackError::EmptyOptionalId)
        ));
        assert!(matches!(
            engine.value_fields(&Value::OptionalIdSeq(vec![Some(TableKey::new("A", "B")), None])),
            Err(PackError::EmptyOptionalId)
        ));
    }
}
