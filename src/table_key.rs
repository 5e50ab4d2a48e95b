//! Two-part table keys
//!
//! [`TableKey`] addresses rows in partition/sort style stores. The pair is
//! unique when compared across both parts.

use crate::codec::{Codec, Datum};
use crate::crypto::random_alphanumeric;
use crate::error::{PackError, Result};
use crate::id::{IdCreator, IdSerializer};

/// Default length of randomly generated key segments
const DEFAULT_SEGMENT_LEN: u8 = 16;

/// A key made of a partition part and a sort part
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub partition: String,
    pub sort: String,
}

impl TableKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self { partition: partition.into(), sort: sort.into() }
    }
}

impl std::fmt::Display for TableKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.partition, self.sort)
    }
}

enum Mode {
    /// Both segments drawn fresh
    Fresh { len: u8 },
    /// Partition pinned, sort extended with a random suffix
    Scoped { partition: String, sort: String, len: u8 },
    #[cfg(test)]
    Seeded { rng: parking_lot::Mutex<rand::rngs::StdRng>, len: u8 },
}

/// [`IdCreator`] for [`TableKey`], used to mint overflow-row keys
pub struct TableKeyCreator {
    mode: Mode,
}

impl TableKeyCreator {
    /// Creator drawing both segments at random with the given length
    pub fn new(len: u8) -> Self {
        Self { mode: Mode::Fresh { len } }
    }

    /// Creator whose keys stay in `key`'s partition: the partition part is
    /// left unchanged and the sort part gains a random suffix
    pub fn scoped_to(key: &TableKey, len: u8) -> Self {
        Self {
            mode: Mode::Scoped {
                partition: key.partition.clone(),
                sort: key.sort.clone(),
                len,
            },
        }
    }

    /// Deterministic creator for tests. Never a default: uniqueness across
    /// processes relies on the CSPRNG-backed constructors above.
    #[cfg(test)]
    pub(crate) fn seeded(seed: u64) -> Self {
        use rand::SeedableRng;
        Self {
            mode: Mode::Seeded {
                rng: parking_lot::Mutex::new(rand::rngs::StdRng::seed_from_u64(seed)),
                len: DEFAULT_SEGMENT_LEN,
            },
        }
    }
}

impl Default for TableKeyCreator {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_LEN)
    }
}

impl IdCreator<TableKey> for TableKeyCreator {
    fn id(&self) -> TableKey {
        match &self.mode {
            Mode::Fresh { len } => TableKey {
                partition: random_alphanumeric(*len as usize),
                sort: random_alphanumeric(*len as usize),
            },
            Mode::Scoped { partition, sort, len } => TableKey {
                partition: partition.clone(),
                sort: format!("{sort}.{}", random_alphanumeric(*len as usize)),
            },
            #[cfg(test)]
            Mode::Seeded { rng, len } => {
                use rand::distributions::Alphanumeric;
                use rand::Rng;
                let mut rng = rng.lock();
                let mut segment = |n: usize| -> String {
                    (&mut *rng)
                        .sample_iter(&Alphanumeric)
                        .take(n)
                        .map(char::from)
                        .collect()
                };
                let partition = segment(*len as usize);
                let sort = segment(*len as usize);
                TableKey { partition, sort }
            }
        }
    }
}

/// [`IdSerializer`] for [`TableKey`].
///
/// Always encodes with the pinned V1 codec: changing it would strand
/// historic data.
#[derive(Debug, Default, Clone, Copy)]
pub struct TableKeySerializer;

impl TableKeySerializer {
    pub fn new() -> Self {
        Self
    }
}

impl IdSerializer<TableKey> for TableKeySerializer {
    fn name(&self) -> &str {
        "table-key.v1"
    }

    fn pack(&self, id: &TableKey) -> Result<Vec<u8>> {
        Codec::pinned().encode(&[Datum::StrSeq(vec![
            id.partition.clone(),
            id.sort.clone(),
        ])])
    }

    fn unpack(&self, data: &[u8]) -> Result<TableKey> {
        let fields = Codec::pinned()
            .decode(data)
            .map_err(|_| PackError::KeyDeserialization)?;

        match <[Datum; 1]>::try_from(fields) {
            Ok([Datum::StrSeq(parts)]) if parts.len() == 2 => {
                let mut parts = parts.into_iter();
                Ok(TableKey {
                    partition: parts.next().unwrap(),
                    sort: parts.next().unwrap(),
                })
            }
            _ => Err(PackError::KeyDeserialization),
        }
    }
}
