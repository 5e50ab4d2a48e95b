//! Attribute value model

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::codec::Datum;

/// The value of a single item attribute.
///
/// Five encoding families exist on the wire, and each is a distinct variant
/// so the family is chosen at compile time:
///
/// - [`Value::Plain`] — any scalar or homogeneous sequence the codec accepts
/// - [`Value::Id`] — a single key-typed value
/// - [`Value::OptionalId`] — a single key-typed value held optionally; the
///   value must be present when packing
/// - [`Value::IdSeq`] — a sequence of key-typed values
/// - [`Value::OptionalIdSeq`] — a sequence of optionally-held key-typed
///   values; every element must be present when packing
///
/// `From` conversions cover the common plain cases, so
/// `item.attributes.insert(name, "Hello World".into())` just works.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<T> {
    Plain(Datum),
    Id(T),
    OptionalId(Option<T>),
    IdSeq(Vec<T>),
    OptionalIdSeq(Vec<Option<T>>),
}

macro_rules! plain_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl<T> From<$ty> for Value<T> {
                fn from(v: $ty) -> Self {
                    Value::Plain(Datum::$variant(v))
                }
            }
        )*
    };
}

plain_from! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => Str,
    Vec<u8> => Bytes,
    DateTime<Utc> => Timestamp,
    Duration => Duration,
    Vec<bool> => BoolSeq,
    Vec<i64> => I64Seq,
    Vec<f64> => F64Seq,
    Vec<String> => StrSeq,
    Vec<Vec<u8>> => BytesSeq,
}

impl<T> From<&str> for Value<T> {
    fn from(v: &str) -> Self {
        Value::Plain(Datum::Str(v.to_string()))
    }
}

impl<T> From<Datum> for Value<T> {
    fn from(d: Datum) -> Self {
        Value::Plain(d)
    }
}
