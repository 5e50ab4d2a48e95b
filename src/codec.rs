//! Record codec: the serialization adapter for the packing core
//!
//! A *record* is an ordered tuple of tagged [`Datum`] values. Records are
//! framed as `[version u8][flags u8][postcard payload]`, optionally LZ4
//! compressed (flag bit 0) and optionally sealed whole with AES-256-GCM.
//! The framing is self-describing enough that a decoder needs only the
//! [`Approach`] name and, for sealed records, the key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::crypto::{AesGcmCipher, SecretKey};
use crate::error::{PackError, Result};

/// Frame version for [`Approach::CompactV1`] records
const RECORD_VERSION_V1: u8 = 1;

/// Flag bit: payload is LZ4 compressed
const FLAG_COMPRESSED: u8 = 0b0000_0001;

const COMPACT_V1_NAME: &str = "compact.v1";

/// One tagged value inside a record.
///
/// Covers the scalar types the codec accepts plus homogeneous sequences of
/// each. Byte strings double as `u8` sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Duration(Duration),
    BoolSeq(Vec<bool>),
    I8Seq(Vec<i8>),
    I16Seq(Vec<i16>),
    I32Seq(Vec<i32>),
    I64Seq(Vec<i64>),
    U16Seq(Vec<u16>),
    U32Seq(Vec<u32>),
    U64Seq(Vec<u64>),
    F32Seq(Vec<f32>),
    F64Seq(Vec<f64>),
    StrSeq(Vec<String>),
    BytesSeq(Vec<Vec<u8>>),
    TimestampSeq(Vec<DateTime<Utc>>),
    DurationSeq(Vec<Duration>),
}

/// A named serialization configuration, resolvable at decode time.
///
/// The name travels on the wire inside the envelope, so every variant's
/// encoding is fixed once released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approach {
    /// Compact postcard records, frame version 1. Fixed forever.
    CompactV1,
}

impl Approach {
    /// Stable wire-carried identifier of this approach
    pub fn name(&self) -> &'static str {
        match self {
            Approach::CompactV1 => COMPACT_V1_NAME,
        }
    }

    /// Resolve an approach from its wire name
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            COMPACT_V1_NAME => Ok(Approach::CompactV1),
            other => Err(PackError::UnknownApproach(other.to_string())),
        }
    }
}

impl Default for Approach {
    fn default() -> Self {
        Approach::CompactV1
    }
}

/// Record encoder/decoder for a fixed approach, compression and key choice
pub(crate) struct Codec<'k> {
    approach: Approach,
    compress: bool,
    key: Option<&'k SecretKey>,
}

impl<'k> Codec<'k> {
    pub(crate) fn new(approach: Approach) -> Self {
        Self { approach, compress: false, key: None }
    }

    /// The codec for bootstrap frames: V1, plain, unsealed. Never changes,
    /// so any consumer can decode the outermost layers of any envelope.
    pub(crate) fn pinned() -> Self {
        Self::new(Approach::CompactV1)
    }

    pub(crate) fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub(crate) fn with_encryption(mut self, key: &'k SecretKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Encode a record, sealing it when a key is configured
    pub(crate) fn encode(&self, fields: &[Datum]) -> Result<Vec<u8>> {
        let Approach::CompactV1 = self.approach;

        let payload = postcard::to_stdvec(fields)?;
        let (payload, flags) = if self.compress {
            (lz4_flex::compress_prepend_size(&payload), FLAG_COMPRESSED)
        } else {
            (payload, 0)
        };

        let mut frame = Vec::with_capacity(2 + payload.len());
        frame.push(RECORD_VERSION_V1);
        frame.push(flags);
        frame.extend_from_slice(&payload);

        match self.key {
            Some(key) => AesGcmCipher::seal(key, &frame),
            None => Ok(frame),
        }
    }

    /// Decode a record, unsealing it first when a key is configured.
    ///
    /// Compression is detected from the frame flags, so the encoder's
    /// compression choice does not need to be known up front.
    pub(crate) fn decode(&self, data: &[u8]) -> Result<Vec<Datum>> {
        let Approach::CompactV1 = self.approach;

        let opened;
        let frame: &[u8] = match self.key {
            Some(key) => {
                opened = AesGcmCipher::open(key, data)?;
                &opened
            }
            None => data,
        };

        if frame.len() < 2 {
            return Err(PackError::Codec("record truncated".to_string()));
        }
        let version = frame[0];
        let flags = frame[1];
        if version != RECORD_VERSION_V1 {
            return Err(PackError::Codec(format!("unsupported record version {version}")));
        }

        let payload = &frame[2..];
        if flags & FLAG_COMPRESSED != 0 {
            let decompressed = lz4_flex::decompress_size_prepended(payload)
                .map_err(|_| PackError::Decompression)?;
            Ok(postcard::from_bytes(&decompressed)?)
        } else {
            Ok(postcard::from_bytes(payload)?)
        }
    }
}
