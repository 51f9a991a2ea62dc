//! Cache key derivation.
//!
//! Every entity is addressed in the grid by a 64-bit [`CacheKey`] computed
//! from its ordered primary-key values. The key is shared cluster-wide, so the
//! encoding below is fixed: a one-byte type tag per value followed by a
//! big-endian body (length-prefixed for variable-width values), hashed with
//! MurmurHash3 x64 128 (seed 0) and truncated to the low 64 bits.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{self, Cursor, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const HASH_SEED: u32 = 0;

const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_UINT: u8 = 0x03;
const TAG_FLOAT: u8 = 0x04;
const TAG_TEXT: u8 = 0x05;
const TAG_BYTES: u8 = 0x06;
const TAG_JSON: u8 = 0x07;
const TAG_HASHED: u8 = 0x08;

/// Identifier of an entity inside the cache grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(i64);

impl CacheKey {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    /// Position of this key in the store's partition token space.
    pub const fn token(self) -> i64 {
        self.0
    }
}

impl From<i64> for CacheKey {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single primary-key value.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Serde form of a composite value.
    Json(serde_json::Value),
    /// Bytes a value's `Hash` impl fed to the hasher.
    Hashed(Vec<u8>),
}

impl KeyValue {
    /// Key value from the serde form of `value`.
    pub fn json<V: Serialize + ?Sized>(value: &V) -> serde_json::Result<Self> {
        serde_json::to_value(value).map(Self::Json)
    }

    /// Key value for types with no stable byte form of their own.
    ///
    /// Only as stable as the type's `Hash` impl: `usize`/`isize` fields hash
    /// differently on 32- and 64-bit targets.
    pub fn hashed<V: Hash + ?Sized>(value: &V) -> Self {
        let mut sink = ByteSink::default();
        value.hash(&mut sink);
        Self::Hashed(sink.0)
    }

    /// Append the tagged encoding of this value to `out`.
    pub fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        match self {
            Self::Bool(v) => {
                out.write_all(&[TAG_BOOL, u8::from(*v)])?;
            }
            Self::Int(v) => {
                out.write_all(&[TAG_INT])?;
                out.write_all(&v.to_be_bytes())?;
            }
            Self::UInt(v) => {
                out.write_all(&[TAG_UINT])?;
                out.write_all(&v.to_be_bytes())?;
            }
            Self::Float(v) => {
                // -0.0 == 0.0, so both must encode the same way.
                let v = if *v == 0.0 { 0.0f64 } else { *v };
                out.write_all(&[TAG_FLOAT])?;
                out.write_all(&v.to_bits().to_be_bytes())?;
            }
            Self::Text(v) => write_prefixed(out, TAG_TEXT, v.as_bytes())?,
            Self::Bytes(v) => write_prefixed(out, TAG_BYTES, v)?,
            Self::Json(v) => {
                let mut body = Vec::new();
                write_canonical_json(&mut body, v)?;
                write_prefixed(out, TAG_JSON, &body)?;
            }
            Self::Hashed(bytes) => {
                let hash = murmur3::murmur3_32(&mut Cursor::new(bytes), HASH_SEED)?;
                out.write_all(&[TAG_HASHED])?;
                out.write_all(&(hash as i32).to_be_bytes())?;
            }
        }
        Ok(())
    }
}

/// Compact JSON with object keys in sorted order at every level.
///
/// The `Value` map type may keep insertion order, so equal values are only
/// guaranteed the same bytes if keys are sorted here.
fn write_canonical_json(out: &mut Vec<u8>, value: &serde_json::Value) -> io::Result<()> {
    use serde_json::Value;

    match value {
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical_json(out, item)?;
            }
            out.push(b']');
        }
        Value::Object(fields) => {
            let mut fields: Vec<_> = fields.iter().collect();
            fields.sort_unstable_by(|a, b| a.0.cmp(b.0));

            out.push(b'{');
            for (i, (name, item)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, name).map_err(io::Error::from)?;
                out.push(b':');
                write_canonical_json(out, item)?;
            }
            out.push(b'}');
        }
        scalar => serde_json::to_writer(&mut *out, scalar).map_err(io::Error::from)?,
    }
    Ok(())
}

fn write_prefixed<W: Write>(out: &mut W, tag: u8, body: &[u8]) -> io::Result<()> {
    let len = u32::try_from(body.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "key value longer than 4 GiB"))?;
    out.write_all(&[tag])?;
    out.write_all(&len.to_be_bytes())?;
    out.write_all(body)
}

/// Records the raw bytes written by a `Hash` impl.
#[derive(Default)]
struct ByteSink(Vec<u8>);

impl Hasher for ByteSink {
    fn finish(&self) -> u64 {
        0
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }
}

macro_rules! key_value_from {
    ($variant:ident as $target:ty: $($source:ty),+) => {
        $(
            impl From<$source> for KeyValue {
                fn from(v: $source) -> Self {
                    Self::$variant(<$target>::from(v))
                }
            }
        )+
    };
}

key_value_from!(Int as i64: i8, i16, i32, i64);
key_value_from!(UInt as u64: u8, u16, u32, u64);
key_value_from!(Float as f64: f32, f64);

impl From<bool> for KeyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&[u8]> for KeyValue {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for KeyValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<serde_json::Value> for KeyValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<DateTime<Utc>> for KeyValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Int(v.timestamp_millis())
    }
}

/// Encode an ordered key tuple into the byte form that gets hashed.
pub fn encode_key_tuple(values: &[KeyValue]) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(values.len() * 9);
    for value in values {
        value.encode(&mut buf)?;
    }
    Ok(buf)
}

/// Derive the cache key for an ordered key tuple.
///
/// Pure: equal tuples (by value and position) give equal keys in every
/// process.
pub fn derive_key(values: &[KeyValue]) -> io::Result<CacheKey> {
    let buf = encode_key_tuple(values)?;
    let hash = murmur3::murmur3_x64_128(&mut Cursor::new(buf), HASH_SEED)?;
    Ok(CacheKey(hash as u64 as i64))
}
