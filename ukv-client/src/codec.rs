//! # Value Codec
//!
//! Purpose: Round-trip caller values through stored bytes using JSON, and
//! expose the typed read variants of the client.
//!
//! ## Design Principles
//! 1. **One Encoding**: Every value is stored as `serde_json` bytes.
//! 2. **Shape at the Call Site**: Callers name the target type (`get::<T>`)
//!    or pass a [`Shape`] and get a tagged [`TypedValue`] back.
//! 3. **Zero Values Are Values**: A stored `0`, `""`, `false`, `{}` or `[]`
//!    decodes successfully; only an absent key is `NotFound`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use ukv_common::{CacheError, CacheResult, Reply, WireCommand};

use crate::client::{ttl_millis, validate_key, CacheClient};
use crate::context::CallContext;
use crate::telemetry::instrument;

/// Serializes a value into stored bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CacheResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|err| CacheError::Encode(err.to_string()))
}

/// Deserializes stored bytes into `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CacheResult<T> {
    serde_json::from_slice(bytes).map_err(|err| CacheError::Decode(err.to_string()))
}

/// Target shape for [`CacheClient::get_as`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// JSON object.
    Record,
    /// JSON array.
    Sequence,
    Bool,
    /// Signed 64-bit integer.
    Int,
    /// Unsigned 64-bit integer.
    UInt,
    Float,
    Text,
}

/// Value decoded into a requested [`Shape`].
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Record(Map<String, Value>),
    Sequence(Vec<Value>),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl TypedValue {
    /// Decodes stored bytes and converts them into `shape`.
    ///
    /// Numbers convert between scalar shapes only when representable:
    /// `3.0` is a valid `Int`, `3.5` and `-1` as `UInt` are not.
    pub fn decode(bytes: &[u8], shape: Shape) -> CacheResult<Self> {
        let value: Value = decode(bytes)?;
        let mismatch = |value: &Value| {
            CacheError::Decode(format!("expected {:?}, found {}", shape, kind_of(value)))
        };

        match (shape, value) {
            (Shape::Record, Value::Object(map)) => Ok(TypedValue::Record(map)),
            (Shape::Sequence, Value::Array(items)) => Ok(TypedValue::Sequence(items)),
            (Shape::Bool, Value::Bool(flag)) => Ok(TypedValue::Bool(flag)),
            (Shape::Text, Value::String(text)) => Ok(TypedValue::Text(text)),
            (Shape::Int, Value::Number(number)) => number
                .as_i64()
                .or_else(|| number.as_f64().and_then(whole_i64))
                .map(TypedValue::Int)
                .ok_or_else(|| CacheError::Decode(format!("{} is not an Int", number))),
            (Shape::UInt, Value::Number(number)) => number
                .as_u64()
                .or_else(|| number.as_f64().and_then(whole_u64))
                .map(TypedValue::UInt)
                .ok_or_else(|| CacheError::Decode(format!("{} is not a UInt", number))),
            (Shape::Float, Value::Number(number)) => number
                .as_f64()
                .map(TypedValue::Float)
                .ok_or_else(|| CacheError::Decode(format!("{} is not a Float", number))),
            (_, other) => Err(mismatch(&other)),
        }
    }
}

fn whole_i64(value: f64) -> Option<i64> {
    (value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64)
        .then_some(value as i64)
}

fn whole_u64(value: f64) -> Option<u64> {
    (value.fract() == 0.0 && value >= 0.0 && value < u64::MAX as f64).then_some(value as u64)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl CacheClient {
    /// Stores `value` under `key`. A zero `ttl` means no expiration.
    pub async fn set<T>(&self, ctx: &CallContext, key: &str, value: &T, ttl: Duration) -> CacheResult<()>
    where
        T: Serialize + ?Sized,
    {
        instrument("codec", "set", async {
            validate_key(key)?;
            let ttl = ttl_millis(ttl)?;
            let payload = encode(value)?;
            let mut command = WireCommand::new("SET").arg(key).arg(payload);
            if let Some(millis) = ttl {
                command = command.arg("PX").arg(millis.to_string());
            }
            self.round_trip(ctx, command).await.map(|_| ())
        })
        .await
    }

    /// Reads and decodes the value under `key`.
    pub async fn get<T: DeserializeOwned>(&self, ctx: &CallContext, key: &str) -> CacheResult<T> {
        instrument("codec", "get", async {
            let bytes = self.get_bytes(ctx, key).await?;
            decode(&bytes)
        })
        .await
    }

    /// Decodes the value under `key` into `sink`.
    ///
    /// On any error, including `NotFound`, `sink` is left unchanged.
    pub async fn get_into<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        key: &str,
        sink: &mut T,
    ) -> CacheResult<()> {
        instrument("codec", "get_into", async {
            let bytes = self.get_bytes(ctx, key).await?;
            *sink = decode(&bytes)?;
            Ok(())
        })
        .await
    }

    /// Reads the value under `key` and converts it into `shape`.
    pub async fn get_as(&self, ctx: &CallContext, key: &str, shape: Shape) -> CacheResult<TypedValue> {
        instrument("codec", "get_as", async {
            let bytes = self.get_bytes(ctx, key).await?;
            TypedValue::decode(&bytes, shape)
        })
        .await
    }

    async fn get_bytes(&self, ctx: &CallContext, key: &str) -> CacheResult<Vec<u8>> {
        validate_key(key)?;
        match self.round_trip(ctx, WireCommand::new("GET").arg(key)).await? {
            Reply::Bulk(Some(bytes)) => Ok(bytes),
            Reply::Bulk(None) => Err(CacheError::NotFound),
            other => Err(crate::client::unexpected("GET", &other)),
        }
    }
}
