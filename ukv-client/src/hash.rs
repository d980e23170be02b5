//! # Hash-Field Operations
//!
//! Field-level reads and writes on hash keys. Writes with a non-zero TTL
//! take two round trips: the mutation, then a whole-key `PEXPIRE` that is
//! skipped when the mutation failed or did not happen.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use ukv_common::{CacheError, CacheResult, Reply, WireCommand};

use crate::client::{expect_int, ttl_millis, unexpected, validate_key, CacheClient};
use crate::codec::encode;
use crate::context::CallContext;
use crate::telemetry::instrument;

/// Value written into a hash field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Stored verbatim.
    Text(String),
    /// Codec-encoded bytes.
    Encoded(Vec<u8>),
}

impl FieldValue {
    /// Encodes any serializable value with the codec.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> CacheResult<Self> {
        Ok(FieldValue::Encoded(encode(value)?))
    }

    fn as_bytes(&self) -> &[u8] {
        match self {
            FieldValue::Text(text) => text.as_bytes(),
            FieldValue::Encoded(bytes) => bytes,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        FieldValue::Text(text.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(text: String) -> Self {
        FieldValue::Text(text)
    }
}

impl CacheClient {
    /// Sets one field. Returns true when the field was created.
    pub async fn set_field(
        &self,
        ctx: &CallContext,
        key: &str,
        field: &str,
        value: impl Into<FieldValue>,
        ttl: Duration,
    ) -> CacheResult<bool> {
        let value = value.into();
        instrument("hash", "set_field", async {
            validate_field(key, field)?;
            let ttl = ttl_millis(ttl)?;
            let command = WireCommand::new("HSET").arg(key).arg(field).arg(value.as_bytes());
            let created = expect_int("HSET", &self.round_trip(ctx, command).await?)? > 0;
            self.expire_after_write(ctx, key, ttl).await?;
            Ok(created)
        })
        .await
    }

    /// Sets one field only when it is absent. Returns true when written.
    ///
    /// The TTL is applied only when the field was written.
    pub async fn set_field_if_absent(
        &self,
        ctx: &CallContext,
        key: &str,
        field: &str,
        value: impl Into<FieldValue>,
        ttl: Duration,
    ) -> CacheResult<bool> {
        let value = value.into();
        instrument("hash", "set_field_if_absent", async {
            validate_field(key, field)?;
            let ttl = ttl_millis(ttl)?;
            let command = WireCommand::new("HSETNX").arg(key).arg(field).arg(value.as_bytes());
            let written = expect_int("HSETNX", &self.round_trip(ctx, command).await?)? == 1;
            if written {
                self.expire_after_write(ctx, key, ttl).await?;
            }
            Ok(written)
        })
        .await
    }

    /// Sets several fields at once. Returns the number of fields created.
    pub async fn set_fields<I, F, V>(
        &self,
        ctx: &CallContext,
        key: &str,
        fields: I,
        ttl: Duration,
    ) -> CacheResult<u64>
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<FieldValue>,
    {
        let fields: Vec<(String, FieldValue)> = fields
            .into_iter()
            .map(|(field, value)| (field.into(), value.into()))
            .collect();
        instrument("hash", "set_fields", async {
            validate_key(key)?;
            if fields.is_empty() {
                return Err(CacheError::Validation("set_fields needs at least one field".into()));
            }
            for (field, _) in &fields {
                validate_field(key, field)?;
            }
            let ttl = ttl_millis(ttl)?;

            let mut command = WireCommand::new("HSET").arg(key);
            for (field, value) in &fields {
                command = command.arg(field).arg(value.as_bytes());
            }
            let created = expect_int("HSET", &self.round_trip(ctx, command).await?)?;
            self.expire_after_write(ctx, key, ttl).await?;
            Ok(created.max(0) as u64)
        })
        .await
    }

    /// Reads one field.
    pub async fn get_field(&self, ctx: &CallContext, key: &str, field: &str) -> CacheResult<String> {
        instrument("hash", "get_field", async {
            validate_field(key, field)?;
            let reply = self
                .round_trip(ctx, WireCommand::new("HGET").arg(key).arg(field))
                .await?;
            match reply {
                Reply::Bulk(None) => Err(CacheError::NotFound),
                other => field_text("HGET", other),
            }
        })
        .await
    }

    /// Reads several fields; absent fields map to `None`.
    pub async fn get_fields(
        &self,
        ctx: &CallContext,
        key: &str,
        fields: &[&str],
    ) -> CacheResult<HashMap<String, Option<String>>> {
        instrument("hash", "get_fields", async {
            for field in fields {
                validate_field(key, field)?;
            }
            if fields.is_empty() {
                return Ok(HashMap::new());
            }
            let reply = self
                .round_trip(ctx, WireCommand::new("HMGET").arg(key).args(fields))
                .await?;
            let values = match reply {
                Reply::Array(values) if values.len() == fields.len() => values,
                other => return Err(unexpected("HMGET", &other)),
            };
            fields
                .iter()
                .zip(values)
                .map(|(field, value)| -> CacheResult<(String, Option<String>)> {
                    let value = match value {
                        Reply::Bulk(None) => None,
                        other => Some(field_text("HMGET", other)?),
                    };
                    Ok((field.to_string(), value))
                })
                .collect()
        })
        .await
    }

    /// Reads every field of a hash. A missing key yields an empty map.
    pub async fn get_all_fields(&self, ctx: &CallContext, key: &str) -> CacheResult<HashMap<String, String>> {
        instrument("hash", "get_all_fields", async {
            validate_key(key)?;
            let reply = self.round_trip(ctx, WireCommand::new("HGETALL").arg(key)).await?;
            let items = match reply {
                Reply::Array(items) if items.len() % 2 == 0 => items,
                other => return Err(unexpected("HGETALL", &other)),
            };
            let mut out = HashMap::with_capacity(items.len() / 2);
            let mut items = items.into_iter();
            while let (Some(field), Some(value)) = (items.next(), items.next()) {
                out.insert(field_text("HGETALL", field)?, field_text("HGETALL", value)?);
            }
            Ok(out)
        })
        .await
    }

    /// Adds `delta` to an integer field and returns the new value as text.
    pub async fn increment_field(
        &self,
        ctx: &CallContext,
        key: &str,
        field: &str,
        delta: i64,
    ) -> CacheResult<String> {
        instrument("hash", "increment_field", async {
            validate_field(key, field)?;
            let command = WireCommand::new("HINCRBY").arg(key).arg(field).arg_int(delta);
            let value = expect_int("HINCRBY", &self.round_trip(ctx, command).await?)?;
            Ok(value.to_string())
        })
        .await
    }

    async fn expire_after_write(&self, ctx: &CallContext, key: &str, ttl: Option<u64>) -> CacheResult<()> {
        let Some(millis) = ttl else {
            return Ok(());
        };
        self.round_trip(ctx, WireCommand::new("PEXPIRE").arg(key).arg(millis.to_string()))
            .await
            .map(|_| ())
    }
}

fn validate_field(key: &str, field: &str) -> CacheResult<()> {
    validate_key(key)?;
    if field.is_empty() {
        return Err(CacheError::Validation("field must not be empty".into()));
    }
    Ok(())
}

fn field_text(op: &str, reply: Reply) -> CacheResult<String> {
    match reply {
        Reply::Bulk(Some(bytes)) | Reply::Simple(bytes) => {
            String::from_utf8(bytes).map_err(|err| CacheError::Decode(err.to_string()))
        }
        Reply::Integer(value) => Ok(value.to_string()),
        other => Err(unexpected(op, &other)),
    }
}
