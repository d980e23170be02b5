//! # Command Batches
//!
//! Purpose: Queue typed commands and send them to the backend in a single
//! round trip, either pipelined or as a MULTI/EXEC transaction, then turn
//! the raw replies into per-command results.
//!
//! ## Design Principles
//! 1. **Typed Descriptors**: [`Command`] is a tagged union with typed fields;
//!    it is validated before it enters a batch.
//! 2. **Single Use**: A [`Batch`] moves `Building -> Executed | Discarded`
//!    and rejects every call after that with `BatchClosed`.
//! 3. **Per-Command Isolation**: A server error for one command lands in
//!    that command's [`CommandResult`]; only a failed round trip fails the
//!    whole batch.
//! 4. **Shape-Driven Normalization**: Replies are flattened into
//!    [`ResultValue`] sequences by their shape, falling back to the raw reply.
//!
//! ## Lifecycle
//!
//! ```text
//! client.transaction("session-1")
//!   └─ Building ── add / add_dynamic ──┐
//!        │  ▲─────────────────────────┘
//!        ├── execute ──► Executed  (one round trip, even on failure)
//!        └── discard ──► Discarded
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use ukv_common::{BatchMode, CacheError, CacheResult, Reply, WireCommand};

use crate::client::{ttl_millis, validate_key, CacheClient};
use crate::codec::{decode, encode};
use crate::context::CallContext;
use crate::telemetry::instrument;

/// Registered command kinds, addressable by name from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Get,
    AddMemberWithScore,
    GetMembersWithScore,
    RemoveMembersWithScore,
    Expire,
    SetIfAbsent,
    Increment,
    Delete,
}

impl CommandKind {
    /// Every registered kind.
    pub const ALL: [CommandKind; 8] = [
        CommandKind::Get,
        CommandKind::AddMemberWithScore,
        CommandKind::GetMembersWithScore,
        CommandKind::RemoveMembersWithScore,
        CommandKind::Expire,
        CommandKind::SetIfAbsent,
        CommandKind::Increment,
        CommandKind::Delete,
    ];

    /// Registered name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Get => "Get",
            CommandKind::AddMemberWithScore => "AddMemberWithScore",
            CommandKind::GetMembersWithScore => "GetMembersWithScore",
            CommandKind::RemoveMembersWithScore => "RemoveMembersWithScore",
            CommandKind::Expire => "Expire",
            CommandKind::SetIfAbsent => "SetIfAbsent",
            CommandKind::Increment => "Increment",
            CommandKind::Delete => "Delete",
        }
    }

    /// Number of arguments a dynamic entry of this kind takes, key included.
    pub fn arity(&self) -> usize {
        match self {
            CommandKind::Get | CommandKind::Increment | CommandKind::Delete => 1,
            CommandKind::AddMemberWithScore
            | CommandKind::GetMembersWithScore
            | CommandKind::RemoveMembersWithScore
            | CommandKind::Expire => 3,
            CommandKind::SetIfAbsent => 4,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = CacheError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        CommandKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| CacheError::UnsupportedCommand(name.to_string()))
    }
}

/// A validated, typed command descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Read a string value.
    Get { key: String },
    /// Add or update a sorted-set member.
    AddMemberWithScore { key: String, member: String, score: f64 },
    /// Read sorted-set members with scores by rank range (inclusive).
    GetMembersWithScore { key: String, min_rank: i64, max_rank: i64 },
    /// Remove sorted-set members whose score lies within the bounds.
    ///
    /// Bounds are numbers, `(number` for exclusive, `-inf` or `+inf`.
    RemoveMembersWithScore {
        key: String,
        min_score: String,
        max_score: String,
    },
    /// Set the key TTL to `ttl_count × ttl_unit`.
    Expire {
        key: String,
        ttl_count: u32,
        ttl_unit: Duration,
    },
    /// Store already-encoded bytes when the key is absent.
    SetIfAbsent {
        key: String,
        value: Vec<u8>,
        ttl_count: u32,
        ttl_unit: Duration,
    },
    /// Increment an integer value by one.
    Increment { key: String },
    /// Remove a key.
    Delete { key: String },
}

impl Command {
    pub fn get(key: impl Into<String>) -> Self {
        Command::Get { key: key.into() }
    }

    pub fn add_member_with_score(key: impl Into<String>, member: impl Into<String>, score: f64) -> Self {
        Command::AddMemberWithScore {
            key: key.into(),
            member: member.into(),
            score,
        }
    }

    pub fn get_members_with_score(key: impl Into<String>, min_rank: i64, max_rank: i64) -> Self {
        Command::GetMembersWithScore {
            key: key.into(),
            min_rank,
            max_rank,
        }
    }

    pub fn remove_members_with_score(
        key: impl Into<String>,
        min_score: impl Into<String>,
        max_score: impl Into<String>,
    ) -> Self {
        Command::RemoveMembersWithScore {
            key: key.into(),
            min_score: min_score.into(),
            max_score: max_score.into(),
        }
    }

    pub fn expire(key: impl Into<String>, ttl_count: u32, ttl_unit: Duration) -> Self {
        Command::Expire {
            key: key.into(),
            ttl_count,
            ttl_unit,
        }
    }

    /// Encodes `value` with the codec into a `SetIfAbsent` command.
    pub fn set_if_absent<T: Serialize + ?Sized>(
        key: impl Into<String>,
        value: &T,
        ttl_count: u32,
        ttl_unit: Duration,
    ) -> CacheResult<Self> {
        Ok(Command::SetIfAbsent {
            key: key.into(),
            value: encode(value)?,
            ttl_count,
            ttl_unit,
        })
    }

    pub fn increment(key: impl Into<String>) -> Self {
        Command::Increment { key: key.into() }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Command::Delete { key: key.into() }
    }

    /// Builds a command from a registered kind name and loosely typed
    /// arguments, the key first.
    pub fn from_dynamic(kind: &str, args: &[ArgValue]) -> CacheResult<Self> {
        let kind: CommandKind = kind.parse()?;
        if args.len() != kind.arity() {
            return Err(CacheError::Validation(format!(
                "{} takes {} arguments, got {}",
                kind,
                kind.arity(),
                args.len()
            )));
        }
        let args = DynamicArgs { kind, args };
        let key = args.text(0)?;

        Ok(match kind {
            CommandKind::Get => Command::Get { key },
            CommandKind::Increment => Command::Increment { key },
            CommandKind::Delete => Command::Delete { key },
            CommandKind::AddMemberWithScore => Command::AddMemberWithScore {
                key,
                member: args.text(1)?,
                score: args.float(2)?,
            },
            CommandKind::GetMembersWithScore => Command::GetMembersWithScore {
                key,
                min_rank: args.int(1)?,
                max_rank: args.int(2)?,
            },
            CommandKind::RemoveMembersWithScore => Command::RemoveMembersWithScore {
                key,
                min_score: args.bound(1)?,
                max_score: args.bound(2)?,
            },
            CommandKind::Expire => Command::Expire {
                key,
                ttl_count: args.count(1)?,
                ttl_unit: args.duration(2)?,
            },
            CommandKind::SetIfAbsent => Command::SetIfAbsent {
                key,
                value: args.payload(1)?,
                ttl_count: args.count(2)?,
                ttl_unit: args.duration(3)?,
            },
        })
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Get { .. } => CommandKind::Get,
            Command::AddMemberWithScore { .. } => CommandKind::AddMemberWithScore,
            Command::GetMembersWithScore { .. } => CommandKind::GetMembersWithScore,
            Command::RemoveMembersWithScore { .. } => CommandKind::RemoveMembersWithScore,
            Command::Expire { .. } => CommandKind::Expire,
            Command::SetIfAbsent { .. } => CommandKind::SetIfAbsent,
            Command::Increment { .. } => CommandKind::Increment,
            Command::Delete { .. } => CommandKind::Delete,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Command::Get { key }
            | Command::AddMemberWithScore { key, .. }
            | Command::GetMembersWithScore { key, .. }
            | Command::RemoveMembersWithScore { key, .. }
            | Command::Expire { key, .. }
            | Command::SetIfAbsent { key, .. }
            | Command::Increment { key }
            | Command::Delete { key } => key,
        }
    }

    /// Checks field constraints without touching the network.
    pub fn validate(&self) -> CacheResult<()> {
        validate_key(self.key())?;
        match self {
            Command::AddMemberWithScore { score, .. } if !score.is_finite() => Err(
                CacheError::Validation(format!("score must be finite, got {}", score)),
            ),
            Command::RemoveMembersWithScore {
                min_score,
                max_score,
                ..
            } => {
                for bound in [min_score, max_score] {
                    if !is_score_bound(bound) {
                        return Err(CacheError::Validation(format!(
                            "invalid score bound {:?}",
                            bound
                        )));
                    }
                }
                Ok(())
            }
            Command::Expire {
                ttl_count,
                ttl_unit,
                ..
            }
            | Command::SetIfAbsent {
                ttl_count,
                ttl_unit,
                ..
            } => scaled_ttl(*ttl_count, *ttl_unit).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Wire form of the command. Call after `validate`.
    fn to_wire(&self) -> CacheResult<WireCommand> {
        Ok(match self {
            Command::Get { key } => WireCommand::new("GET").arg(key),
            Command::AddMemberWithScore { key, member, score } => WireCommand::new("ZADD")
                .arg(key)
                .arg(score.to_string())
                .arg(member),
            Command::GetMembersWithScore {
                key,
                min_rank,
                max_rank,
            } => WireCommand::new("ZRANGE")
                .arg(key)
                .arg_int(*min_rank)
                .arg_int(*max_rank)
                .arg("WITHSCORES"),
            Command::RemoveMembersWithScore {
                key,
                min_score,
                max_score,
            } => WireCommand::new("ZREMRANGEBYSCORE")
                .arg(key)
                .arg(min_score)
                .arg(max_score),
            Command::Expire {
                key,
                ttl_count,
                ttl_unit,
            } => {
                let millis = scaled_ttl(*ttl_count, *ttl_unit)?.unwrap_or(0);
                WireCommand::new("PEXPIRE").arg(key).arg(millis.to_string())
            }
            Command::SetIfAbsent {
                key,
                value,
                ttl_count,
                ttl_unit,
            } => {
                let command = WireCommand::new("SET").arg(key).arg(value).arg("NX");
                match scaled_ttl(*ttl_count, *ttl_unit)? {
                    Some(millis) => command.arg("PX").arg(millis.to_string()),
                    None => command,
                }
            }
            Command::Increment { key } => WireCommand::new("INCR").arg(key),
            Command::Delete { key } => WireCommand::new("DEL").arg(key),
        })
    }
}

/// `count × unit` in milliseconds, `None` when zero.
fn scaled_ttl(count: u32, unit: Duration) -> CacheResult<Option<u64>> {
    let ttl = unit.checked_mul(count).ok_or_else(|| {
        CacheError::Validation(format!("ttl {} × {:?} overflows", count, unit))
    })?;
    ttl_millis(ttl)
}

fn is_score_bound(bound: &str) -> bool {
    let number = bound.strip_prefix('(').unwrap_or(bound);
    match number {
        "-inf" | "+inf" | "inf" => true,
        _ => number.parse::<f64>().map_or(false, |value| !value.is_nan()),
    }
}

/// Loosely typed argument for [`Command::from_dynamic`].
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Text(String),
    Int(i64),
    Float(f64),
    Duration(Duration),
    /// Already-encoded payload, stored verbatim.
    Bytes(Vec<u8>),
}

impl ArgValue {
    fn type_name(&self) -> &'static str {
        match self {
            ArgValue::Text(_) => "text",
            ArgValue::Int(_) => "int",
            ArgValue::Float(_) => "float",
            ArgValue::Duration(_) => "duration",
            ArgValue::Bytes(_) => "bytes",
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Text(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Text(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Int(value)
    }
}

impl From<u32> for ArgValue {
    fn from(value: u32) -> Self {
        ArgValue::Int(i64::from(value))
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::Float(value)
    }
}

impl From<Duration> for ArgValue {
    fn from(value: Duration) -> Self {
        ArgValue::Duration(value)
    }
}

impl From<Vec<u8>> for ArgValue {
    fn from(value: Vec<u8>) -> Self {
        ArgValue::Bytes(value)
    }
}

struct DynamicArgs<'a> {
    kind: CommandKind,
    args: &'a [ArgValue],
}

impl DynamicArgs<'_> {
    fn wrong_type(&self, idx: usize, expected: &str) -> CacheError {
        CacheError::Validation(format!(
            "{} argument {} must be {}, got {}",
            self.kind,
            idx,
            expected,
            self.args[idx].type_name()
        ))
    }

    fn text(&self, idx: usize) -> CacheResult<String> {
        match &self.args[idx] {
            ArgValue::Text(text) => Ok(text.clone()),
            _ => Err(self.wrong_type(idx, "text")),
        }
    }

    fn int(&self, idx: usize) -> CacheResult<i64> {
        match &self.args[idx] {
            ArgValue::Int(value) => Ok(*value),
            ArgValue::Text(text) => text.parse().map_err(|_| self.wrong_type(idx, "an integer")),
            _ => Err(self.wrong_type(idx, "an integer")),
        }
    }

    fn float(&self, idx: usize) -> CacheResult<f64> {
        match &self.args[idx] {
            ArgValue::Float(value) => Ok(*value),
            ArgValue::Int(value) => Ok(*value as f64),
            _ => Err(self.wrong_type(idx, "a number")),
        }
    }

    fn count(&self, idx: usize) -> CacheResult<u32> {
        let value = self.int(idx)?;
        u32::try_from(value).map_err(|_| self.wrong_type(idx, "a non-negative 32-bit count"))
    }

    fn duration(&self, idx: usize) -> CacheResult<Duration> {
        match &self.args[idx] {
            ArgValue::Duration(value) => Ok(*value),
            _ => Err(self.wrong_type(idx, "a duration")),
        }
    }

    fn bound(&self, idx: usize) -> CacheResult<String> {
        match &self.args[idx] {
            ArgValue::Text(text) => Ok(text.clone()),
            ArgValue::Int(value) => Ok(value.to_string()),
            ArgValue::Float(value) => Ok(value.to_string()),
            _ => Err(self.wrong_type(idx, "a score bound")),
        }
    }

    fn payload(&self, idx: usize) -> CacheResult<Vec<u8>> {
        match &self.args[idx] {
            ArgValue::Bytes(bytes) => Ok(bytes.clone()),
            ArgValue::Text(text) => encode(text),
            ArgValue::Int(value) => encode(value),
            ArgValue::Float(value) => encode(value),
            ArgValue::Duration(_) => Err(self.wrong_type(idx, "a value")),
        }
    }
}

/// One normalized element of a command result.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    /// Sorted-set member with its score.
    Scored { member: String, score: f64 },
    Text(String),
    Int(i64),
    /// Whether a conditional write happened.
    Bool(bool),
    /// Reply of a shape that has no normalized form.
    Raw(Reply),
}

/// Outcome of one batched command, index-aligned with the batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandResult {
    pub values: Vec<ResultValue>,
    pub error: Option<CacheError>,
}

impl CommandResult {
    fn values(values: Vec<ResultValue>) -> Self {
        CommandResult {
            values,
            error: None,
        }
    }

    fn failed(error: CacheError) -> Self {
        CommandResult {
            values: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Decodes the first text value with the codec, e.g. a `Get` result.
    pub fn decode<T: DeserializeOwned>(&self) -> CacheResult<T> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        match self.values.first() {
            Some(ResultValue::Text(text)) => decode(text.as_bytes()),
            Some(other) => Err(CacheError::Decode(format!("cannot decode {:?}", other))),
            None => Err(CacheError::NotFound),
        }
    }
}

/// Turns one raw reply into the result of `command`.
fn normalize(command: &Command, reply: Reply) -> CommandResult {
    if let Some(message) = reply.error_message() {
        return CommandResult::failed(CacheError::Reply(message));
    }
    match (command, reply) {
        (Command::Get { .. }, Reply::Bulk(None)) => CommandResult::failed(CacheError::NotFound),
        (Command::SetIfAbsent { .. }, Reply::Bulk(None)) => {
            CommandResult::values(vec![ResultValue::Bool(false)])
        }
        (Command::SetIfAbsent { .. }, Reply::Simple(_)) => {
            CommandResult::values(vec![ResultValue::Bool(true)])
        }
        (Command::GetMembersWithScore { .. }, Reply::Array(items)) => match scored(&items) {
            Some(members) => CommandResult::values(members),
            None => CommandResult::values(vec![ResultValue::Raw(Reply::Array(items))]),
        },
        (_, Reply::Array(items)) => match texts(&items) {
            Some(texts) => CommandResult::values(texts),
            None => CommandResult::values(vec![ResultValue::Raw(Reply::Array(items))]),
        },
        (_, Reply::Integer(value)) => CommandResult::values(vec![ResultValue::Int(value)]),
        (_, Reply::Bulk(Some(data))) | (_, Reply::Simple(data)) => match String::from_utf8(data) {
            Ok(text) => CommandResult::values(vec![ResultValue::Text(text)]),
            Err(err) => CommandResult::values(vec![ResultValue::Raw(Reply::bulk(err.into_bytes()))]),
        },
        (_, other) => CommandResult::values(vec![ResultValue::Raw(other)]),
    }
}

/// Flat `[member, score, ...]` or nested `[[member, score], ...]` replies.
fn scored(items: &[Reply]) -> Option<Vec<ResultValue>> {
    let pair = |member: &Reply, score: &Reply| {
        Some(ResultValue::Scored {
            member: member.as_text()?,
            score: parse_score(&score.as_text()?)?,
        })
    };
    match items.first() {
        None => Some(Vec::new()),
        Some(Reply::Array(_)) => items
            .iter()
            .map(|item| match item {
                Reply::Array(inner) if inner.len() == 2 => pair(&inner[0], &inner[1]),
                _ => None,
            })
            .collect(),
        Some(_) if items.len() % 2 == 0 => items
            .chunks(2)
            .map(|chunk| pair(&chunk[0], &chunk[1]))
            .collect(),
        Some(_) => None,
    }
}

fn texts(items: &[Reply]) -> Option<Vec<ResultValue>> {
    items
        .iter()
        .map(|item| match item {
            Reply::Bulk(Some(_)) | Reply::Simple(_) => item.as_text().map(ResultValue::Text),
            _ => None,
        })
        .collect()
}

fn parse_score(text: &str) -> Option<f64> {
    match text {
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ => text.parse().ok(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    Building,
    Executed,
    Discarded,
}

/// Ordered, single-use sequence of commands sent in one round trip.
#[derive(Debug)]
pub struct Batch {
    client: CacheClient,
    session_id: String,
    mode: BatchMode,
    commands: Vec<Command>,
    state: BatchState,
}

impl CacheClient {
    /// Starts a pipelined batch (one round trip, no atomicity).
    pub fn pipeline(&self, session_id: impl Into<String>) -> Batch {
        Batch::new(self.clone(), session_id.into(), BatchMode::Pipeline)
    }

    /// Starts a transactional batch (one MULTI/EXEC round trip).
    pub fn transaction(&self, session_id: impl Into<String>) -> Batch {
        Batch::new(self.clone(), session_id.into(), BatchMode::Transaction)
    }
}

impl Batch {
    fn new(client: CacheClient, session_id: String, mode: BatchMode) -> Self {
        Batch {
            client,
            session_id,
            mode,
            commands: Vec::new(),
            state: BatchState::Building,
        }
    }

    /// Caller-supplied identifier of the batch.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// True after `execute` or `discard`.
    pub fn is_closed(&self) -> bool {
        self.state != BatchState::Building
    }

    /// Validates and queues a command. A rejected command leaves the batch
    /// unchanged.
    pub fn add(&mut self, command: Command) -> CacheResult<()> {
        self.ensure_building()?;
        command.validate()?;
        self.commands.push(command);
        Ok(())
    }

    /// Parses a command from its registered name and queues it.
    pub fn add_dynamic(&mut self, kind: &str, args: &[ArgValue]) -> CacheResult<()> {
        self.ensure_building()?;
        self.add(Command::from_dynamic(kind, args)?)
    }

    /// Sends every queued command in one round trip.
    ///
    /// The batch is closed afterwards whatever the outcome. A failed round
    /// trip returns one error and no partial results.
    pub async fn execute(&mut self, ctx: &CallContext) -> CacheResult<Vec<CommandResult>> {
        self.ensure_building()?;
        self.state = BatchState::Executed;
        let commands = std::mem::take(&mut self.commands);
        let (client, session_id, mode) = (&self.client, &self.session_id, self.mode);

        instrument("batch", "execute", async move {
            if commands.is_empty() {
                return Ok(Vec::new());
            }
            let wire = commands
                .iter()
                .map(Command::to_wire)
                .collect::<CacheResult<Vec<_>>>()?;
            tracing::debug!(session_id = %session_id, commands = commands.len(), %mode, "executing batch");

            let replies = client.round_trip_batch(ctx, wire, mode).await.map_err(|err| {
                tracing::warn!(session_id = %session_id, error = %err, "batch round trip failed");
                err
            })?;
            if replies.len() != commands.len() {
                return Err(CacheError::backend(
                    mode.to_string(),
                    format!("expected {} replies, got {}", commands.len(), replies.len()),
                ));
            }
            Ok(commands
                .iter()
                .zip(replies)
                .map(|(command, reply)| normalize(command, reply))
                .collect())
        })
        .await
    }

    /// Drops the queued commands without sending them.
    pub fn discard(&mut self) -> CacheResult<()> {
        self.ensure_building()?;
        self.state = BatchState::Discarded;
        tracing::debug!(session_id = %self.session_id, commands = self.commands.len(), "batch discarded");
        self.commands.clear();
        Ok(())
    }

    fn ensure_building(&self) -> CacheResult<()> {
        match self.state {
            BatchState::Building => Ok(()),
            BatchState::Executed => Err(CacheError::BatchClosed { state: "executed" }),
            BatchState::Discarded => Err(CacheError::BatchClosed { state: "discarded" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_by_name() {
        for kind in CommandKind::ALL {
            assert_eq!(kind.as_str().parse::<CommandKind>(), Ok(kind));
        }
        assert_eq!(
            "Rename".parse::<CommandKind>(),
            Err(CacheError::UnsupportedCommand("Rename".into()))
        );
    }

    #[test]
    fn validation_rules() {
        assert!(Command::get("").validate().is_err());
        assert!(Command::add_member_with_score("z", "m", f64::NAN)
            .validate()
            .is_err());
        assert!(Command::remove_members_with_score("z", "(1", "+inf")
            .validate()
            .is_ok());
        assert!(Command::remove_members_with_score("z", "low", "5")
            .validate()
            .is_err());
        assert!(Command::expire("k", 1, Duration::from_micros(10))
            .validate()
            .is_err());
        assert!(Command::expire("k", u32::MAX, Duration::MAX).validate().is_err());
        assert!(Command::expire("k", 0, Duration::from_secs(1)).validate().is_ok());
    }

    #[test]
    fn wire_forms() {
        let expire = Command::expire("k", 3, Duration::from_secs(1)).to_wire().unwrap();
        assert_eq!(expire, WireCommand::new("PEXPIRE").arg("k").arg("3000"));

        let setnx = Command::set_if_absent("k", "v", 2, Duration::from_millis(500))
            .unwrap()
            .to_wire()
            .unwrap();
        assert_eq!(
            setnx,
            WireCommand::new("SET").arg("k").arg("\"v\"").arg("NX").arg("PX").arg("1000")
        );

        let zadd = Command::add_member_with_score("z", "m", 1.5).to_wire().unwrap();
        assert_eq!(zadd, WireCommand::new("ZADD").arg("z").arg("1.5").arg("m"));
    }

    #[test]
    fn dynamic_arguments_are_checked() {
        let cmd = Command::from_dynamic(
            "Expire",
            &[ArgValue::from("k"), ArgValue::from(3u32), ArgValue::from(Duration::from_secs(1))],
        )
        .unwrap();
        assert_eq!(cmd, Command::expire("k", 3, Duration::from_secs(1)));

        let ranks = Command::from_dynamic(
            "GetMembersWithScore",
            &[ArgValue::from("z"), ArgValue::from("0"), ArgValue::from(-1i64)],
        )
        .unwrap();
        assert_eq!(ranks, Command::get_members_with_score("z", 0, -1));

        assert!(matches!(
            Command::from_dynamic("Get", &[]),
            Err(CacheError::Validation(_))
        ));
        assert!(matches!(
            Command::from_dynamic("Expire", &["k".into(), "soon".into(), "later".into()]),
            Err(CacheError::Validation(_))
        ));
    }

    #[test]
    fn normalizes_scored_members() {
        let command = Command::get_members_with_score("z", 0, -1);
        let flat = Reply::Array(vec![
            Reply::bulk("a"),
            Reply::bulk("1"),
            Reply::bulk("b"),
            Reply::bulk("inf"),
        ]);
        assert_eq!(
            normalize(&command, flat).values,
            vec![
                ResultValue::Scored {
                    member: "a".into(),
                    score: 1.0
                },
                ResultValue::Scored {
                    member: "b".into(),
                    score: f64::INFINITY
                },
            ]
        );

        let nested = Reply::Array(vec![Reply::Array(vec![Reply::bulk("a"), Reply::bulk("2.5")])]);
        assert_eq!(
            normalize(&command, nested).values,
            vec![ResultValue::Scored {
                member: "a".into(),
                score: 2.5
            }]
        );
    }

    #[test]
    fn normalizes_scalars_and_errors() {
        let get = Command::get("k");
        assert_eq!(
            normalize(&get, Reply::bulk("\"v\"")).values,
            vec![ResultValue::Text("\"v\"".into())]
        );
        assert_eq!(normalize(&get, Reply::NIL).error, Some(CacheError::NotFound));

        let incr = Command::increment("k");
        assert_eq!(normalize(&incr, Reply::Integer(4)).values, vec![ResultValue::Int(4)]);
        let failed = normalize(&incr, Reply::error("ERR value is not an integer or out of range"));
        assert!(matches!(failed.error, Some(CacheError::Reply(_))));
        assert!(failed.values.is_empty());

        let setnx = Command::set_if_absent("k", &1, 0, Duration::ZERO).unwrap();
        assert_eq!(normalize(&setnx, Reply::NIL).values, vec![ResultValue::Bool(false)]);
    }

    #[test]
    fn unrecognized_shapes_stay_raw() {
        let nested = Reply::Array(vec![Reply::Array(vec![Reply::Integer(1)])]);
        assert_eq!(
            normalize(&Command::delete("k"), nested.clone()).values,
            vec![ResultValue::Raw(nested)]
        );
    }

    #[test]
    fn decode_first_value() {
        let result = CommandResult::values(vec![ResultValue::Text("[1,2]".into())]);
        assert_eq!(result.decode::<Vec<u8>>(), Ok(vec![1, 2]));
        let missing = CommandResult::failed(CacheError::NotFound);
        assert_eq!(missing.decode::<u8>(), Err(CacheError::NotFound));
    }
}
