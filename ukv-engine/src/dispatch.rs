//! # Command Dispatch
//!
//! Map wire commands onto the in-memory store and render Redis-compatible
//! replies, including the exact error texts clients match on.

use std::time::{Duration, Instant};

use bytes::Bytes;
use hashbrown::HashMap;

use ukv_common::{Reply, WireCommand};

use crate::memory::{Data, Entry, MemoryStore, SortedSet};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_INTEGER: &str = "ERR value is not an integer or out of range";
const NOT_FLOAT: &str = "ERR value is not a valid float";
const SYNTAX: &str = "ERR syntax error";

type Args = [Vec<u8>];

/// Executes one command against the store.
pub(crate) fn dispatch(command: &WireCommand, store: &MemoryStore) -> Reply {
    let args = command.arguments();
    match command.name() {
        "PING" => handle_ping(args),
        "GET" => handle_get(args, store),
        "SET" => handle_set(args, store),
        "DEL" => handle_del(args, store),
        "EXISTS" => handle_exists(args, store),
        "EXPIRE" => handle_expire(args, store, Duration::from_secs),
        "PEXPIRE" => handle_expire(args, store, Duration::from_millis),
        "TTL" => handle_ttl(args, store, false),
        "PTTL" => handle_ttl(args, store, true),
        "INCR" => handle_incr(args, store),
        "MGET" => handle_mget(args, store),
        "RENAME" => handle_rename(args, store),
        "STRLEN" => handle_strlen(args, store),
        "TYPE" => handle_type(args, store),
        "DEBUG" => handle_debug(args, store),
        "SCAN" => handle_scan(args, store),
        "ZADD" => handle_zadd(args, store),
        "ZRANGE" => handle_zrange(args, store),
        "ZREMRANGEBYSCORE" => handle_zremrangebyscore(args, store),
        "HSET" => handle_hset(args, store, false),
        "HSETNX" => handle_hset(args, store, true),
        "HGET" => handle_hget(args, store),
        "HGETALL" => handle_hgetall(args, store),
        "HINCRBY" => handle_hincrby(args, store),
        "HMGET" => handle_hmget(args, store),
        other => Reply::error(format!("ERR unknown command '{}'", other)),
    }
}

fn arity(name: &str) -> Reply {
    Reply::error(format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn handle_ping(args: &Args) -> Reply {
    match args {
        [] => Reply::Simple(b"PONG".to_vec()),
        [payload] => Reply::bulk(payload.clone()),
        _ => arity("PING"),
    }
}

fn handle_get(args: &Args, store: &MemoryStore) -> Reply {
    let [key] = args else {
        return arity("GET");
    };
    store.read(key, |entry| match entry.map(|e| &e.data) {
        None => Reply::NIL,
        Some(Data::Str(value)) => Reply::bulk(value.to_vec()),
        Some(_) => Reply::error(WRONGTYPE),
    })
}

fn handle_set(args: &Args, store: &MemoryStore) -> Reply {
    if args.len() < 2 {
        return arity("SET");
    }
    let (key, value) = (&args[0], &args[1]);

    let mut ttl = None;
    let mut only_if_absent = false;
    let mut idx = 2;
    while idx < args.len() {
        let option = args[idx].to_ascii_uppercase();
        match option.as_slice() {
            b"NX" => {
                only_if_absent = true;
                idx += 1;
            }
            b"EX" | b"PX" => {
                let Some(raw) = args.get(idx + 1) else {
                    return Reply::error(SYNTAX);
                };
                let amount = match parse_i64(raw) {
                    Ok(amount) if amount > 0 => amount as u64,
                    Ok(_) => return Reply::error("ERR invalid expire time in 'set' command"),
                    Err(reply) => return reply,
                };
                ttl = Some(if option == b"EX" {
                    Duration::from_secs(amount)
                } else {
                    Duration::from_millis(amount)
                });
                idx += 2;
            }
            _ => return Reply::error(SYNTAX),
        }
    }

    let value = Bytes::copy_from_slice(value);
    store.update(key, |slot| {
        if only_if_absent && slot.is_some() {
            return Reply::NIL;
        }
        let mut entry = Entry::new(Data::Str(value));
        entry.expires_at = ttl.map(|ttl| Instant::now() + ttl);
        *slot = Some(entry);
        Reply::ok()
    })
}

fn handle_del(args: &Args, store: &MemoryStore) -> Reply {
    if args.is_empty() {
        return arity("DEL");
    }
    let removed = args.iter().filter(|key| store.take(key).is_some()).count();
    Reply::Integer(removed as i64)
}

fn handle_exists(args: &Args, store: &MemoryStore) -> Reply {
    if args.is_empty() {
        return arity("EXISTS");
    }
    let found = args
        .iter()
        .filter(|key| store.read(key, |entry| entry.is_some()))
        .count();
    Reply::Integer(found as i64)
}

fn handle_expire(args: &Args, store: &MemoryStore, unit: fn(u64) -> Duration) -> Reply {
    let [key, amount] = args else {
        return arity("EXPIRE");
    };
    let amount = match parse_i64(amount) {
        Ok(amount) => amount,
        Err(reply) => return reply,
    };

    store.update(key, |slot| {
        if slot.is_none() {
            return Reply::Integer(0);
        }
        if amount <= 0 {
            // Non-positive TTLs delete the key.
            *slot = None;
        } else if let Some(entry) = slot {
            entry.expires_at = Some(Instant::now() + unit(amount as u64));
        }
        Reply::Integer(1)
    })
}

fn handle_ttl(args: &Args, store: &MemoryStore, millis: bool) -> Reply {
    let [key] = args else {
        return arity(if millis { "PTTL" } else { "TTL" });
    };
    let now = Instant::now();
    store.read(key, |entry| match entry {
        None => Reply::Integer(-2),
        Some(Entry {
            expires_at: None, ..
        }) => Reply::Integer(-1),
        Some(Entry {
            expires_at: Some(deadline),
            ..
        }) => {
            let remaining = deadline.saturating_duration_since(now).as_millis() as i64;
            if millis {
                Reply::Integer(remaining)
            } else {
                // Round to the nearest second like the server does.
                Reply::Integer((remaining + 500) / 1000)
            }
        }
    })
}

fn handle_incr(args: &Args, store: &MemoryStore) -> Reply {
    let [key] = args else {
        return arity("INCR");
    };
    store.update(key, |slot| {
        let current = match slot.as_ref().map(|entry| &entry.data) {
            None => 0,
            Some(Data::Str(value)) => match parse_i64(value) {
                Ok(current) => current,
                Err(_) => return Reply::error(NOT_INTEGER),
            },
            Some(_) => return Reply::error(WRONGTYPE),
        };
        let Some(next) = current.checked_add(1) else {
            return Reply::error("ERR increment or decrement would overflow");
        };
        let rendered = Bytes::from(next.to_string());
        match slot {
            Some(entry) => entry.data = Data::Str(rendered),
            None => *slot = Some(Entry::new(Data::Str(rendered))),
        }
        Reply::Integer(next)
    })
}

fn handle_mget(args: &Args, store: &MemoryStore) -> Reply {
    if args.is_empty() {
        return arity("MGET");
    }
    Reply::Array(
        args.iter()
            .map(|key| {
                store.read(key, |entry| match entry.map(|e| &e.data) {
                    Some(Data::Str(value)) => Reply::bulk(value.to_vec()),
                    _ => Reply::NIL,
                })
            })
            .collect(),
    )
}

fn handle_rename(args: &Args, store: &MemoryStore) -> Reply {
    let [from, to] = args else {
        return arity("RENAME");
    };
    match store.take(from) {
        Some(entry) => {
            store.put(to, entry);
            Reply::ok()
        }
        None => Reply::error("ERR no such key"),
    }
}

fn handle_strlen(args: &Args, store: &MemoryStore) -> Reply {
    let [key] = args else {
        return arity("STRLEN");
    };
    store.read(key, |entry| match entry.map(|e| &e.data) {
        None => Reply::Integer(0),
        Some(Data::Str(value)) => Reply::Integer(value.len() as i64),
        Some(_) => Reply::error(WRONGTYPE),
    })
}

fn handle_type(args: &Args, store: &MemoryStore) -> Reply {
    let [key] = args else {
        return arity("TYPE");
    };
    let name = store.read(key, |entry| entry.map_or("none", |e| e.data.type_name()));
    Reply::Simple(name.as_bytes().to_vec())
}

/// `DEBUG OBJECT key`, the only DEBUG subcommand served here.
fn handle_debug(args: &Args, store: &MemoryStore) -> Reply {
    let [subcommand, key] = args else {
        return arity("DEBUG");
    };
    if !subcommand.eq_ignore_ascii_case(b"OBJECT") {
        return Reply::error("ERR DEBUG subcommand not supported");
    }
    let described = store.read(key, |entry| {
        entry.map(|entry| {
            let (encoding, length) = match &entry.data {
                Data::Str(value) if parse_i64(value).is_ok() => ("int", value.len()),
                Data::Str(value) if value.len() <= 44 => ("embstr", value.len()),
                Data::Str(value) => ("raw", value.len()),
                Data::Hash(fields) => ("hashtable", fields.len()),
                Data::ZSet(set) => ("skiplist", set.len()),
            };
            format!(
                "Value at:0x0 refcount:1 encoding:{} serializedlength:{} lru:0 lru_seconds_idle:0",
                encoding, length
            )
        })
    });
    match described {
        Some(text) => Reply::Simple(text.into_bytes()),
        None => Reply::error("ERR no such key"),
    }
}

fn handle_scan(args: &Args, store: &MemoryStore) -> Reply {
    let Some((cursor, options)) = args.split_first() else {
        return arity("SCAN");
    };
    let cursor = match parse_i64(cursor) {
        Ok(cursor) if cursor >= 0 => cursor as usize,
        Ok(_) => return Reply::error("ERR invalid cursor"),
        Err(reply) => return reply,
    };

    let mut pattern: &[u8] = b"*";
    let mut count = 10usize;
    let mut idx = 0;
    while idx < options.len() {
        let Some(value) = options.get(idx + 1) else {
            return Reply::error(SYNTAX);
        };
        match options[idx].to_ascii_uppercase().as_slice() {
            b"MATCH" => pattern = value.as_slice(),
            b"COUNT" => match parse_i64(value) {
                Ok(n) if n > 0 => count = n as usize,
                Ok(_) => return Reply::error(SYNTAX),
                Err(reply) => return reply,
            },
            _ => return Reply::error(SYNTAX),
        }
        idx += 2;
    }

    // The cursor is an offset into the sorted key list.
    let keys = store.keys();
    let end = cursor.saturating_add(count).min(keys.len());
    let page = keys.get(cursor..end).unwrap_or(&[]);
    let next = if end >= keys.len() { 0 } else { end };
    let matched = page
        .iter()
        .filter(|key| glob_match(pattern, key))
        .map(|key| Reply::bulk(key.to_vec()))
        .collect();

    Reply::Array(vec![Reply::bulk(next.to_string()), Reply::Array(matched)])
}

fn handle_zadd(args: &Args, store: &MemoryStore) -> Reply {
    if args.len() < 3 || args.len() % 2 == 0 {
        return arity("ZADD");
    }
    let key = &args[0];
    let mut pairs = Vec::with_capacity(args.len() / 2);
    for pair in args[1..].chunks(2) {
        let score = match parse_f64(&pair[0]) {
            Some(score) if !score.is_nan() => score,
            _ => return Reply::error(NOT_FLOAT),
        };
        pairs.push((Bytes::copy_from_slice(&pair[1]), score));
    }

    store.update(key, |slot| {
        if slot.is_none() {
            *slot = Some(Entry::new(Data::ZSet(SortedSet::default())));
        }
        let Some(Entry {
            data: Data::ZSet(set),
            ..
        }) = slot
        else {
            return Reply::error(WRONGTYPE);
        };
        let mut added = 0;
        for (member, score) in pairs {
            if set.insert(member, score) {
                added += 1;
            }
        }
        Reply::Integer(added)
    })
}

fn handle_zrange(args: &Args, store: &MemoryStore) -> Reply {
    let (key, start, stop, with_scores) = match args {
        [key, start, stop] => (key, start, stop, false),
        [key, start, stop, flag] if flag.eq_ignore_ascii_case(b"WITHSCORES") => {
            (key, start, stop, true)
        }
        [_, _, _, _] => return Reply::error(SYNTAX),
        _ => return arity("ZRANGE"),
    };
    let (start, stop) = match (parse_i64(start), parse_i64(stop)) {
        (Ok(start), Ok(stop)) => (start, stop),
        (Err(reply), _) | (_, Err(reply)) => return reply,
    };

    store.read(key, |entry| {
        let members = match entry.map(|e| &e.data) {
            None => return Reply::Array(Vec::new()),
            Some(Data::ZSet(set)) => set.ordered(),
            Some(_) => return Reply::error(WRONGTYPE),
        };
        let Some(range) = rank_range(start, stop, members.len()) else {
            return Reply::Array(Vec::new());
        };
        let mut out = Vec::new();
        for (member, score) in &members[range] {
            out.push(Reply::bulk(member.to_vec()));
            if with_scores {
                out.push(Reply::bulk(format_score(*score)));
            }
        }
        Reply::Array(out)
    })
}

fn handle_zremrangebyscore(args: &Args, store: &MemoryStore) -> Reply {
    let [key, min, max] = args else {
        return arity("ZREMRANGEBYSCORE");
    };
    let (Some(min), Some(max)) = (ScoreBound::parse(min), ScoreBound::parse(max)) else {
        return Reply::error("ERR min or max is not a float");
    };

    store.update(key, |slot| {
        let (removed, emptied) = match slot.as_mut().map(|entry| &mut entry.data) {
            None => return Reply::Integer(0),
            Some(Data::ZSet(set)) => {
                let removed = set.remove_where(|score| min.below(score) && max.above(score));
                (removed, set.is_empty())
            }
            Some(_) => return Reply::error(WRONGTYPE),
        };
        if emptied {
            *slot = None;
        }
        Reply::Integer(removed as i64)
    })
}

fn handle_hset(args: &Args, store: &MemoryStore, only_if_absent: bool) -> Reply {
    let name = if only_if_absent { "HSETNX" } else { "HSET" };
    if args.len() < 3 || args.len() % 2 == 0 || (only_if_absent && args.len() != 3) {
        return arity(name);
    }
    let key = &args[0];

    store.update(key, |slot| {
        if slot.is_none() {
            *slot = Some(Entry::new(Data::Hash(HashMap::new())));
        }
        let Some(Entry {
            data: Data::Hash(fields),
            ..
        }) = slot
        else {
            return Reply::error(WRONGTYPE);
        };
        let mut created = 0;
        for pair in args[1..].chunks(2) {
            let field = Bytes::copy_from_slice(&pair[0]);
            if only_if_absent && fields.contains_key(&field) {
                continue;
            }
            if fields
                .insert(field, Bytes::copy_from_slice(&pair[1]))
                .is_none()
            {
                created += 1;
            }
        }
        Reply::Integer(created)
    })
}

fn handle_hget(args: &Args, store: &MemoryStore) -> Reply {
    let [key, field] = args else {
        return arity("HGET");
    };
    store.read(key, |entry| match entry.map(|e| &e.data) {
        None => Reply::NIL,
        Some(Data::Hash(fields)) => fields
            .get(field.as_slice())
            .map_or(Reply::NIL, |value| Reply::bulk(value.to_vec())),
        Some(_) => Reply::error(WRONGTYPE),
    })
}

fn handle_hgetall(args: &Args, store: &MemoryStore) -> Reply {
    let [key] = args else {
        return arity("HGETALL");
    };
    store.read(key, |entry| match entry.map(|e| &e.data) {
        None => Reply::Array(Vec::new()),
        Some(Data::Hash(fields)) => {
            let mut pairs: Vec<_> = fields.iter().collect();
            pairs.sort();
            Reply::Array(
                pairs
                    .into_iter()
                    .flat_map(|(field, value)| {
                        [Reply::bulk(field.to_vec()), Reply::bulk(value.to_vec())]
                    })
                    .collect(),
            )
        }
        Some(_) => Reply::error(WRONGTYPE),
    })
}

fn handle_hincrby(args: &Args, store: &MemoryStore) -> Reply {
    let [key, field, delta] = args else {
        return arity("HINCRBY");
    };
    let delta = match parse_i64(delta) {
        Ok(delta) => delta,
        Err(reply) => return reply,
    };

    store.update(key, |slot| {
        if slot.is_none() {
            *slot = Some(Entry::new(Data::Hash(HashMap::new())));
        }
        let Some(Entry {
            data: Data::Hash(fields),
            ..
        }) = slot
        else {
            return Reply::error(WRONGTYPE);
        };
        let current = match fields.get(field.as_slice()) {
            None => 0,
            Some(value) => match parse_i64(value) {
                Ok(current) => current,
                Err(_) => return Reply::error("ERR hash value is not an integer"),
            },
        };
        let Some(next) = current.checked_add(delta) else {
            return Reply::error("ERR increment or decrement would overflow");
        };
        fields.insert(Bytes::copy_from_slice(field), Bytes::from(next.to_string()));
        Reply::Integer(next)
    })
}

fn handle_hmget(args: &Args, store: &MemoryStore) -> Reply {
    let Some((key, fields)) = args.split_first() else {
        return arity("HMGET");
    };
    if fields.is_empty() {
        return arity("HMGET");
    }
    store.read(key, |entry| match entry.map(|e| &e.data) {
        None => Reply::Array(fields.iter().map(|_| Reply::NIL).collect()),
        Some(Data::Hash(values)) => Reply::Array(
            fields
                .iter()
                .map(|field| {
                    values
                        .get(field.as_slice())
                        .map_or(Reply::NIL, |value| Reply::bulk(value.to_vec()))
                })
                .collect(),
        ),
        Some(_) => Reply::error(WRONGTYPE),
    })
}

/// Score interval bound as accepted by `ZREMRANGEBYSCORE`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoreBound {
    value: f64,
    exclusive: bool,
}

impl ScoreBound {
    fn parse(raw: &[u8]) -> Option<Self> {
        let (exclusive, number) = match raw.split_first() {
            Some((b'(', rest)) => (true, rest),
            _ => (false, raw),
        };
        let value = parse_f64(number)?;
        if value.is_nan() {
            return None;
        }
        Some(ScoreBound { value, exclusive })
    }

    /// True when `score` is on the upper side of this (minimum) bound.
    fn below(&self, score: f64) -> bool {
        if self.exclusive {
            score > self.value
        } else {
            score >= self.value
        }
    }

    /// True when `score` is on the lower side of this (maximum) bound.
    fn above(&self, score: f64) -> bool {
        if self.exclusive {
            score < self.value
        } else {
            score <= self.value
        }
    }
}

/// Resolves Redis rank indexes (negative counts from the end) to a range.
fn rank_range(start: i64, stop: i64, len: usize) -> Option<std::ops::Range<usize>> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some(start as usize..stop as usize + 1)
}

fn format_score(score: f64) -> String {
    if score == f64::INFINITY {
        "inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

fn parse_i64(arg: &[u8]) -> Result<i64, Reply> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| Reply::error(NOT_INTEGER))
}

fn parse_f64(arg: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(arg).ok()?;
    match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ => text.parse().ok(),
    }
}

/// Glob matching with `*`, `?`, and backslash escapes, as used by `SCAN MATCH`.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| glob_match(rest, &text[skip..])),
        Some((b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((b'\\', rest)) if !rest.is_empty() => {
            text.first() == Some(&rest[0]) && glob_match(&rest[1..], &text[1..])
        }
        Some((ch, rest)) => text.first() == Some(ch) && glob_match(rest, &text[1..]),
    }
}
