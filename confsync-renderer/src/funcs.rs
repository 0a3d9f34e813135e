//! Utility template functions.
//!
//! Everything here is pure except `datetime`, `getenv`, `fileExists`,
//! `lookupIP`, and `lookupSRV`; none of them touch the KV snapshot, so a
//! failing template can never corrupt engine state.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use hickory_resolver::Resolver;
use serde::Serialize;
use tera::{Tera, Value};

/// Register every utility function on `tera`.
pub fn register(tera: &mut Tera) {
    tera.register_function("base", base);
    tera.register_function("dir", dir);
    tera.register_function("split", split);
    tera.register_function("join", join);
    tera.register_function("toUpper", to_upper);
    tera.register_function("toLower", to_lower);
    tera.register_function("contains", contains);
    tera.register_function("replace", replace);
    tera.register_function("trimSuffix", trim_suffix);
    tera.register_function("parseBool", parse_bool);
    tera.register_function("atoi", atoi);
    tera.register_function("add", add);
    tera.register_function("sub", sub);
    tera.register_function("mul", mul);
    tera.register_function("div", div);
    tera.register_function("mod", modulo);
    tera.register_function("seq", seq);
    tera.register_function("reverse", reverse);
    tera.register_function("sortByLength", sort_by_length);
    tera.register_function("sortKVByLength", sort_kv_by_length);
    tera.register_function("base64Encode", base64_encode);
    tera.register_function("base64Decode", base64_decode);
    tera.register_function("json", json);
    tera.register_function("jsonArray", json_array);
    tera.register_function("map", map);
    tera.register_function("getenv", getenv);
    tera.register_function("datetime", datetime);
    tera.register_function("fileExists", file_exists);
    tera.register_function("lookupIP", lookup_ip);
    tera.register_function("lookupSRV", lookup_srv);
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

pub(crate) fn required_str(
    args: &HashMap<String, Value>,
    name: &str,
    func: &str,
) -> tera::Result<String> {
    match args.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(tera::Error::msg(format!(
            "`{func}` expects a string for `{name}`, got {other}"
        ))),
        None => Err(tera::Error::msg(format!(
            "`{func}` requires a `{name}` argument"
        ))),
    }
}

pub(crate) fn optional_str(
    args: &HashMap<String, Value>,
    name: &str,
    func: &str,
) -> tera::Result<Option<String>> {
    match args.get(name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(tera::Error::msg(format!(
            "`{func}` expects a string for `{name}`, got {other}"
        ))),
    }
}

fn required_i64(args: &HashMap<String, Value>, name: &str, func: &str) -> tera::Result<i64> {
    match args.get(name) {
        Some(value) => value.as_i64().ok_or_else(|| {
            tera::Error::msg(format!(
                "`{func}` expects an integer for `{name}`, got {value}"
            ))
        }),
        None => Err(tera::Error::msg(format!(
            "`{func}` requires a `{name}` argument"
        ))),
    }
}

fn required_array(
    args: &HashMap<String, Value>,
    name: &str,
    func: &str,
) -> tera::Result<Vec<Value>> {
    match args.get(name) {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(other) => Err(tera::Error::msg(format!(
            "`{func}` expects an array for `{name}`, got {other}"
        ))),
        None => Err(tera::Error::msg(format!(
            "`{func}` requires a `{name}` argument"
        ))),
    }
}

fn string_items(items: Vec<Value>, func: &str) -> tera::Result<Vec<String>> {
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            other => Err(tera::Error::msg(format!(
                "`{func}` expects string elements, got {other}"
            ))),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Path and string functions
// ---------------------------------------------------------------------------

fn base(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let path = required_str(args, "path", "base")?;
    Ok(Value::String(path_base(&path)))
}

fn dir(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let path = required_str(args, "path", "dir")?;
    Ok(Value::String(path_dir(&path)))
}

fn path_base(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { "." } else { "/" }.to_string();
    }
    match trimmed.rfind('/') {
        Some(index) => trimmed[index + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

fn path_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(index) => trimmed[..index].to_string(),
        None => ".".to_string(),
    }
}

fn split(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let s = required_str(args, "s", "split")?;
    let sep = required_str(args, "sep", "split")?;
    let parts: Vec<Value> = s
        .split(sep.as_str())
        .map(|part| Value::String(part.to_string()))
        .collect();
    Ok(Value::Array(parts))
}

fn join(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let values = string_items(required_array(args, "values", "join")?, "join")?;
    let sep = required_str(args, "sep", "join")?;
    Ok(Value::String(values.join(&sep)))
}

fn to_upper(args: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::String(required_str(args, "s", "toUpper")?.to_uppercase()))
}

fn to_lower(args: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::String(required_str(args, "s", "toLower")?.to_lowercase()))
}

fn contains(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let s = required_str(args, "s", "contains")?;
    let substr = required_str(args, "substr", "contains")?;
    Ok(Value::Bool(s.contains(&substr)))
}

/// Replace the first `n` occurrences of `old` with `new`; `n < 0` replaces
/// all of them.
fn replace(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let s = required_str(args, "s", "replace")?;
    let old = required_str(args, "old", "replace")?;
    let new = required_str(args, "new", "replace")?;
    let n = required_i64(args, "n", "replace")?;
    let replaced = if n < 0 {
        s.replace(&old, &new)
    } else {
        s.replacen(&old, &new, n as usize)
    };
    Ok(Value::String(replaced))
}

fn trim_suffix(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let s = required_str(args, "s", "trimSuffix")?;
    let suffix = required_str(args, "suffix", "trimSuffix")?;
    Ok(Value::String(
        s.strip_suffix(&suffix).unwrap_or(&s).to_string(),
    ))
}

// ---------------------------------------------------------------------------
// Parsing and arithmetic
// ---------------------------------------------------------------------------

fn parse_bool(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let s = required_str(args, "s", "parseBool")?;
    match s.as_str() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(Value::Bool(true)),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(Value::Bool(false)),
        other => Err(tera::Error::msg(format!("cannot parse {other:?} as bool"))),
    }
}

fn atoi(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let s = required_str(args, "s", "atoi")?;
    let parsed: i64 = s
        .trim()
        .parse()
        .map_err(|_| tera::Error::msg(format!("cannot parse {s:?} as integer")))?;
    Ok(Value::from(parsed))
}

fn add(args: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::from(
        required_i64(args, "a", "add")? + required_i64(args, "b", "add")?,
    ))
}

fn sub(args: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::from(
        required_i64(args, "a", "sub")? - required_i64(args, "b", "sub")?,
    ))
}

fn mul(args: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::from(
        required_i64(args, "a", "mul")? * required_i64(args, "b", "mul")?,
    ))
}

fn div(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let a = required_i64(args, "a", "div")?;
    let b = required_i64(args, "b", "div")?;
    if b == 0 {
        return Err(tera::Error::msg("`div` by zero"));
    }
    Ok(Value::from(a / b))
}

fn modulo(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let a = required_i64(args, "a", "mod")?;
    let b = required_i64(args, "b", "mod")?;
    if b == 0 {
        return Err(tera::Error::msg("`mod` by zero"));
    }
    Ok(Value::from(a % b))
}

/// Inclusive ascending integer sequence, as GNU `seq`.
fn seq(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let first = required_i64(args, "first", "seq")?;
    let last = required_i64(args, "last", "seq")?;
    let values: Vec<Value> = (first..=last).map(Value::from).collect();
    Ok(Value::Array(values))
}

// ---------------------------------------------------------------------------
// Sequence transforms
// ---------------------------------------------------------------------------

/// Reverse an array of strings or KV pairs.
fn reverse(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let mut values = required_array(args, "values", "reverse")?;
    values.reverse();
    Ok(Value::Array(values))
}

fn sort_by_length(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let mut values = string_items(required_array(args, "values", "sortByLength")?, "sortByLength")?;
    values.sort_by_key(|value| value.len());
    Ok(Value::Array(values.into_iter().map(Value::String).collect()))
}

fn sort_kv_by_length(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let mut values = required_array(args, "values", "sortKVByLength")?;
    values.sort_by_key(|pair| {
        pair.get("key")
            .and_then(Value::as_str)
            .map(str::len)
            .unwrap_or(0)
    });
    Ok(Value::Array(values))
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn base64_encode(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let data = required_str(args, "data", "base64Encode")?;
    Ok(Value::String(STANDARD.encode(data.as_bytes())))
}

fn base64_decode(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let data = required_str(args, "data", "base64Decode")?;
    let decoded = STANDARD
        .decode(data.as_bytes())
        .map_err(|err| tera::Error::msg(format!("invalid base64: {err}")))?;
    String::from_utf8(decoded)
        .map(Value::String)
        .map_err(|_| tera::Error::msg("decoded data is not valid UTF-8"))
}

fn json(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let data = required_str(args, "data", "json")?;
    let parsed: Value = serde_json::from_str(&data)
        .map_err(|err| tera::Error::msg(format!("invalid JSON: {err}")))?;
    if !parsed.is_object() {
        return Err(tera::Error::msg("`json` expects a JSON object"));
    }
    Ok(parsed)
}

fn json_array(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let data = required_str(args, "data", "jsonArray")?;
    let parsed: Value = serde_json::from_str(&data)
        .map_err(|err| tera::Error::msg(format!("invalid JSON: {err}")))?;
    if !parsed.is_array() {
        return Err(tera::Error::msg("`jsonArray` expects a JSON array"));
    }
    Ok(parsed)
}

/// Build an object from alternating keys and values:
/// `map(values=["k1", v1, "k2", v2])`. Fails on an odd element count or a
/// non-string key.
fn map(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let values = required_array(args, "values", "map")?;
    if values.len() % 2 != 0 {
        return Err(tera::Error::msg("invalid map call: odd element count"));
    }
    let mut object = serde_json::Map::with_capacity(values.len() / 2);
    for pair in values.chunks_exact(2) {
        let Value::String(key) = &pair[0] else {
            return Err(tera::Error::msg("map keys must be strings"));
        };
        object.insert(key.clone(), pair[1].clone());
    }
    Ok(Value::Object(object))
}

// ---------------------------------------------------------------------------
// Environment and system
// ---------------------------------------------------------------------------

/// Value of the environment variable `key`, the supplied default when it
/// is unset or empty, or `""`.
fn getenv(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let key = required_str(args, "key", "getenv")?;
    let default = optional_str(args, "default", "getenv")?;
    let value = match std::env::var(&key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.unwrap_or_default(),
    };
    Ok(Value::String(value))
}

fn datetime(_args: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::String(Utc::now().to_rfc3339()))
}

fn file_exists(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let path = required_str(args, "path", "fileExists")?;
    Ok(Value::Bool(std::path::Path::new(&path).exists()))
}

// ---------------------------------------------------------------------------
// DNS
// ---------------------------------------------------------------------------

/// Resolved IPs for `host` as sorted strings; resolver failure is an
/// empty result, never a render error.
fn lookup_ip(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let host = required_str(args, "host", "lookupIP")?;
    let ips = lookup_ip_strings(&host);
    Ok(Value::Array(ips.into_iter().map(Value::String).collect()))
}

fn lookup_ip_strings(host: &str) -> Vec<String> {
    use std::net::ToSocketAddrs;

    let Ok(addrs) = (host, 0u16).to_socket_addrs() else {
        return Vec::new();
    };
    let mut ips: Vec<String> = addrs.map(|addr| addr.ip().to_string()).collect();
    ips.sort();
    ips.dedup();
    ips
}

#[derive(Debug, Serialize)]
struct SrvRecord {
    target: String,
    port: u16,
    priority: u16,
    weight: u16,
}

/// SRV records for `_service._proto.name`, sorted by the concatenated
/// `target|port|priority|weight` string; lookup failure is an empty
/// result.
fn lookup_srv(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let service = required_str(args, "service", "lookupSRV")?;
    let proto = required_str(args, "proto", "lookupSRV")?;
    let name = required_str(args, "name", "lookupSRV")?;

    let mut records = lookup_srv_records(format!("_{service}._{proto}.{name}"));
    records.sort_by_key(|record| {
        format!(
            "{}{}{}{}",
            record.target, record.port, record.priority, record.weight
        )
    });

    let values = records
        .into_iter()
        .map(|record| serde_json::to_value(record).map_err(|err| tera::Error::msg(err.to_string())))
        .collect::<tera::Result<Vec<Value>>>()?;
    Ok(Value::Array(values))
}

fn lookup_srv_records(query: String) -> Vec<SrvRecord> {
    // The blocking resolver drives its own runtime; it must run off any
    // async worker thread.
    let lookup = std::thread::spawn(move || {
        let resolver = Resolver::from_system_conf().ok()?;
        let response = resolver.srv_lookup(query).ok()?;
        let records = response
            .iter()
            .map(|srv| SrvRecord {
                target: srv.target().to_utf8(),
                port: srv.port(),
                priority: srv.priority(),
                weight: srv.weight(),
            })
            .collect::<Vec<_>>();
        Some(records)
    });
    lookup.join().ok().flatten().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
