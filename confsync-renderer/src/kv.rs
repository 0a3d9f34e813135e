//! Snapshot-bound template functions.
//!
//! Each function closes over the owning resource's snapshot; lookups read
//! under a short-lived lock and never mutate.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use tera::{Tera, Value};

use confsync_core::kvstore::KvStore;

use crate::funcs::{optional_str, required_str};

/// Snapshot handle shared between the render pipeline (writer) and the
/// template functions (readers).
pub type SharedStore = Arc<RwLock<KvStore>>;

pub(crate) fn read(store: &SharedStore) -> RwLockReadGuard<'_, KvStore> {
    store.read().unwrap_or_else(PoisonError::into_inner)
}

fn kv_err(err: confsync_core::KvError) -> tera::Error {
    tera::Error::msg(err.to_string())
}

fn to_value<T: serde::Serialize>(value: T) -> tera::Result<Value> {
    serde_json::to_value(value).map_err(|err| tera::Error::msg(err.to_string()))
}

/// Register the snapshot access functions on `tera`.
pub fn register(tera: &mut Tera, store: &SharedStore) {
    let bound = store.clone();
    tera.register_function(
        "exists",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let key = required_str(args, "key", "exists")?;
            Ok(Value::Bool(read(&bound).exists(&key)))
        },
    );

    let bound = store.clone();
    tera.register_function(
        "ls",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let path = required_str(args, "path", "ls")?;
            to_value(read(&bound).list(&path))
        },
    );

    let bound = store.clone();
    tera.register_function(
        "lsdir",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let path = required_str(args, "path", "lsdir")?;
            to_value(read(&bound).list_dir(&path))
        },
    );

    let bound = store.clone();
    tera.register_function(
        "get",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let key = required_str(args, "key", "get")?;
            let pair = read(&bound).get(&key).map_err(kv_err)?;
            to_value(pair)
        },
    );

    let bound = store.clone();
    tera.register_function(
        "gets",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let pattern = required_str(args, "pattern", "gets")?;
            let pairs = read(&bound).get_all(&pattern).map_err(kv_err)?;
            to_value(pairs)
        },
    );

    let bound = store.clone();
    tera.register_function(
        "getv",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let key = required_str(args, "key", "getv")?;
            let default = optional_str(args, "default", "getv")?;
            let value = read(&bound)
                .get_value(&key, default.as_deref())
                .map_err(kv_err)?;
            Ok(Value::String(value))
        },
    );

    let bound = store.clone();
    tera.register_function(
        "getvs",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let pattern = required_str(args, "pattern", "getvs")?;
            let values = read(&bound).get_all_values(&pattern).map_err(kv_err)?;
            to_value(values)
        },
    );
}
