//! Decrypting (`c*`) variants of the snapshot access functions.
//!
//! Each variant delegates to its plain counterpart's lookup and then
//! base64 + OpenPGP decodes the value portion. A decode failure fails the
//! render.

use std::collections::HashMap;
use std::sync::Arc;

use tera::{Tera, Value};

use crate::funcs::{optional_str, required_str};
use crate::kv::{read, SharedStore};
use crate::secconf;

fn kv_err(err: confsync_core::KvError) -> tera::Error {
    tera::Error::msg(err.to_string())
}

fn to_value<T: serde::Serialize>(value: T) -> tera::Result<Value> {
    serde_json::to_value(value).map_err(|err| tera::Error::msg(err.to_string()))
}

fn decrypt_value(value: &str, private_key: &[u8]) -> tera::Result<String> {
    let plaintext = secconf::decode(value.as_bytes(), private_key)
        .map_err(|err| tera::Error::msg(err.to_string()))?;
    String::from_utf8(plaintext)
        .map_err(|_| tera::Error::msg("decrypted value is not valid UTF-8"))
}

/// Register the `c*` functions on `tera`, bound to `private_key`.
pub fn register(tera: &mut Tera, store: &SharedStore, private_key: &Arc<Vec<u8>>) {
    let bound = store.clone();
    let key_material = private_key.clone();
    tera.register_function(
        "cget",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let key = required_str(args, "key", "cget")?;
            let mut pair = read(&bound).get(&key).map_err(kv_err)?;
            pair.value = decrypt_value(&pair.value, &key_material)?;
            to_value(pair)
        },
    );

    let bound = store.clone();
    let key_material = private_key.clone();
    tera.register_function(
        "cgets",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let pattern = required_str(args, "pattern", "cgets")?;
            let mut pairs = read(&bound).get_all(&pattern).map_err(kv_err)?;
            for pair in &mut pairs {
                pair.value = decrypt_value(&pair.value, &key_material)?;
            }
            to_value(pairs)
        },
    );

    let bound = store.clone();
    let key_material = private_key.clone();
    tera.register_function(
        "cgetv",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let key = required_str(args, "key", "cgetv")?;
            let default = optional_str(args, "default", "cgetv")?;
            let value = read(&bound)
                .get_value(&key, default.as_deref())
                .map_err(kv_err)?;
            Ok(Value::String(decrypt_value(&value, &key_material)?))
        },
    );

    let bound = store.clone();
    let key_material = private_key.clone();
    tera.register_function(
        "cgetvs",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let pattern = required_str(args, "pattern", "cgetvs")?;
            let values = read(&bound).get_all_values(&pattern).map_err(kv_err)?;
            let decrypted = values
                .iter()
                .map(|value| decrypt_value(value, &key_material))
                .collect::<tera::Result<Vec<String>>>()?;
            to_value(decrypted)
        },
    );
}
