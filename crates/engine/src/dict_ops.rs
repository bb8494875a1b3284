use proto::DictMethod;
use serde_json::{Map, Value};

use crate::path;

/// Applies one of the fixed dict-mimic operations to a live map, returning
/// its result value. Grounded on `zproc/atomic.py`'s ready-made operations
/// (`keys`, `values`, `items`, `get`, `set`, `merge`) plus the dotted-path
/// helpers Design Notes §9 calls for.
pub fn apply(map: &mut Map<String, Value>, method: DictMethod) -> Value {
    match method {
        DictMethod::Get { key } => map.get(&key).cloned().unwrap_or(Value::Null),
        DictMethod::Set { key, value } => {
            map.insert(key, value.clone());
            value
        }
        DictMethod::Update { entries } => {
            for (k, v) in entries {
                map.insert(k, v);
            }
            Value::Bool(true)
        }
        DictMethod::Clear => {
            map.clear();
            Value::Bool(true)
        }
        DictMethod::Pop { key } => map.remove(&key).unwrap_or(Value::Null),
        DictMethod::Keys => Value::Array(map.keys().cloned().map(Value::String).collect()),
        DictMethod::Values => Value::Array(map.values().cloned().collect()),
        DictMethod::Items => Value::Array(
            map.iter()
                .map(|(k, v)| Value::Array(vec![Value::String(k.clone()), v.clone()]))
                .collect(),
        ),
        DictMethod::GetPath { path: p } => {
            path::get(&Value::Object(map.clone()), &p).unwrap_or(Value::Null)
        }
        DictMethod::SetPath { path: p, value } => {
            path::set(map, &p, value.clone());
            value
        }
        DictMethod::Merge { entries } => {
            for (k, v) in entries {
                deep_merge(map.entry(k).or_insert(Value::Null), v);
            }
            Value::Object(map.clone())
        }
    }
}

fn deep_merge(slot: &mut Value, incoming: Value) {
    match (slot, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (k, v) in incoming {
                deep_merge(existing.entry(k).or_insert(Value::Null), v);
            }
        }
        (slot, incoming) => *slot = incoming,
    }
}
