//! Path addressing over a JSON document tree.
//!
//! Writes follow realtime-database conventions: `null` deletes, and empty
//! objects or arrays are pruned so that missing and empty read the same.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Joins a relative path onto `base`.
pub fn join(base: &str, relative: &str) -> String {
    let mut parts = segments(base);
    parts.extend(segments(relative));
    format!("/{}", parts.join("/"))
}

/// True when one path is an ancestor of (or equal to) the other.
pub fn overlaps(a: &str, b: &str) -> bool {
    let a = segments(a);
    let b = segments(b);
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

pub fn read(root: &Value, path: &str) -> Option<Value> {
    let mut node = root;
    for segment in segments(path) {
        node = match node {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    if node.is_null() {
        None
    } else {
        Some(node.clone())
    }
}

pub fn write(root: &mut Value, path: &str, value: Value) {
    let parts = segments(path);
    set_at(root, &parts, prune(value));
}

/// Applies several relative writes under `base` as one change.
pub fn write_many(root: &mut Value, base: &str, updates: BTreeMap<String, Value>) {
    for (relative, value) in updates {
        write(root, &join(base, &relative), value);
    }
}

fn set_at(node: &mut Value, parts: &[&str], value: Option<Value>) {
    let Some((head, rest)) = parts.split_first() else {
        *node = value.unwrap_or(Value::Null);
        return;
    };

    if !node.is_object() {
        if value.is_none() {
            return;
        }
        *node = Value::Object(Map::new());
    }

    let emptied = match node {
        Value::Object(map) => {
            let child_removed = {
                let child = map.entry(head.to_string()).or_insert(Value::Null);
                set_at(child, rest, value);
                child.is_null()
            };
            if child_removed {
                map.remove(*head);
            }
            map.is_empty()
        }
        _ => false,
    };

    if emptied {
        *node = Value::Null;
    }
}

fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let kept: Map<String, Value> = map
                .into_iter()
                .filter_map(|(key, child)| prune(child).map(|child| (key, child)))
                .collect();
            (!kept.is_empty()).then_some(Value::Object(kept))
        }
        Value::Array(items) => {
            let kept: Vec<Value> = items.into_iter().filter_map(prune).collect();
            (!kept.is_empty()).then_some(Value::Array(kept))
        }
        scalar => Some(scalar),
    }
}
