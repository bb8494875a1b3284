use serde_json::{Map, Value};

/// Dotted-path deep `get`, e.g. `"a.b.2.c"` reaches into nested objects and
/// arrays. Returns `None` if any segment is missing or the wrong shape.
///
/// A small stand-in for `glom.glom` (unattested as a dependency anywhere in
/// the retrieval pack), scoped to the handful of path shapes the dict-mimic
/// API needs.
pub fn get(root: &Value, path: &str) -> Option<Value> {
    let mut cur = root;
    for part in path.split('.') {
        cur = match cur {
            Value::Object(map) => map.get(part)?,
            Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur.clone())
}

/// Dotted-path deep `set`, creating intermediate objects as needed. Only
/// object segments can be created implicitly; setting through an array
/// index that doesn't exist yet is a no-op on that branch.
pub fn set(root: &mut Map<String, Value>, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut wrapped = Value::Object(std::mem::take(root));
    set_rec(&mut wrapped, &parts, value);
    if let Value::Object(map) = wrapped {
        *root = map;
    }
}

fn set_rec(cur: &mut Value, parts: &[&str], value: Value) {
    let Some((head, rest)) = parts.split_first() else {
        *cur = value;
        return;
    };
    if rest.is_empty() {
        if let Value::Array(arr) = cur {
            if let Ok(idx) = head.parse::<usize>() {
                if idx < arr.len() {
                    arr[idx] = value;
                    return;
                }
            }
        }
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        cur.as_object_mut()
            .expect("just ensured object")
            .insert((*head).to_owned(), value);
        return;
    }
    if let Value::Array(arr) = cur {
        if let Ok(idx) = head.parse::<usize>() {
            if let Some(slot) = arr.get_mut(idx) {
                set_rec(slot, rest, value);
                return;
            }
        }
        return;
    }
    if !cur.is_object() {
        *cur = Value::Object(Map::new());
    }
    let entry = cur
        .as_object_mut()
        .expect("just ensured object")
        .entry((*head).to_owned())
        .or_insert(Value::Null);
    set_rec(entry, rest, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_reaches_through_objects_and_arrays() {
        let root = json!({"a": {"b": [1, 2, {"c": "hi"}]}});
        assert_eq!(get(&root, "a.b.2.c"), Some(json!("hi")));
        assert_eq!(get(&root, "a.b.0"), Some(json!(1)));
        assert_eq!(get(&root, "a.missing"), None);
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut root = Map::new();
        set(&mut root, "a.b.c", json!(5));
        assert_eq!(get(&Value::Object(root), "a.b.c"), Some(json!(5)));
    }

    #[test]
    fn set_overwrites_an_existing_array_slot() {
        let mut root = Map::new();
        root.insert("a".to_owned(), json!([1, 2, 3]));
        set(&mut root, "a.1", json!(99));
        assert_eq!(get(&Value::Object(root), "a.1"), Some(json!(99)));
    }
}
