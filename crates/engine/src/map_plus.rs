use proto::{RemoteException, StateMap};
use serde_json::{Map, Value};

use crate::registry::NamedOp;

/// The universal task dispatcher (spec.md §4.F): given optional per-item
/// iterable `map_iter`, per-item positional-args list `map_args`, and
/// per-item keyword-args list `map_kwargs`, plus shared `args`/`kwargs`,
/// calls `op` once per item and collects the results.
///
/// Ported branch-for-branch from `zproc/task/map_plus.py`: a present
/// `map_kwargs[i]` is overlaid *under* the shared `kwargs` (shared wins on
/// key collision, matching Python's `{**per_item, **shared}`). When all
/// three map inputs are absent this returns an empty list — single-call
/// tasks bypass `map_plus` entirely and invoke `op` directly.
pub fn map_plus(
    op: &NamedOp,
    map_iter: Option<&[Value]>,
    map_args: Option<&[Vec<Value>]>,
    args: &[Value],
    map_kwargs: Option<&[Map<String, Value>]>,
    kwargs: &Map<String, Value>,
    mut state: Option<&mut StateMap>,
) -> Result<Vec<Value>, RemoteException> {
    // Python's `zip()` truncates to the shortest iterable; mirror that here
    // rather than indexing past the end of a shorter map_args/map_kwargs.
    let lens = [
        map_iter.map(<[Value]>::len),
        map_args.map(<[Vec<Value>]>::len),
        map_kwargs.map(<[Map<String, Value>]>::len),
    ];
    let Some(len) = lens.into_iter().flatten().min() else {
        return Ok(vec![]);
    };

    let mut out = Vec::with_capacity(len);
    for idx in 0..len {
        let mut call_args: Vec<Value> = Vec::new();
        if let Some(items) = map_iter {
            call_args.push(items[idx].clone());
        }
        if let Some(per_item_args) = map_args {
            call_args.extend(per_item_args[idx].iter().cloned());
        }
        call_args.extend(args.iter().cloned());

        let mut call_kwargs: Map<String, Value> =
            map_kwargs.map(|k| k[idx].clone()).unwrap_or_default();
        for (k, v) in kwargs {
            call_kwargs.insert(k.clone(), v.clone());
        }

        out.push(op.call(&call_args, &call_kwargs, state.as_deref_mut())?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pow_op() -> NamedOp {
        NamedOp::new("pow", |args, _kwargs, _state| {
            let base = args[0].as_f64().unwrap_or(0.0);
            let exp = args[1].as_f64().unwrap_or(0.0);
            Ok(json!(base.powf(exp)))
        })
    }

    #[test]
    fn map_iter_with_shared_args_matches_list_comprehension() {
        let op = pow_op();
        let items: Vec<Value> = (0..5).map(Value::from).collect();
        let shared_args = vec![json!(2)];
        let result =
            map_plus(&op, Some(&items), None, &shared_args, None, &Map::new(), None).unwrap();
        let expected: Vec<Value> = (0..5i64).map(|x| json!((x as f64).powf(2.0))).collect();
        assert_eq!(result, expected);
    }

    #[test]
    fn all_map_inputs_absent_yields_empty_list() {
        let op = pow_op();
        let result = map_plus(&op, None, None, &[], None, &Map::new(), None).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn per_item_kwargs_are_overridden_by_shared_kwargs() {
        let op = NamedOp::new("echo_flag", |_args, kwargs, _state| {
            Ok(kwargs.get("flag").cloned().unwrap_or(Value::Null))
        });
        let mut per_item = Map::new();
        per_item.insert("flag".into(), json!("per-item"));
        let map_kwargs = vec![per_item];
        let mut shared = Map::new();
        shared.insert("flag".into(), json!("shared"));

        let result = map_plus(&op, None, None, &[], Some(&map_kwargs), &shared, None).unwrap();
        assert_eq!(result, vec![json!("shared")]);
    }
}
