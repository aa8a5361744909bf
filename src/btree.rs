// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Flattens and unflattens the nested-tuple state shapes that BTree/Bucket/
//! TreeSet/Set classes use in place of a `__dict__` (spec.md §4.3).
//!
//! Recognition is driven by the record's class name suffix, not by argument
//! inspection like the Known-Type Recognizer: `BTree`/`TreeSet` classes wrap
//! their flat key/value tuple in four single-element tuples; `Bucket`/`Set`
//! classes wrap it in two. A class whose state doesn't match the expected
//! wrapper shape is left untouched rather than treated as an error — this
//! mirrors spec.md §9's resolution that unrecognised BTree shapes pass
//! through as generic tuples.

use itertools::Itertools;

use crate::value::{BTreeShape, RecordData, SharedFrozen, Value};

fn is_small(classname: &str) -> bool {
    classname.ends_with("BTree") || classname.ends_with("TreeSet")
}

fn is_bucket(classname: &str) -> bool {
    classname.ends_with("Bucket") || (classname.ends_with("Set") && !classname.ends_with("TreeSet"))
}

fn is_keys_only(classname: &str) -> bool {
    classname.contains("Set")
}

/// Unwraps `levels` nested single-element tuples and returns the flat tuple
/// found underneath, or `None` if the state isn't shaped that way.
fn unwrap_singleton_levels(state: &Value, levels: usize) -> Option<Vec<Value>> {
    let mut cur = state.clone();
    for _ in 0..levels {
        match cur {
            Value::Tuple(t) => {
                let items = t.inner();
                if items.len() != 1 {
                    return None;
                }
                cur = items[0].clone();
            }
            _ => return None,
        }
    }
    match cur {
        Value::Tuple(t) => Some(t.inner().clone()),
        _ => None,
    }
}

fn wrap_singleton_levels(flat: Vec<Value>, levels: usize) -> Value {
    let mut cur = Value::tuple(flat);
    for _ in 0..levels {
        cur = Value::tuple(vec![cur]);
    }
    cur
}

fn build_shape(flat: Vec<Value>, keys_only: bool) -> Value {
    let shape = if keys_only {
        BTreeShape::Ks(flat)
    } else {
        BTreeShape::Kv(flat.into_iter().tuples().collect())
    };
    Value::BTree(SharedFrozen::new(shape))
}

/// Applies the flattener to an embedded bucket-or-passthrough value: used
/// both for a large tree's `first_bucket` slot and for any embedded (rather
/// than persistent-ref) bucket inside its children array.
fn flatten_embedded_bucket(value: Value, keys_only: bool) -> Value {
    if let Some(flat) = unwrap_singleton_levels(&value, 1) {
        return build_shape(flat, keys_only);
    }
    value
}

fn flatten_state(classname: &str, state: Value) -> Value {
    if classname == "Length" || matches!(state, Value::Null) {
        return state;
    }
    let keys_only = is_keys_only(classname);
    if is_small(classname) {
        if let Some(flat) = unwrap_singleton_levels(&state, 3) {
            return build_shape(flat, keys_only);
        }
        if let Value::Tuple(t) = &state {
            let items = t.inner();
            if items.len() == 2 {
                let first = flatten_embedded_bucket(items[1].clone(), keys_only);
                let children: Vec<Value> = items[0]
                    .clone()
                    .try_tuple_items()
                    .map(|kids| {
                        kids.into_iter()
                            .enumerate()
                            .map(|(i, v)| if i % 2 == 0 { flatten_embedded_bucket(v, keys_only) } else { v })
                            .collect()
                    })
                    .unwrap_or_default();
                return Value::BTree(SharedFrozen::new(BTreeShape::Children {
                    children,
                    first: Box::new(first),
                }));
            }
        }
        return state;
    }
    if is_bucket(classname) {
        if let Some(flat) = unwrap_singleton_levels(&state, 1) {
            return build_shape(flat, keys_only);
        }
        return state;
    }
    state
}

fn unflatten_embedded_bucket(value: Value) -> Value {
    match &value {
        Value::BTree(shape) => match shape.inner() {
            BTreeShape::Kv(pairs) => {
                let flat: Vec<Value> = pairs.iter().flat_map(|(k, v)| [k.clone(), v.clone()]).collect();
                wrap_singleton_levels(flat, 1)
            }
            BTreeShape::Ks(keys) => wrap_singleton_levels(keys.clone(), 1),
            BTreeShape::Children { .. } => value,
        },
        _ => value,
    }
}

fn unflatten_state(classname: &str, state: Value) -> Value {
    if classname == "Length" {
        return state;
    }
    match state {
        Value::Null => Value::Null,
        Value::BTree(shape) => {
            let levels = if is_small(classname) { 3 } else { 1 };
            match shape.into_raw_or_cloned() {
                BTreeShape::Kv(pairs) => {
                    let flat: Vec<Value> = pairs.into_iter().flat_map(|(k, v)| [k, v]).collect();
                    wrap_singleton_levels(flat, levels)
                }
                BTreeShape::Ks(keys) => wrap_singleton_levels(keys, levels),
                BTreeShape::Children { children, first } => {
                    let first_v = unflatten_embedded_bucket(*first);
                    let children_v: Vec<Value> = children
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| if i % 2 == 0 { unflatten_embedded_bucket(v) } else { v })
                        .collect();
                    Value::tuple(vec![Value::tuple(children_v), first_v])
                }
            }
        }
        other => other,
    }
}

/// Rewrites a decoded `Record` in place, flattening its state if its class
/// identifies a BTree/Bucket/TreeSet/Set.
pub fn flatten(value: Value) -> Value {
    match value {
        Value::Record(r) => {
            let data = r.into_raw_or_cloned();
            let state = flatten_state(&data.cls.1, data.state);
            Value::Record(SharedFrozen::new(RecordData { cls: data.cls, state }))
        }
        other => other,
    }
}

/// The exact inverse of `flatten`, used before re-encoding a record.
pub fn unflatten(value: Value) -> Value {
    match value {
        Value::Record(r) => {
            let data = r.into_raw_or_cloned();
            let state = unflatten_state(&data.cls.1, data.state);
            Value::Record(SharedFrozen::new(RecordData { cls: data.cls, state }))
        }
        other => other,
    }
}

trait TryTupleItems {
    fn try_tuple_items(self) -> Option<Vec<Value>>;
}

impl TryTupleItems for Value {
    fn try_tuple_items(self) -> Option<Vec<Value>> {
        match self {
            Value::Tuple(t) => Some(t.into_raw_or_cloned()),
            _ => None,
        }
    }
}
