// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Converts between the `Value` tree and canonical JSON (spec.md §4.5).
//!
//! The writer and reader agree on a fixed table of reserved `@`-prefixed
//! marker keys; a handful of recognized-type markers (`@dt`/`@time` with an
//! optional `@tz`, `@cls` with its required `@s`, `@children` with its
//! required `@first`) are themselves fixed two-key envelopes rather than a
//! violation of the single-marker rule — that rule exists to protect
//! user-authored dicts, not these codec-defined shapes.

use std::collections::HashSet;

use base64::Engine;
use chrono::Timelike;
use num_traits::ToPrimitive;
use serde_json::{Map, Number, Value as Json};

use crate::error::{Error, ErrorCode};
use crate::value::{
    BTreeShape, DateTimeZone, GlobalRef, KnownValue, PersistentRefData, RecordData, ReduceData, Shared,
    SharedFrozen, Value,
};

const RESERVED_MARKERS: &[&str] = &[
    "@t", "@b", "@d", "@bi", "@f", "@set", "@fset", "@g", "@ref", "@reduce", "@dt", "@date", "@time", "@td",
    "@dec", "@uuid", "@tz", "@cls", "@s", "@kv", "@ks", "@children", "@first",
];

fn marker_obj(key: &str, payload: Json) -> Json {
    let mut obj = Map::new();
    obj.insert(key.to_string(), payload);
    Json::Object(obj)
}

// ---------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------

/// Converts a `Value` tree into canonical JSON. Fails on a cyclic reference
/// (a memoized container that directly or indirectly contains itself), which
/// JSON cannot represent.
pub fn to_json(value: &Value) -> Result<Json, Error> {
    let mut visiting = HashSet::new();
    write_value(value, &mut visiting)
}

fn with_guard<F>(ptr: usize, visiting: &mut HashSet<usize>, f: F) -> Result<Json, Error>
where
    F: FnOnce(&mut HashSet<usize>) -> Result<Json, Error>,
{
    if !visiting.insert(ptr) {
        return Err(Error::new(ErrorCode::Cyclic));
    }
    let result = f(visiting);
    visiting.remove(&ptr);
    result
}

fn write_all(items: &[Value], visiting: &mut HashSet<usize>) -> Result<Vec<Json>, Error> {
    items.iter().map(|v| write_value(v, visiting)).collect()
}

fn write_value(value: &Value, visiting: &mut HashSet<usize>) -> Result<Json, Error> {
    match value {
        Value::Null => Ok(Json::Null),
        Value::Bool(b) => Ok(Json::Bool(*b)),
        Value::Int(i) => match i.to_i64() {
            Some(n) => Ok(Json::Number(Number::from(n))),
            None => Ok(marker_obj("@bi", Json::String(i.to_string()))),
        },
        Value::Float(v) => {
            if v.is_nan() {
                Ok(marker_obj("@f", Json::String("nan".into())))
            } else if v.is_infinite() {
                Ok(marker_obj("@f", Json::String(if *v > 0.0 { "inf".into() } else { "-inf".into() })))
            } else {
                Ok(Json::Number(Number::from_f64(*v).unwrap_or_else(|| Number::from(0))))
            }
        }
        Value::Str(s) => Ok(Json::String(s.inner().clone())),
        Value::Bytes(b) => Ok(marker_obj(
            "@b",
            Json::String(base64::engine::general_purpose::STANDARD.encode(b.inner().as_slice())),
        )),
        Value::List(l) => with_guard(l.provenance(), visiting, |visiting| {
            let items = l.inner();
            Ok(Json::Array(write_all(&items, visiting)?))
        }),
        Value::Tuple(t) => with_guard(t.provenance(), visiting, |visiting| {
            Ok(marker_obj("@t", Json::Array(write_all(t.inner(), visiting)?)))
        }),
        Value::Dict(d) => with_guard(d.provenance(), visiting, |visiting| write_dict(&d.inner(), visiting)),
        Value::Set(s) => with_guard(s.provenance(), visiting, |visiting| {
            Ok(marker_obj("@set", Json::Array(write_all(&s.inner(), visiting)?)))
        }),
        Value::FrozenSet(s) => with_guard(s.provenance(), visiting, |visiting| {
            Ok(marker_obj("@fset", Json::Array(write_all(s.inner(), visiting)?)))
        }),
        Value::Global(g) => {
            let g = g.inner();
            Ok(marker_obj("@g", Json::Array(vec![Json::String(g.module.clone()), Json::String(g.name.clone())])))
        }
        Value::PersistentRef(p) => {
            let p = p.inner();
            let oid = Json::String(crate::value::hex_encode(&p.oid));
            match &p.class_hint {
                Some(hint) => {
                    let hint_json = write_value(hint, visiting)?;
                    Ok(marker_obj("@ref", Json::Array(vec![oid, hint_json])))
                }
                None => Ok(marker_obj("@ref", oid)),
            }
        }
        Value::Reduce(r) => with_guard(r.provenance(), visiting, |visiting| write_reduce(&r.inner(), visiting)),
        Value::Known(k) => write_known(k.inner()),
        Value::Record(r) => {
            let r = r.inner();
            let mut obj = Map::new();
            obj.insert("@cls".into(), Json::Array(vec![Json::String(r.cls.0.clone()), Json::String(r.cls.1.clone())]));
            obj.insert("@s".into(), write_value(&r.state, visiting)?);
            Ok(Json::Object(obj))
        }
        Value::BTree(b) => write_btree(b.inner(), visiting),
    }
}

fn write_dict(items: &[(Value, Value)], visiting: &mut HashSet<usize>) -> Result<Json, Error> {
    let plain = items
        .iter()
        .all(|(k, _)| matches!(k, Value::Str(s) if !RESERVED_MARKERS.contains(&s.inner().as_str())));
    if plain {
        let mut obj = Map::new();
        for (k, v) in items {
            let Value::Str(s) = k else { unreachable!() };
            obj.insert(s.inner().clone(), write_value(v, visiting)?);
        }
        Ok(Json::Object(obj))
    } else {
        let mut arr = Vec::with_capacity(items.len());
        for (k, v) in items {
            arr.push(Json::Array(vec![write_value(k, visiting)?, write_value(v, visiting)?]));
        }
        Ok(marker_obj("@d", Json::Array(arr)))
    }
}

fn write_kv_pairs(pairs: &[(Value, Value)], visiting: &mut HashSet<usize>) -> Result<Vec<Json>, Error> {
    pairs
        .iter()
        .map(|(k, v)| Ok(Json::Array(vec![write_value(k, visiting)?, write_value(v, visiting)?])))
        .collect()
}

fn write_reduce(r: &ReduceData, visiting: &mut HashSet<usize>) -> Result<Json, Error> {
    let mut obj = Map::new();
    let callable_json = match &r.callable {
        Value::Global(g) => {
            let g = g.inner();
            Json::Array(vec![Json::String(g.module.clone()), Json::String(g.name.clone())])
        }
        other => write_value(other, visiting)?,
    };
    obj.insert("f".into(), callable_json);
    obj.insert("args".into(), Json::Array(write_all(&r.args, visiting)?));
    if let Some(state) = &r.state {
        obj.insert("state".into(), write_value(state, visiting)?);
    }
    if let Some(li) = &r.listitems {
        obj.insert("li".into(), Json::Array(write_all(li, visiting)?));
    }
    if let Some(di) = &r.dictitems {
        obj.insert("di".into(), Json::Array(write_kv_pairs(di, visiting)?));
    }
    if let Some(kw) = &r.kwargs {
        obj.insert("kw".into(), Json::Array(write_kv_pairs(kw, visiting)?));
    }
    Ok(marker_obj("@reduce", Json::Object(obj)))
}

fn format_offset(total_seconds: i32) -> String {
    let sign = if total_seconds < 0 { '-' } else { '+' };
    let abs = total_seconds.unsigned_abs();
    format!("{sign}{:02}:{:02}", abs / 3600, (abs % 3600) / 60)
}

fn write_tz_suffix(tz: &DateTimeZone) -> String {
    match tz {
        DateTimeZone::FixedOffset(secs) => format_offset(*secs),
        _ => String::new(),
    }
}

fn write_tz_field(obj: &mut Map<String, Json>, tz: &DateTimeZone) {
    match tz {
        DateTimeZone::Named(name) => {
            let mut tz_obj = Map::new();
            tz_obj.insert("name".into(), Json::String(name.clone()));
            obj.insert("@tz".into(), Json::Object(tz_obj));
        }
        DateTimeZone::ZoneInfo(key) => {
            let mut tz_obj = Map::new();
            tz_obj.insert("zoneinfo".into(), Json::String(key.clone()));
            obj.insert("@tz".into(), Json::Object(tz_obj));
        }
        DateTimeZone::Naive | DateTimeZone::FixedOffset(_) => {}
    }
}

fn write_known(k: &KnownValue) -> Result<Json, Error> {
    match k {
        KnownValue::DateTime { naive, micros_present, tz } => {
            let mut iso = naive.format("%Y-%m-%dT%H:%M:%S").to_string();
            if *micros_present {
                iso.push_str(&format!(".{:06}", naive.time().nanosecond() / 1000));
            }
            iso.push_str(&write_tz_suffix(tz));
            let mut obj = Map::new();
            obj.insert("@dt".into(), Json::String(iso));
            write_tz_field(&mut obj, tz);
            Ok(Json::Object(obj))
        }
        KnownValue::Date(d) => Ok(marker_obj("@date", Json::String(d.format("%Y-%m-%d").to_string()))),
        KnownValue::Time { naive, micros_present, tz } => {
            let mut iso = naive.format("%H:%M:%S").to_string();
            if *micros_present {
                iso.push_str(&format!(".{:06}", naive.nanosecond() / 1000));
            }
            iso.push_str(&write_tz_suffix(tz));
            let mut obj = Map::new();
            obj.insert("@time".into(), Json::String(iso));
            write_tz_field(&mut obj, tz);
            Ok(Json::Object(obj))
        }
        KnownValue::Timedelta { days, seconds, microseconds } => Ok(marker_obj(
            "@td",
            Json::Array(vec![Json::Number(Number::from(*days)), Json::Number(Number::from(*seconds)), Json::Number(Number::from(*microseconds))]),
        )),
        KnownValue::Decimal(s) => Ok(marker_obj("@dec", Json::String(s.clone()))),
        KnownValue::Uuid(val) => Ok(marker_obj("@uuid", Json::String(uuid_to_string(*val)))),
    }
}

fn uuid_to_string(val: u128) -> String {
    let b = val.to_be_bytes();
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
    )
}

fn write_btree(shape: &BTreeShape, visiting: &mut HashSet<usize>) -> Result<Json, Error> {
    match shape {
        BTreeShape::Kv(pairs) => Ok(marker_obj("@kv", Json::Array(write_kv_pairs(pairs, visiting)?))),
        BTreeShape::Ks(keys) => Ok(marker_obj("@ks", Json::Array(write_all(keys, visiting)?))),
        BTreeShape::Children { children, first } => {
            let mut obj = Map::new();
            obj.insert("@children".into(), Json::Array(write_all(children, visiting)?));
            obj.insert("@first".into(), write_value(first, visiting)?);
            Ok(Json::Object(obj))
        }
    }
}

// ---------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------

/// Parses canonical JSON text and builds the corresponding `Value` tree.
pub fn from_json_str(text: &str) -> Result<Value, Error> {
    let json: Json = serde_json::from_str(text).map_err(|e| Error::new(ErrorCode::BadJson(e.to_string())))?;
    from_json(&json)
}

/// Converts an already-parsed `serde_json::Value` into a `Value` tree.
pub fn from_json(json: &Json) -> Result<Value, Error> {
    match json {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => read_number(n),
        Json::String(s) => Ok(Value::str(s.clone())),
        Json::Array(arr) => Ok(Value::list(arr.iter().map(from_json).collect::<Result<_, _>>()?)),
        Json::Object(map) => from_json_object(map),
    }
}

fn read_number(n: &Number) -> Result<Value, Error> {
    if n.is_i64() {
        Ok(Value::int(n.as_i64().unwrap()))
    } else if n.is_u64() {
        Ok(Value::int(n.as_u64().unwrap()))
    } else {
        n.as_f64().map(Value::Float).ok_or_else(|| Error::new(ErrorCode::BadJson("number out of range".into())))
    }
}

fn shape_err(msg: impl Into<String>) -> Error {
    Error::new(ErrorCode::BadMarkerShape(msg.into()))
}

fn as_array<'a>(v: Option<&'a Json>, marker: &str) -> Result<&'a Vec<Json>, Error> {
    v.and_then(Json::as_array).ok_or_else(|| shape_err(format!("{marker} expects an array")))
}

fn as_str<'a>(v: Option<&'a Json>, marker: &str) -> Result<&'a str, Error> {
    v.and_then(Json::as_str).ok_or_else(|| shape_err(format!("{marker} expects a string")))
}

fn read_kv_pairs(arr: &[Json], marker: &str) -> Result<Vec<(Value, Value)>, Error> {
    arr.iter()
        .map(|item| {
            let pair = item.as_array().filter(|p| p.len() == 2).ok_or_else(|| shape_err(format!("{marker} entry must be a [key, value] pair")))?;
            Ok((from_json(&pair[0])?, from_json(&pair[1])?))
        })
        .collect()
}

fn from_json_object(map: &Map<String, Json>) -> Result<Value, Error> {
    let marker_keys: Vec<&String> = map.keys().filter(|k| k.starts_with('@')).collect();
    if marker_keys.is_empty() {
        let items = map.iter().map(|(k, v)| Ok((Value::str(k.clone()), from_json(v)?))).collect::<Result<Vec<_>, Error>>()?;
        return Ok(Value::dict(items));
    }
    for k in &marker_keys {
        if !RESERVED_MARKERS.contains(&k.as_str()) {
            return Err(Error::new(ErrorCode::UnknownMarker((*k).clone())));
        }
    }
    let present: HashSet<&str> = marker_keys.iter().map(|s| s.as_str()).collect();

    if present.contains("@cls") {
        if present.len() != 2 || !present.contains("@s") {
            return Err(Error::new(ErrorCode::MixedMarker(describe(&marker_keys))));
        }
        let cls_arr = as_array(map.get("@cls"), "@cls")?;
        if cls_arr.len() != 2 {
            return Err(shape_err("@cls expects a [module, classname] pair"));
        }
        let module = cls_arr[0].as_str().ok_or_else(|| shape_err("@cls module must be a string"))?.to_string();
        let name = cls_arr[1].as_str().ok_or_else(|| shape_err("@cls classname must be a string"))?.to_string();
        let state = from_json(map.get("@s").unwrap())?;
        return Ok(Value::Record(SharedFrozen::new(RecordData { cls: (module, name), state })));
    }

    if present.contains("@children") {
        if present.len() != 2 || !present.contains("@first") {
            return Err(Error::new(ErrorCode::MixedMarker(describe(&marker_keys))));
        }
        let children = as_array(map.get("@children"), "@children")?.iter().map(from_json).collect::<Result<Vec<_>, _>>()?;
        let first = Box::new(from_json(map.get("@first").unwrap())?);
        return Ok(Value::BTree(SharedFrozen::new(BTreeShape::Children { children, first })));
    }

    if present.contains("@dt") {
        if !(present.len() == 1 || (present.len() == 2 && present.contains("@tz"))) {
            return Err(Error::new(ErrorCode::MixedMarker(describe(&marker_keys))));
        }
        return read_known_datetime(map, true);
    }
    if present.contains("@time") {
        if !(present.len() == 1 || (present.len() == 2 && present.contains("@tz"))) {
            return Err(Error::new(ErrorCode::MixedMarker(describe(&marker_keys))));
        }
        return read_known_datetime(map, false);
    }

    if present.len() != 1 {
        return Err(Error::new(ErrorCode::MixedMarker(describe(&marker_keys))));
    }
    let key = marker_keys[0].as_str();
    let payload = map.get(key).unwrap();
    match key {
        "@t" => {
            let arr = as_array(Some(payload), "@t")?;
            Ok(Value::tuple(arr.iter().map(from_json).collect::<Result<_, _>>()?))
        }
        "@b" => {
            let s = as_str(Some(payload), "@b")?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(|e| shape_err(format!("@b is not valid base64: {e}")))?;
            Ok(Value::bytes(bytes))
        }
        "@d" => {
            let arr = as_array(Some(payload), "@d")?;
            Ok(Value::dict(read_kv_pairs(arr, "@d")?))
        }
        "@bi" => {
            let s = as_str(Some(payload), "@bi")?;
            let n: num_bigint::BigInt = s.parse().map_err(|_| shape_err("@bi is not a valid integer"))?;
            Ok(Value::Int(n))
        }
        "@f" => {
            let s = as_str(Some(payload), "@f")?;
            let f = match s {
                "nan" => f64::NAN,
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                _ => return Err(shape_err("@f must be one of \"nan\", \"inf\", \"-inf\"")),
            };
            Ok(Value::Float(f))
        }
        "@set" => {
            let arr = as_array(Some(payload), "@set")?;
            Ok(Value::Set(Shared::new(arr.iter().map(from_json).collect::<Result<_, _>>()?)))
        }
        "@fset" => {
            let arr = as_array(Some(payload), "@fset")?;
            Ok(Value::FrozenSet(SharedFrozen::new(arr.iter().map(from_json).collect::<Result<_, _>>()?)))
        }
        "@g" => {
            let arr = as_array(Some(payload), "@g")?;
            if arr.len() != 2 {
                return Err(shape_err("@g expects a [module, name] pair"));
            }
            let module = arr[0].as_str().ok_or_else(|| shape_err("@g module must be a string"))?.to_string();
            let name = arr[1].as_str().ok_or_else(|| shape_err("@g name must be a string"))?.to_string();
            Ok(Value::Global(SharedFrozen::new(GlobalRef { module, name })))
        }
        "@ref" => match payload {
            Json::String(hex) => Ok(Value::PersistentRef(SharedFrozen::new(PersistentRefData {
                oid: decode_hex(hex)?,
                class_hint: None,
            }))),
            Json::Array(arr) if arr.len() == 2 => {
                let oid = arr[0].as_str().ok_or_else(|| shape_err("@ref oid must be a hex string"))?;
                Ok(Value::PersistentRef(SharedFrozen::new(PersistentRefData {
                    oid: decode_hex(oid)?,
                    class_hint: Some(from_json(&arr[1])?),
                })))
            }
            _ => Err(shape_err("@ref expects a hex string or a [oid, class_hint] pair")),
        },
        "@reduce" => read_reduce(payload),
        "@date" => {
            let s = as_str(Some(payload), "@date")?;
            let d = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| shape_err(format!("@date: {e}")))?;
            Ok(Value::Known(SharedFrozen::new(KnownValue::Date(d))))
        }
        "@td" => {
            let arr = as_array(Some(payload), "@td")?;
            if arr.len() != 3 {
                return Err(shape_err("@td expects [days, seconds, microseconds]"));
            }
            let as_i64 = |j: &Json| j.as_i64().ok_or_else(|| shape_err("@td fields must be integers"));
            Ok(Value::Known(SharedFrozen::new(KnownValue::Timedelta {
                days: as_i64(&arr[0])?,
                seconds: as_i64(&arr[1])?,
                microseconds: as_i64(&arr[2])?,
            })))
        }
        "@dec" => {
            let s = as_str(Some(payload), "@dec")?;
            Ok(Value::Known(SharedFrozen::new(KnownValue::Decimal(s.to_string()))))
        }
        "@uuid" => {
            let s = as_str(Some(payload), "@uuid")?;
            Ok(Value::Known(SharedFrozen::new(KnownValue::Uuid(parse_uuid(s)?))))
        }
        "@kv" => {
            let arr = as_array(Some(payload), "@kv")?;
            Ok(Value::BTree(SharedFrozen::new(BTreeShape::Kv(read_kv_pairs(arr, "@kv")?))))
        }
        "@ks" => {
            let arr = as_array(Some(payload), "@ks")?;
            Ok(Value::BTree(SharedFrozen::new(BTreeShape::Ks(arr.iter().map(from_json).collect::<Result<_, _>>()?))))
        }
        other => Err(Error::new(ErrorCode::UnknownMarker(other.to_string()))),
    }
}

fn describe(keys: &[&String]) -> String {
    keys.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
}

fn decode_hex(s: &str) -> Result<Vec<u8>, Error> {
    if s.len() % 2 != 0 {
        return Err(shape_err("oid hex string has odd length"));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| shape_err("oid is not valid hex")))
        .collect()
}

fn parse_uuid(s: &str) -> Result<u128, Error> {
    let hex: String = s.chars().filter(|c| *c != '-').collect();
    if hex.len() != 32 {
        return Err(shape_err("@uuid must be 32 hex digits"));
    }
    u128::from_str_radix(&hex, 16).map_err(|_| shape_err("@uuid is not valid hex"))
}

fn read_tz_field(map: &Map<String, Json>) -> Result<DateTimeZone, Error> {
    match map.get("@tz") {
        None => Ok(DateTimeZone::Naive),
        Some(Json::Object(obj)) => {
            if let Some(name) = obj.get("name").and_then(Json::as_str) {
                Ok(DateTimeZone::Named(name.to_string()))
            } else if let Some(key) = obj.get("zoneinfo").and_then(Json::as_str) {
                Ok(DateTimeZone::ZoneInfo(key.to_string()))
            } else {
                Err(shape_err("@tz must have a \"name\" or \"zoneinfo\" key"))
            }
        }
        Some(_) => Err(shape_err("@tz must be an object")),
    }
}

fn split_offset(iso: &str) -> (&str, Option<i32>) {
    let tail = &iso[iso.len().saturating_sub(6)..];
    if tail.len() == 6 && matches!(tail.as_bytes()[0], b'+' | b'-') && tail.as_bytes()[3] == b':' {
        let sign = if tail.as_bytes()[0] == b'-' { -1 } else { 1 };
        let hours: i32 = tail[1..3].parse().unwrap_or(0);
        let minutes: i32 = tail[4..6].parse().unwrap_or(0);
        (&iso[..iso.len() - 6], Some(sign * (hours * 3600 + minutes * 60)))
    } else {
        (iso, None)
    }
}

fn read_known_datetime(map: &Map<String, Json>, is_datetime: bool) -> Result<Value, Error> {
    let marker = if is_datetime { "@dt" } else { "@time" };
    let raw = as_str(map.get(marker), marker)?;
    let (body, offset) = split_offset(raw);
    let micros_present = body.contains('.');
    let mut tz = read_tz_field(map)?;
    if let Some(secs) = offset {
        tz = DateTimeZone::FixedOffset(secs);
    }
    if is_datetime {
        let fmt = if micros_present { "%Y-%m-%dT%H:%M:%S%.f" } else { "%Y-%m-%dT%H:%M:%S" };
        let naive = chrono::NaiveDateTime::parse_from_str(body, fmt).map_err(|e| shape_err(format!("@dt: {e}")))?;
        Ok(Value::Known(SharedFrozen::new(KnownValue::DateTime { naive, micros_present, tz })))
    } else {
        let fmt = if micros_present { "%H:%M:%S%.f" } else { "%H:%M:%S" };
        let naive = chrono::NaiveTime::parse_from_str(body, fmt).map_err(|e| shape_err(format!("@time: {e}")))?;
        Ok(Value::Known(SharedFrozen::new(KnownValue::Time { naive, micros_present, tz })))
    }
}

fn read_reduce(payload: &Json) -> Result<Value, Error> {
    let obj = payload.as_object().ok_or_else(|| shape_err("@reduce payload must be an object"))?;
    let callable = match obj.get("f") {
        Some(Json::Array(arr)) if arr.len() == 2 => {
            let module = arr[0].as_str().ok_or_else(|| shape_err("@reduce f[0] must be a string"))?.to_string();
            let name = arr[1].as_str().ok_or_else(|| shape_err("@reduce f[1] must be a string"))?.to_string();
            Value::Global(SharedFrozen::new(GlobalRef { module, name }))
        }
        Some(other) => from_json(other)?,
        None => return Err(shape_err("@reduce payload is missing \"f\"")),
    };
    let args = match obj.get("args") {
        Some(Json::Array(arr)) => arr.iter().map(from_json).collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
        Some(_) => return Err(shape_err("@reduce \"args\" must be an array")),
    };
    let mut data = ReduceData::new(callable, args);
    if let Some(state) = obj.get("state") {
        data.state = Some(from_json(state)?);
    }
    if let Some(Json::Array(li)) = obj.get("li") {
        data.listitems = Some(li.iter().map(from_json).collect::<Result<Vec<_>, _>>()?);
    }
    if let Some(Json::Array(di)) = obj.get("di") {
        data.dictitems = Some(read_kv_pairs(di, "@reduce.di")?);
    }
    if let Some(Json::Array(kw)) = obj.get("kw") {
        data.kwargs = Some(read_kv_pairs(kw, "@reduce.kw")?);
    }
    Ok(Value::Reduce(Shared::new(data)))
}
