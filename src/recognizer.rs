// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Rewrites `Reduce` values produced by the decoder into compact
//! `KnownValue` markers, table-driven on `(module, classname)` and argument
//! shape. Never fails: an unmatched `Reduce` passes through unchanged.

use num_traits::ToPrimitive;

use crate::value::{DateTimeZone, KnownValue, ReduceData, Shared, SharedFrozen, Value};

/// Bottom-up rewrite of a decoded value tree.
pub fn recognize(value: Value) -> Value {
    match value {
        Value::List(l) => {
            let items = l.into_raw_or_cloned();
            Value::list(items.into_iter().map(recognize).collect())
        }
        Value::Tuple(t) => {
            let items = t.into_raw_or_cloned();
            Value::tuple(items.into_iter().map(recognize).collect())
        }
        Value::Dict(d) => {
            let items = d.into_raw_or_cloned();
            Value::dict(items.into_iter().map(|(k, v)| (recognize(k), recognize(v))).collect())
        }
        Value::Set(s) => {
            let items = s.into_raw_or_cloned();
            Value::Set(Shared::new(items.into_iter().map(recognize).collect()))
        }
        Value::FrozenSet(s) => {
            let items = s.into_raw_or_cloned();
            Value::FrozenSet(SharedFrozen::new(items.into_iter().map(recognize).collect()))
        }
        Value::Reduce(r) => {
            let data = r.into_raw_or_cloned();
            let data = ReduceData {
                callable: recognize(data.callable),
                args: data.args.into_iter().map(recognize).collect(),
                kwargs: data
                    .kwargs
                    .map(|kv| kv.into_iter().map(|(k, v)| (recognize(k), recognize(v))).collect()),
                state: data.state.map(recognize),
                listitems: data.listitems.map(|v| v.into_iter().map(recognize).collect()),
                dictitems: data
                    .dictitems
                    .map(|kv| kv.into_iter().map(|(k, v)| (recognize(k), recognize(v))).collect()),
            };
            try_recognize(data)
        }
        Value::Record(rec) => {
            let data = rec.into_raw_or_cloned();
            Value::Record(SharedFrozen::new(crate::value::RecordData {
                cls: data.cls,
                state: recognize(data.state),
            }))
        }
        other => other,
    }
}

fn callable_pair(data: &ReduceData) -> Option<(&str, &str)> {
    match &data.callable {
        Value::Global(g) => Some((g.inner().module.as_str(), g.inner().name.as_str())),
        _ => None,
    }
}

fn try_recognize(data: ReduceData) -> Value {
    if let Some((module, name)) = callable_pair(&data) {
        let recognized = match (module, name) {
            ("datetime", "datetime") => recognize_datetime(&data),
            ("datetime", "date") => recognize_date(&data),
            ("datetime", "time") => recognize_time(&data),
            ("datetime", "timedelta") => recognize_timedelta(&data),
            ("decimal", "Decimal") => recognize_decimal(&data),
            ("uuid", "UUID") => recognize_uuid(&data),
            ("builtins", "set") => recognize_collection(&data, false),
            ("builtins", "frozenset") => recognize_collection(&data, true),
            _ => None,
        };
        if let Some(v) = recognized {
            return v;
        }
    }
    Value::Reduce(Shared::new(data))
}

fn bytes_arg(data: &ReduceData, index: usize, expected_len: usize) -> Option<Vec<u8>> {
    match data.args.get(index)? {
        Value::Bytes(b) => {
            let b = b.inner();
            if b.len() == expected_len {
                Some(b.clone())
            } else {
                None
            }
        }
        _ => None,
    }
}

fn recognize_tz(v: &Value) -> DateTimeZone {
    match v {
        Value::Null => DateTimeZone::Naive,
        Value::Global(g) if g.inner().name == "utc" => DateTimeZone::FixedOffset(0),
        Value::Reduce(r) => {
            let r = r.inner();
            let Some((module, name)) = callable_pair(&r) else {
                return DateTimeZone::Naive;
            };
            if module == "datetime" && name == "timezone" {
                if let Some(Value::Known(k)) = r.args.first() {
                    if let KnownValue::Timedelta { days, seconds, .. } = k.inner() {
                        return DateTimeZone::FixedOffset((days * 86400 + seconds) as i32);
                    }
                }
            } else if module.starts_with("pytz") {
                if let Some(Value::Str(s)) = r.args.iter().find(|a| matches!(a, Value::Str(_))) {
                    return DateTimeZone::Named(s.inner().clone());
                }
            } else if module == "zoneinfo" && name == "ZoneInfo" {
                if let Some(Value::Str(s)) = r.args.first() {
                    return DateTimeZone::ZoneInfo(s.inner().clone());
                }
            }
            DateTimeZone::Naive
        }
        _ => DateTimeZone::Naive,
    }
}

fn recognize_datetime(data: &ReduceData) -> Option<Value> {
    let bytes = bytes_arg(data, 0, 10)?;
    let year = u16::from_be_bytes([bytes[0], bytes[1]]) as i32;
    let (month, day, hour, minute, second) =
        (bytes[2] as u32, bytes[3] as u32, bytes[4] as u32, bytes[5] as u32, bytes[6] as u32);
    let micros = ((bytes[7] as u32) << 16) | ((bytes[8] as u32) << 8) | (bytes[9] as u32);
    let date = chrono::NaiveDate::from_ymd_opt(year, month, day)?;
    let time = chrono::NaiveTime::from_hms_micro_opt(hour, minute, second, micros)?;
    let naive = chrono::NaiveDateTime::new(date, time);
    let tz = data.args.get(1).map(recognize_tz).unwrap_or(DateTimeZone::Naive);
    Some(Value::Known(SharedFrozen::new(KnownValue::DateTime {
        naive,
        micros_present: micros != 0,
        tz,
    })))
}

fn recognize_date(data: &ReduceData) -> Option<Value> {
    let bytes = bytes_arg(data, 0, 4)?;
    let year = u16::from_be_bytes([bytes[0], bytes[1]]) as i32;
    let date = chrono::NaiveDate::from_ymd_opt(year, bytes[2] as u32, bytes[3] as u32)?;
    Some(Value::Known(SharedFrozen::new(KnownValue::Date(date))))
}

fn recognize_time(data: &ReduceData) -> Option<Value> {
    let bytes = bytes_arg(data, 0, 6)?;
    let micros = ((bytes[3] as u32) << 16) | ((bytes[4] as u32) << 8) | (bytes[5] as u32);
    let naive = chrono::NaiveTime::from_hms_micro_opt(bytes[0] as u32, bytes[1] as u32, bytes[2] as u32, micros)?;
    let tz = data.args.get(1).map(recognize_tz).unwrap_or(DateTimeZone::Naive);
    Some(Value::Known(SharedFrozen::new(KnownValue::Time {
        naive,
        micros_present: micros != 0,
        tz,
    })))
}

fn recognize_timedelta(data: &ReduceData) -> Option<Value> {
    if data.args.len() != 3 {
        return None;
    }
    let as_i64 = |v: &Value| match v {
        Value::Int(i) => i.to_i64(),
        _ => None,
    };
    let days = as_i64(&data.args[0])?;
    let seconds = as_i64(&data.args[1])?;
    let microseconds = as_i64(&data.args[2])?;
    Some(Value::Known(SharedFrozen::new(KnownValue::Timedelta { days, seconds, microseconds })))
}

fn recognize_decimal(data: &ReduceData) -> Option<Value> {
    match data.args.first() {
        Some(Value::Str(s)) => Some(Value::Known(SharedFrozen::new(KnownValue::Decimal(s.inner().clone())))),
        _ => None,
    }
}

fn recognize_uuid(data: &ReduceData) -> Option<Value> {
    if let Some(kwargs) = &data.kwargs {
        for (k, v) in kwargs {
            if let Value::Str(key) = k {
                if key.inner() == "int" {
                    if let Value::Int(i) = v {
                        return Some(Value::Known(SharedFrozen::new(KnownValue::Uuid(i.to_u128()?))));
                    }
                }
            }
        }
    }
    match data.args.first() {
        Some(Value::Bytes(b)) if b.inner().len() == 16 => {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(b.inner());
            Some(Value::Known(SharedFrozen::new(KnownValue::Uuid(u128::from_be_bytes(raw)))))
        }
        Some(Value::Int(i)) => Some(Value::Known(SharedFrozen::new(KnownValue::Uuid(i.to_u128()?)))),
        _ => None,
    }
}

fn recognize_collection(data: &ReduceData, frozen: bool) -> Option<Value> {
    if data.args.len() != 1 {
        return None;
    }
    let items = match &data.args[0] {
        Value::List(l) => l.inner().clone(),
        Value::Tuple(t) => t.inner().clone(),
        _ => return None,
    };
    Some(if frozen {
        Value::FrozenSet(SharedFrozen::new(items))
    } else {
        Value::Set(Shared::new(items))
    })
}
