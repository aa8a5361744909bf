// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Shared helpers for the integration suites in `tests/`.
//!
//! There is no Python available in this environment to produce reference
//! pickles with `pickle.dumps`, so these helpers build pickle bytes with the
//! crate's own encoder instead, in the same way `test_btrees.py`'s
//! `make_zodb_record` builds fixtures by hand from `(module, classname,
//! state)` triples.

use zodb_json_codec::encode::encode;
use zodb_json_codec::value::{GlobalRef, RecordData, ReduceData, Shared, SharedFrozen};
use zodb_json_codec::Value;

/// A two-pickle ZODB record: a `GLOBAL`-opcode class identity pickle
/// followed by the state pickle, the shape `record.rs::decode_record` and
/// `make_zodb_record` in `test_btrees.py`/`test_zodb_records.py` both build.
pub fn make_zodb_record(module: &str, classname: &str, state: Value) -> Vec<u8> {
    let mut out = encode(&global(module, classname)).expect("class identity always encodes");
    out.extend_from_slice(&encode(&state).expect("state encodes"));
    out
}

/// Builds a `Value::Record` directly, without going through pickle bytes —
/// useful for fixtures that exercise `json_io`/`encode` in isolation.
pub fn make_zodb_record_as_value(module: &str, classname: &str, state: Value) -> Value {
    Value::Record(SharedFrozen::new(RecordData { cls: (module.to_string(), classname.to_string()), state }))
}

/// A record whose class identity pickle is a literal `(module, classname)`
/// tuple rather than a `GLOBAL` opcode — `decode_record` must accept both.
pub fn make_zodb_record_tuple_class(module: &str, classname: &str, state: Value) -> Vec<u8> {
    let cls = Value::tuple(vec![Value::str(module), Value::str(classname)]);
    let mut out = encode(&cls).expect("class identity always encodes");
    out.extend_from_slice(&encode(&state).expect("state encodes"));
    out
}

/// The 10-byte wire form `datetime.datetime` expects: year (big-endian
/// 16-bit), month, day, hour, minute, second, then a 3-byte big-endian
/// microseconds field.
pub fn datetime_bytes(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8, micros: u32) -> Vec<u8> {
    vec![
        (year >> 8) as u8,
        year as u8,
        month,
        day,
        hour,
        minute,
        second,
        (micros >> 16) as u8,
        (micros >> 8) as u8,
        micros as u8,
    ]
}

pub fn date_bytes(year: u16, month: u8, day: u8) -> Vec<u8> {
    vec![(year >> 8) as u8, year as u8, month, day]
}

pub fn time_bytes(hour: u8, minute: u8, second: u8, micros: u32) -> Vec<u8> {
    vec![hour, minute, second, (micros >> 16) as u8, (micros >> 8) as u8, micros as u8]
}

/// A bare `REDUCE`-shaped pickle of `datetime.timezone(timedelta(...))`,
/// matching what `recognizer::recognize_tz` expects for a fixed UTC offset.
pub fn fixed_offset_tz(total_seconds: i64) -> Value {
    let delta = ReduceData::new(
        global("datetime", "timedelta"),
        vec![Value::int(0i64), Value::int(total_seconds), Value::int(0i64)],
    );
    let tz = ReduceData::new(global("datetime", "timezone"), vec![Value::Reduce(Shared::new(delta))]);
    Value::Reduce(Shared::new(tz))
}

/// `pytz.utc`, pickled (via `copyreg`) as a bare global reference.
pub fn pytz_utc_tz() -> Value {
    global("pytz", "utc")
}

/// A named `pytz` zone, e.g. `pytz.timezone("US/Eastern")`.
pub fn pytz_named_tz(name: &str) -> Value {
    let reduce = ReduceData::new(global("pytz", "timezone"), vec![Value::str(name)]);
    Value::Reduce(Shared::new(reduce))
}

/// `zoneinfo.ZoneInfo("...")`.
pub fn zoneinfo_tz(key: &str) -> Value {
    let reduce = ReduceData::new(global("zoneinfo", "ZoneInfo"), vec![Value::str(key)]);
    Value::Reduce(Shared::new(reduce))
}

/// A `datetime.datetime`-shaped `REDUCE`, the form the decoder produces
/// before the Known-Type Recognizer rewrites it.
pub fn datetime_value(wire_bytes: Vec<u8>, tz: Option<Value>) -> Value {
    let mut args = vec![Value::bytes(wire_bytes)];
    if let Some(tz) = tz {
        args.push(tz);
    }
    Value::Reduce(Shared::new(ReduceData::new(global("datetime", "datetime"), args)))
}

pub fn date_value(wire_bytes: Vec<u8>) -> Value {
    Value::Reduce(Shared::new(ReduceData::new(global("datetime", "date"), vec![Value::bytes(wire_bytes)])))
}

pub fn time_value(wire_bytes: Vec<u8>, tz: Option<Value>) -> Value {
    let mut args = vec![Value::bytes(wire_bytes)];
    if let Some(tz) = tz {
        args.push(tz);
    }
    Value::Reduce(Shared::new(ReduceData::new(global("datetime", "time"), args)))
}

pub fn timedelta_value(days: i64, seconds: i64, microseconds: i64) -> Value {
    let reduce = ReduceData::new(
        global("datetime", "timedelta"),
        vec![Value::int(days), Value::int(seconds), Value::int(microseconds)],
    );
    Value::Reduce(Shared::new(reduce))
}

pub fn decimal_value(s: &str) -> Value {
    Value::Reduce(Shared::new(ReduceData::new(global("decimal", "Decimal"), vec![Value::str(s)])))
}

pub fn uuid_value(bytes16: [u8; 16]) -> Value {
    let reduce = ReduceData::new(global("uuid", "UUID"), vec![Value::bytes(bytes16.to_vec())]);
    Value::Reduce(Shared::new(reduce))
}

pub fn set_value(items: Vec<Value>) -> Value {
    Value::Reduce(Shared::new(ReduceData::new(global("builtins", "set"), vec![Value::list(items)])))
}

pub fn frozenset_value(items: Vec<Value>) -> Value {
    Value::Reduce(Shared::new(ReduceData::new(global("builtins", "frozenset"), vec![Value::list(items)])))
}

pub fn global(module: &str, name: &str) -> Value {
    Value::Global(SharedFrozen::new(GlobalRef { module: module.to_string(), name: name.to_string() }))
}

/// Builds a `NaiveDateTime` without going through the deprecated
/// `NaiveDate::and_hms*` helpers, mirroring how `recognizer.rs` assembles one.
pub fn naive_datetime(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32, micro: u32) -> chrono::NaiveDateTime {
    let date = chrono::NaiveDate::from_ymd_opt(year, month, day).expect("valid date");
    let time = chrono::NaiveTime::from_hms_micro_opt(hour, minute, second, micro).expect("valid time");
    chrono::NaiveDateTime::new(date, time)
}
