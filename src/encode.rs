// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Protocol-3 pickle encoder: a `Value` tree in, bytes out. The inverse of
//! `decode`, narrowest-opcode-selecting and fully deterministic.

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::consts;
use crate::error::{Error, ErrorCode};
use crate::value::{DateTimeZone, GlobalRef, KnownValue, PersistentRefData, ReduceData, Shared, SharedFrozen, Value};

/// Encodes a single value as a complete `PROTO 3 ... STOP` pickle stream.
pub fn encode(value: &Value) -> Result<Vec<u8>, Error> {
    let mut enc = Encoder::new();
    enc.buf.push(consts::PROTO);
    enc.buf.push(3);
    enc.encode_value(value)?;
    enc.buf.push(consts::STOP);
    Ok(enc.buf)
}

struct Encoder {
    buf: Vec<u8>,
    next_memo_id: u32,
    global_memo: HashMap<usize, u32>,
}

impl Encoder {
    fn new() -> Self {
        Encoder { buf: Vec::new(), next_memo_id: 0, global_memo: HashMap::new() }
    }

    fn memoize(&mut self) -> u32 {
        let id = self.next_memo_id;
        self.next_memo_id += 1;
        self.buf.push(consts::MEMOIZE);
        id
    }

    fn emit_get(&mut self, id: u32) {
        if id <= u8::MAX as u32 {
            self.buf.push(consts::BINGET);
            self.buf.push(id as u8);
        } else {
            self.buf.push(consts::LONG_BINGET);
            let mut b = [0u8; 4];
            LittleEndian::write_u32(&mut b, id);
            self.buf.extend_from_slice(&b);
        }
    }

    fn write_text_line(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(b'\n');
    }

    fn encode_value(&mut self, v: &Value) -> Result<(), Error> {
        match v {
            Value::Null => self.buf.push(consts::NONE),
            Value::Bool(b) => self.buf.push(if *b { consts::NEWTRUE } else { consts::NEWFALSE }),
            Value::Int(i) => self.encode_int(i),
            Value::Float(f) => {
                self.buf.push(consts::BINFLOAT);
                let mut b = [0u8; 8];
                BigEndian::write_f64(&mut b, *f);
                self.buf.extend_from_slice(&b);
            }
            Value::Str(s) => {
                self.encode_str_bytes(s.inner());
                self.memoize();
            }
            Value::Bytes(b) => {
                self.encode_byte_string(b.inner());
                self.memoize();
            }
            Value::List(l) => {
                let items = l.inner();
                self.buf.push(consts::EMPTY_LIST);
                self.memoize();
                if !items.is_empty() {
                    self.buf.push(consts::MARK);
                    for item in items.iter() {
                        self.encode_value(item)?;
                    }
                    self.buf.push(consts::APPENDS);
                }
            }
            Value::Tuple(t) => {
                self.encode_tuple_items(t.inner())?;
                self.memoize();
            }
            Value::Dict(d) => {
                let items = d.inner();
                self.buf.push(consts::EMPTY_DICT);
                self.memoize();
                if !items.is_empty() {
                    self.buf.push(consts::MARK);
                    for (k, val) in items.iter() {
                        self.encode_value(k)?;
                        self.encode_value(val)?;
                    }
                    self.buf.push(consts::SETITEMS);
                }
            }
            Value::Set(s) => {
                let items = s.inner();
                self.buf.push(consts::EMPTY_SET);
                self.memoize();
                if !items.is_empty() {
                    self.buf.push(consts::MARK);
                    for item in items.iter() {
                        self.encode_value(item)?;
                    }
                    self.buf.push(consts::ADDITEMS);
                }
            }
            Value::FrozenSet(s) => {
                self.buf.push(consts::MARK);
                for item in s.inner() {
                    self.encode_value(item)?;
                }
                self.buf.push(consts::FROZENSET);
                self.memoize();
            }
            Value::Global(g) => self.encode_global(g),
            Value::PersistentRef(p) => self.encode_persistent_ref(p)?,
            Value::Reduce(r) => self.encode_reduce(&r.inner())?,
            Value::Known(k) => self.encode_known(k.inner())?,
            Value::Record(_) => {
                return Err(Error::new(ErrorCode::EncodeFailure(
                    "a Record must be encoded through encode_record, not as a plain value".into(),
                )));
            }
            Value::BTree(_) => {
                return Err(Error::new(ErrorCode::EncodeFailure(
                    "a BTree shape must be unflattened before it can be pickled".into(),
                )));
            }
        }
        Ok(())
    }

    fn encode_int(&mut self, i: &BigInt) {
        if let Some(n) = i.to_i64() {
            if (0..256).contains(&n) {
                self.buf.push(consts::BININT1);
                self.buf.push(n as u8);
                return;
            }
            if (0..65536).contains(&n) {
                self.buf.push(consts::BININT2);
                let mut b = [0u8; 2];
                LittleEndian::write_u16(&mut b, n as u16);
                self.buf.extend_from_slice(&b);
                return;
            }
            if (i32::MIN as i64..=i32::MAX as i64).contains(&n) {
                self.buf.push(consts::BININT);
                let mut b = [0u8; 4];
                LittleEndian::write_i32(&mut b, n as i32);
                self.buf.extend_from_slice(&b);
                return;
            }
        }
        let bytes = bigint_to_long_bytes(i);
        if bytes.len() <= 255 {
            self.buf.push(consts::LONG1);
            self.buf.push(bytes.len() as u8);
        } else {
            self.buf.push(consts::LONG4);
            let mut b = [0u8; 4];
            LittleEndian::write_i32(&mut b, bytes.len() as i32);
            self.buf.extend_from_slice(&b);
        }
        self.buf.extend_from_slice(&bytes);
    }

    fn encode_str_bytes(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let len = bytes.len();
        if len <= 255 {
            self.buf.push(consts::SHORT_BINUNICODE);
            self.buf.push(len as u8);
        } else if (len as u64) < (1u64 << 32) {
            self.buf.push(consts::BINUNICODE);
            let mut b = [0u8; 4];
            LittleEndian::write_u32(&mut b, len as u32);
            self.buf.extend_from_slice(&b);
        } else {
            self.buf.push(consts::BINUNICODE8);
            let mut b = [0u8; 8];
            LittleEndian::write_u64(&mut b, len as u64);
            self.buf.extend_from_slice(&b);
        }
        self.buf.extend_from_slice(bytes);
    }

    fn encode_byte_string(&mut self, bytes: &[u8]) {
        let len = bytes.len();
        if len <= 255 {
            self.buf.push(consts::SHORT_BINBYTES);
            self.buf.push(len as u8);
        } else if (len as u64) < (1u64 << 32) {
            self.buf.push(consts::BINBYTES);
            let mut b = [0u8; 4];
            LittleEndian::write_u32(&mut b, len as u32);
            self.buf.extend_from_slice(&b);
        } else {
            self.buf.push(consts::BINBYTES8);
            let mut b = [0u8; 8];
            LittleEndian::write_u64(&mut b, len as u64);
            self.buf.extend_from_slice(&b);
        }
        self.buf.extend_from_slice(bytes);
    }

    fn encode_tuple_items(&mut self, items: &[Value]) -> Result<(), Error> {
        match items.len() {
            0 => self.buf.push(consts::EMPTY_TUPLE),
            1 => {
                self.encode_value(&items[0])?;
                self.buf.push(consts::TUPLE1);
            }
            2 => {
                self.encode_value(&items[0])?;
                self.encode_value(&items[1])?;
                self.buf.push(consts::TUPLE2);
            }
            3 => {
                self.encode_value(&items[0])?;
                self.encode_value(&items[1])?;
                self.encode_value(&items[2])?;
                self.buf.push(consts::TUPLE3);
            }
            _ => {
                self.buf.push(consts::MARK);
                for item in items {
                    self.encode_value(item)?;
                }
                self.buf.push(consts::TUPLE);
            }
        }
        Ok(())
    }

    fn encode_global(&mut self, g: &SharedFrozen<GlobalRef>) {
        let ptr = g.provenance();
        if let Some(&id) = self.global_memo.get(&ptr) {
            self.emit_get(id);
            return;
        }
        let gref = g.inner();
        self.buf.push(consts::GLOBAL);
        self.write_text_line(&gref.module);
        self.write_text_line(&gref.name);
        let id = self.memoize();
        self.global_memo.insert(ptr, id);
    }

    fn encode_persistent_ref(&mut self, p: &SharedFrozen<PersistentRefData>) -> Result<(), Error> {
        let p = p.inner();
        match &p.class_hint {
            Some(hint) => {
                self.encode_byte_string(&p.oid);
                self.memoize();
                self.encode_value(hint)?;
                self.buf.push(consts::TUPLE2);
                self.memoize();
            }
            std::option::Option::None => {
                self.encode_byte_string(&p.oid);
                self.memoize();
            }
        }
        self.buf.push(consts::BINPERSID);
        Ok(())
    }

    fn encode_reduce(&mut self, data: &ReduceData) -> Result<(), Error> {
        self.encode_value(&data.callable)?;
        self.encode_tuple_items(&data.args)?;
        self.memoize();
        if let Some(kwargs) = &data.kwargs {
            self.encode_dict_items(kwargs)?;
            self.buf.push(consts::NEWOBJ_EX);
        } else {
            self.buf.push(consts::REDUCE);
        }
        self.memoize();
        if let Some(state) = &data.state {
            self.encode_value(state)?;
            self.buf.push(consts::BUILD);
        }
        if let Some(li) = &data.listitems {
            self.buf.push(consts::MARK);
            for v in li {
                self.encode_value(v)?;
            }
            self.buf.push(consts::APPENDS);
        }
        if let Some(di) = &data.dictitems {
            self.buf.push(consts::MARK);
            for (k, v) in di {
                self.encode_value(k)?;
                self.encode_value(v)?;
            }
            self.buf.push(consts::SETITEMS);
        }
        Ok(())
    }

    fn encode_dict_items(&mut self, items: &[(Value, Value)]) -> Result<(), Error> {
        self.buf.push(consts::EMPTY_DICT);
        self.memoize();
        if !items.is_empty() {
            self.buf.push(consts::MARK);
            for (k, v) in items {
                self.encode_value(k)?;
                self.encode_value(v)?;
            }
            self.buf.push(consts::SETITEMS);
        }
        Ok(())
    }

    fn encode_known(&mut self, k: &KnownValue) -> Result<(), Error> {
        match k {
            KnownValue::DateTime { naive, micros_present, tz } => {
                let bytes = datetime_wire_bytes(naive, *micros_present);
                let mut args = vec![Value::bytes(bytes)];
                if let Some(tzv) = tz_to_value(tz) {
                    args.push(tzv);
                }
                let data = ReduceData::new(global("datetime", "datetime"), args);
                self.encode_reduce(&data)
            }
            KnownValue::Date(d) => {
                let year = d.year() as u16;
                let bytes = vec![(year >> 8) as u8, year as u8, d.month() as u8, d.day() as u8];
                let data = ReduceData::new(global("datetime", "date"), vec![Value::bytes(bytes)]);
                self.encode_reduce(&data)
            }
            KnownValue::Time { naive, micros_present, tz } => {
                let bytes = time_wire_bytes(naive, *micros_present);
                let mut args = vec![Value::bytes(bytes)];
                if let Some(tzv) = tz_to_value(tz) {
                    args.push(tzv);
                }
                let data = ReduceData::new(global("datetime", "time"), args);
                self.encode_reduce(&data)
            }
            KnownValue::Timedelta { days, seconds, microseconds } => {
                let data = ReduceData::new(
                    global("datetime", "timedelta"),
                    vec![Value::int(*days), Value::int(*seconds), Value::int(*microseconds)],
                );
                self.encode_reduce(&data)
            }
            KnownValue::Decimal(s) => {
                let data = ReduceData::new(global("decimal", "Decimal"), vec![Value::str(s.clone())]);
                self.encode_reduce(&data)
            }
            KnownValue::Uuid(val) => {
                let bytes = val.to_be_bytes().to_vec();
                let data = ReduceData::new(global("uuid", "UUID"), vec![Value::bytes(bytes)]);
                self.encode_reduce(&data)
            }
        }
    }
}

fn global(module: &str, name: &str) -> Value {
    Value::Global(SharedFrozen::new(GlobalRef { module: module.to_string(), name: name.to_string() }))
}

fn tz_to_value(tz: &DateTimeZone) -> Option<Value> {
    match tz {
        DateTimeZone::Naive => std::option::Option::None,
        DateTimeZone::FixedOffset(secs) => {
            let delta = KnownValue::Timedelta { days: 0, seconds: *secs as i64, microseconds: 0 };
            let data = ReduceData::new(global("datetime", "timezone"), vec![Value::Known(SharedFrozen::new(delta))]);
            Some(Value::Reduce(Shared::new(data)))
        }
        DateTimeZone::Named(name) => {
            let data = ReduceData::new(global("pytz", "timezone"), vec![Value::str(name.clone())]);
            Some(Value::Reduce(Shared::new(data)))
        }
        DateTimeZone::ZoneInfo(key) => {
            let data = ReduceData::new(global("zoneinfo", "ZoneInfo"), vec![Value::str(key.clone())]);
            Some(Value::Reduce(Shared::new(data)))
        }
    }
}

fn datetime_wire_bytes(naive: &NaiveDateTime, micros_present: bool) -> Vec<u8> {
    let date = naive.date();
    let time = naive.time();
    let year = date.year() as u16;
    let micros = if micros_present { time.nanosecond() / 1000 } else { 0 };
    vec![
        (year >> 8) as u8,
        year as u8,
        date.month() as u8,
        date.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
        (micros >> 16) as u8,
        (micros >> 8) as u8,
        micros as u8,
    ]
}

fn time_wire_bytes(naive: &NaiveTime, micros_present: bool) -> Vec<u8> {
    let micros = if micros_present { naive.nanosecond() / 1000 } else { 0 };
    vec![
        naive.hour() as u8,
        naive.minute() as u8,
        naive.second() as u8,
        (micros >> 16) as u8,
        (micros >> 8) as u8,
        micros as u8,
    ]
}

/// The inverse of `decode.rs`'s `decode_long_bytes`: minimal-length
/// little-endian two's-complement encoding of `i`.
fn bigint_to_long_bytes(i: &BigInt) -> Vec<u8> {
    if i.sign() == num_bigint::Sign::NoSign {
        return Vec::new();
    }
    let mut nbytes = 1usize;
    loop {
        let shift = (nbytes * 8 - 1) as u32;
        let lower = -(BigInt::from(1) << shift);
        let upper = BigInt::from(1) << shift;
        if *i >= lower && *i < upper {
            break;
        }
        nbytes += 1;
    }
    let modulus = BigInt::from(1) << (nbytes * 8);
    let unsigned = if i.sign() == num_bigint::Sign::Minus { i + &modulus } else { i.clone() };
    let (_, mut bytes) = unsigned.to_bytes_le();
    bytes.resize(nbytes, 0);
    bytes
}
