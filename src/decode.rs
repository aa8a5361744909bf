// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! The pickle virtual machine: opcodes in, a `Value` tree out.

use std::collections::HashMap;
use std::convert::TryFrom;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use num_bigint::BigInt;

use crate::consts::Opcode;
use crate::error::{Error, ErrorCode};
use crate::limits::Limits;
use crate::value::{GlobalRef, PersistentRefData, ReduceData, Shared, SharedFrozen, Value};

/// Decode a single pickle stream starting at byte 0. Returns the decoded
/// value and the number of bytes consumed (up to and including `STOP`), so
/// callers can decode further concatenated streams (see `record.rs`).
pub fn decode(data: &[u8]) -> Result<(Value, usize), Error> {
    decode_with_limits(data, Limits::default())
}

pub fn decode_with_limits(data: &[u8], limits: Limits) -> Result<(Value, usize), Error> {
    let mut decoder = Decoder::new(data, limits);
    let value = decoder.run()?;
    Ok((value, decoder.pos))
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<u32, Value>,
    limits: Limits,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8], limits: Limits) -> Self {
        Decoder {
            data,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
            limits,
        }
    }

    fn err(&self, code: ErrorCode) -> Error {
        Error::at(code, self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.pos + n > self.data.len() {
            return Err(self.err(ErrorCode::Truncated));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn take_line(&mut self) -> Result<&'a [u8], Error> {
        let start = self.pos;
        loop {
            if self.pos >= self.data.len() {
                return Err(self.err(ErrorCode::Truncated));
            }
            if self.data[self.pos] == b'\n' {
                let line = &self.data[start..self.pos];
                self.pos += 1;
                return Ok(line);
            }
            self.pos += 1;
        }
    }

    fn take_text_line(&mut self) -> Result<String, Error> {
        let line = self.take_line()?;
        Ok(String::from_utf8_lossy(line).into_owned())
    }

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self, op: &'static str) -> Result<Value, Error> {
        self.stack.pop().ok_or_else(|| self.err(ErrorCode::StackUnderflow(op)))
    }

    fn top(&mut self, op: &'static str) -> Result<&mut Value, Error> {
        let pos = self.pos;
        self.stack
            .last_mut()
            .ok_or_else(|| Error::at(ErrorCode::StackUnderflow(op), pos))
    }

    fn push_mark(&mut self) -> Result<(), Error> {
        if self.marks.len() as u32 >= self.limits.max_depth {
            return Err(self.err(ErrorCode::DepthExceeded));
        }
        self.marks.push(self.stack.len());
        Ok(())
    }

    fn pop_to_mark(&mut self, op: &'static str) -> Result<Vec<Value>, Error> {
        let mark = self.marks.pop().ok_or_else(|| self.err(ErrorCode::StackUnderflow(op)))?;
        if mark > self.stack.len() {
            return Err(self.err(ErrorCode::StackUnderflow(op)));
        }
        Ok(self.stack.split_off(mark))
    }

    fn memoize(&mut self, value: Value) {
        let id = self.memo.len() as u32;
        self.memo.insert(id, value);
    }

    fn get_memo(&self, id: u32) -> Result<Value, Error> {
        self.memo.get(&id).cloned().ok_or_else(|| self.err(ErrorCode::BadMemo(id)))
    }

    fn run(&mut self) -> Result<Value, Error> {
        loop {
            let byte = self.take_u8()?;
            let opcode = Opcode::try_from(byte).map_err(|code| self.err(code))?;
            if let Some(value) = self.step(opcode)? {
                return Ok(value);
            }
        }
    }

    /// Executes one opcode. Returns `Some(value)` only for `STOP`.
    fn step(&mut self, opcode: Opcode) -> Result<Option<Value>, Error> {
        use Opcode::*;
        match opcode {
            Proto => {
                let proto = self.take_u8()?;
                if proto > 5 {
                    return Err(self.err(ErrorCode::UnsupportedProtocol(proto)));
                }
            }
            Frame => {
                self.take(8)?; // frame length; purely advisory, not validated
            }
            Stop => {
                if self.stack.len() != 1 {
                    return Err(self.err(ErrorCode::BadStop));
                }
                return Ok(Some(self.stack.pop().expect("checked len == 1 above")));
            }
            Mark => self.push_mark()?,
            Pop => {
                self.pop("POP")?;
            }
            PopMark => {
                self.pop_to_mark("POP_MARK")?;
            }
            Dup => {
                let v = self.top("DUP")?.clone();
                self.push(v);
            }
            None => self.push(Value::Null),
            NewTrue => self.push(Value::Bool(true)),
            NewFalse => self.push(Value::Bool(false)),
            BinInt => {
                let n = LittleEndian::read_i32(self.take(4)?);
                self.push(Value::Int(BigInt::from(n)));
            }
            BinInt1 => {
                let n = self.take_u8()?;
                self.push(Value::Int(BigInt::from(n)));
            }
            BinInt2 => {
                let n = LittleEndian::read_u16(self.take(2)?);
                self.push(Value::Int(BigInt::from(n)));
            }
            Long1 => {
                let len = self.take_u8()? as usize;
                let bytes = self.take(len)?;
                self.push(Value::Int(decode_long_bytes(bytes)));
            }
            Long4 => {
                let len = LittleEndian::read_i32(self.take(4)?);
                if len < 0 {
                    return Err(self.err(ErrorCode::BadRecord("negative LONG4 length".into())));
                }
                let bytes = self.take(len as usize)?;
                self.push(Value::Int(decode_long_bytes(bytes)));
            }
            Long => {
                let text = self.take_text_line()?;
                let digits = text.strip_suffix('L').unwrap_or(&text);
                let n = digits.parse::<BigInt>().map_err(|_| {
                    self.err(ErrorCode::BadRecord(format!("invalid LONG literal: {text:?}")))
                })?;
                self.push(Value::Int(n));
            }
            Int => {
                let text = self.take_text_line()?;
                match text.as_str() {
                    "00" => self.push(Value::Bool(false)),
                    "01" => self.push(Value::Bool(true)),
                    _ => {
                        let n = text.parse::<BigInt>().map_err(|_| {
                            self.err(ErrorCode::BadRecord(format!("invalid INT literal: {text:?}")))
                        })?;
                        self.push(Value::Int(n));
                    }
                }
            }
            BinFloat => {
                let f = BigEndian::read_f64(self.take(8)?);
                self.push(Value::Float(f));
            }
            Float => {
                let text = self.take_text_line()?;
                let f = text.parse::<f64>().map_err(|_| {
                    self.err(ErrorCode::BadRecord(format!("invalid FLOAT literal: {text:?}")))
                })?;
                self.push(Value::Float(f));
            }
            ShortBinUnicode => {
                let len = self.take_u8()? as usize;
                self.push(self.decode_utf8(len)?);
            }
            BinUnicode => {
                let len = LittleEndian::read_u32(self.take(4)?) as usize;
                self.push(self.decode_utf8(len)?);
            }
            BinUnicode8 => {
                let len = LittleEndian::read_u64(self.take(8)?) as usize;
                self.push(self.decode_utf8(len)?);
            }
            Unicode => {
                let text = self.take_text_line()?;
                self.push(Value::str(unescape_raw_unicode(&text)));
            }
            ShortBinBytes => {
                let len = self.take_u8()? as usize;
                let bytes = self.take(len)?.to_vec();
                self.push(Value::bytes(bytes));
            }
            BinBytes => {
                let len = LittleEndian::read_u32(self.take(4)?) as usize;
                let bytes = self.take(len)?.to_vec();
                self.push(Value::bytes(bytes));
            }
            BinBytes8 => {
                let len = LittleEndian::read_u64(self.take(8)?) as usize;
                let bytes = self.take(len)?.to_vec();
                self.push(Value::bytes(bytes));
            }
            ByteArray8 => {
                let len = LittleEndian::read_u64(self.take(8)?) as usize;
                let bytes = self.take(len)?.to_vec();
                self.push(Value::bytes(bytes));
            }
            BinString => {
                let len = LittleEndian::read_i32(self.take(4)?);
                if len < 0 {
                    return Err(self.err(ErrorCode::BadRecord("negative BINSTRING length".into())));
                }
                let bytes = self.take(len as usize)?.to_vec();
                self.push(bytes_or_utf8(bytes));
            }
            ShortBinString => {
                let len = self.take_u8()? as usize;
                let bytes = self.take(len)?.to_vec();
                self.push(bytes_or_utf8(bytes));
            }
            String => {
                let text = self.take_text_line()?;
                self.push(Value::str(unquote_string_literal(&text)));
            }
            EmptyList => self.push(Value::list(Vec::new())),
            List => {
                let items = self.pop_to_mark("LIST")?;
                self.push(Value::list(items));
            }
            Append => {
                let v = self.pop("APPEND")?;
                let pos = self.pos;
                let container = self.top("APPEND")?;
                push_into_list(container, v, pos)?;
            }
            Appends => {
                let items = self.pop_to_mark("APPENDS")?;
                let pos = self.pos;
                let container = self.top("APPENDS")?;
                for v in items {
                    push_into_list(container, v, pos)?;
                }
            }
            EmptyTuple => self.push(Value::tuple(Vec::new())),
            Tuple => {
                let items = self.pop_to_mark("TUPLE")?;
                self.push(Value::tuple(items));
            }
            Tuple1 => {
                let a = self.pop("TUPLE1")?;
                self.push(Value::tuple(vec![a]));
            }
            Tuple2 => {
                let b = self.pop("TUPLE2")?;
                let a = self.pop("TUPLE2")?;
                self.push(Value::tuple(vec![a, b]));
            }
            Tuple3 => {
                let c = self.pop("TUPLE3")?;
                let b = self.pop("TUPLE3")?;
                let a = self.pop("TUPLE3")?;
                self.push(Value::tuple(vec![a, b, c]));
            }
            EmptyDict => self.push(Value::dict(Vec::new())),
            Dict => {
                let items = self.pop_to_mark("DICT")?;
                self.push(Value::dict(pair_up(items, "DICT", self.pos)?));
            }
            SetItem => {
                let v = self.pop("SETITEM")?;
                let k = self.pop("SETITEM")?;
                let pos = self.pos;
                let container = self.top("SETITEM")?;
                push_into_dict(container, k, v, pos)?;
            }
            SetItems => {
                let items = self.pop_to_mark("SETITEMS")?;
                let pos = self.pos;
                let pairs = pair_up(items, "SETITEMS", pos)?;
                let container = self.top("SETITEMS")?;
                for (k, v) in pairs {
                    push_into_dict(container, k, v, pos)?;
                }
            }
            EmptySet => self.push(Value::Set(Shared::new(Vec::new()))),
            AddItems => {
                let items = self.pop_to_mark("ADDITEMS")?;
                let pos = self.pos;
                let container = self.top("ADDITEMS")?;
                for v in items {
                    push_into_set(container, v, pos)?;
                }
            }
            FrozenSet => {
                let items = self.pop_to_mark("FROZENSET")?;
                self.push(Value::FrozenSet(SharedFrozen::new(items)));
            }
            Put => {
                let idx: u32 = self
                    .take_text_line()?
                    .parse()
                    .map_err(|_| self.err(ErrorCode::BadRecord("invalid PUT index".into())))?;
                let v = self.top("PUT")?.clone();
                self.memo.insert(idx, v);
            }
            BinPut => {
                let idx = self.take_u8()? as u32;
                let v = self.top("BINPUT")?.clone();
                self.memo.insert(idx, v);
            }
            LongBinPut => {
                let idx = LittleEndian::read_u32(self.take(4)?);
                let v = self.top("LONG_BINPUT")?.clone();
                self.memo.insert(idx, v);
            }
            Memoize => {
                let v = self.top("MEMOIZE")?.clone();
                self.memoize(v);
            }
            Get => {
                let idx: u32 = self
                    .take_text_line()?
                    .parse()
                    .map_err(|_| self.err(ErrorCode::BadRecord("invalid GET index".into())))?;
                self.push(self.get_memo(idx)?);
            }
            BinGet => {
                let idx = self.take_u8()? as u32;
                self.push(self.get_memo(idx)?);
            }
            LongBinGet => {
                let idx = LittleEndian::read_u32(self.take(4)?);
                self.push(self.get_memo(idx)?);
            }
            Global => {
                let module = self.take_text_line()?;
                let name = self.take_text_line()?;
                self.push(Value::Global(SharedFrozen::new(GlobalRef { module, name })));
            }
            StackGlobal => {
                let name = self.pop("STACK_GLOBAL")?;
                let module = self.pop("STACK_GLOBAL")?;
                let module = expect_str(module, "STACK_GLOBAL", self.pos)?;
                let name = expect_str(name, "STACK_GLOBAL", self.pos)?;
                self.push(Value::Global(SharedFrozen::new(GlobalRef { module, name })));
            }
            Reduce => {
                let args = self.pop("REDUCE")?;
                let callable = self.pop("REDUCE")?;
                let args = expect_tuple(args, "REDUCE", self.pos)?;
                self.push(Value::Reduce(Shared::new(ReduceData::new(callable, args))));
            }
            NewObj => {
                let args = self.pop("NEWOBJ")?;
                let cls = self.pop("NEWOBJ")?;
                let args = expect_tuple(args, "NEWOBJ", self.pos)?;
                self.push(Value::Reduce(Shared::new(ReduceData::new(cls, args))));
            }
            NewObjEx => {
                let kwargs = self.pop("NEWOBJ_EX")?;
                let args = self.pop("NEWOBJ_EX")?;
                let cls = self.pop("NEWOBJ_EX")?;
                let args = expect_tuple(args, "NEWOBJ_EX", self.pos)?;
                let kwargs = expect_dict(kwargs, "NEWOBJ_EX", self.pos)?;
                let mut reduce = ReduceData::new(cls, args);
                reduce.kwargs = Some(kwargs);
                self.push(Value::Reduce(Shared::new(reduce)));
            }
            Build => {
                let state = self.pop("BUILD")?;
                let pos = self.pos;
                let container = self.top("BUILD")?;
                match container {
                    Value::Reduce(r) => {
                        r.inner_mut().state = Some(state);
                    }
                    _ => return Err(Error::at(ErrorCode::StackUnderflow("BUILD"), pos)),
                }
            }
            Inst => {
                let args = self.pop_to_mark("INST")?;
                let module = self.take_text_line()?;
                let name = self.take_text_line()?;
                let callable = Value::Global(SharedFrozen::new(GlobalRef { module, name }));
                self.push(Value::Reduce(Shared::new(ReduceData::new(callable, args))));
            }
            Obj => {
                let mut args = self.pop_to_mark("OBJ")?;
                if args.is_empty() {
                    return Err(self.err(ErrorCode::StackUnderflow("OBJ")));
                }
                let callable = args.remove(0);
                self.push(Value::Reduce(Shared::new(ReduceData::new(callable, args))));
            }
            PersId => {
                let id = self.take_text_line()?;
                self.push(Value::PersistentRef(SharedFrozen::new(PersistentRefData {
                    oid: id.into_bytes(),
                    class_hint: std::option::Option::None,
                })));
            }
            BinPersId => {
                let pid = self.pop("BINPERSID")?;
                self.push(Value::PersistentRef(SharedFrozen::new(persistent_ref_from(pid, self.pos)?)));
            }
        }
        Ok(std::option::Option::None)
    }

    fn decode_utf8(&mut self, len: usize) -> Result<Value, Error> {
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|_| self.err(ErrorCode::BadRecord("invalid UTF-8 string".into())))?;
        Ok(Value::str(s))
    }
}

fn decode_long_bytes(bytes: &[u8]) -> BigInt {
    if bytes.is_empty() {
        return BigInt::from(0);
    }
    let negative = bytes[bytes.len() - 1] & 0x80 != 0;
    let mut value = BigInt::from_bytes_le(num_bigint::Sign::Plus, bytes);
    if negative {
        value -= BigInt::from(1) << (bytes.len() * 8);
    }
    value
}

fn bytes_or_utf8(bytes: Vec<u8>) -> Value {
    match std::string::String::from_utf8(bytes) {
        Ok(s) => Value::str(s),
        Err(e) => Value::bytes(e.into_bytes()),
    }
}

fn unquote_string_literal(text: &str) -> std::string::String {
    let trimmed = text.trim();
    let inner = if trimmed.len() >= 2 {
        let bytes = trimmed.as_bytes();
        let quote = bytes[0];
        if (quote == b'\'' || quote == b'"') && bytes[bytes.len() - 1] == quote {
            &trimmed[1..trimmed.len() - 1]
        } else {
            trimmed
        }
    } else {
        trimmed
    };
    let mut out = std::string::String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            std::option::Option::None => out.push('\\'),
        }
    }
    out
}

fn unescape_raw_unicode(text: &str) -> std::string::String {
    let mut out = std::string::String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'u') {
            chars.next();
            let hex: std::string::String = (0..4).filter_map(|_| chars.next()).collect();
            if let Ok(code) = u32::from_str_radix(&hex, 16) {
                if let Some(ch) = char::from_u32(code) {
                    out.push(ch);
                    continue;
                }
            }
            out.push_str("\\u");
            out.push_str(&hex);
        } else {
            out.push(c);
        }
    }
    out
}

fn pair_up(items: Vec<Value>, op: &'static str, pos: usize) -> Result<Vec<(Value, Value)>, Error> {
    if items.len() % 2 != 0 {
        return Err(Error::at(ErrorCode::StackUnderflow(op), pos));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut it = items.into_iter();
    while let (Some(k), Some(v)) = (it.next(), it.next()) {
        pairs.push((k, v));
    }
    Ok(pairs)
}

fn push_into_list(container: &mut Value, item: Value, pos: usize) -> Result<(), Error> {
    match container {
        Value::List(l) => {
            if is_same_shared_list(l, &item) {
                return Err(Error::at(ErrorCode::Cyclic, pos));
            }
            l.inner_mut().push(item);
            Ok(())
        }
        _ => Err(Error::at(ErrorCode::StackUnderflow("APPEND"), pos)),
    }
}

fn is_same_shared_list(l: &Shared<Vec<Value>>, item: &Value) -> bool {
    matches!(item, Value::List(other) if other.provenance() == l.provenance())
}

fn push_into_dict(container: &mut Value, key: Value, value: Value, pos: usize) -> Result<(), Error> {
    match container {
        Value::Dict(d) => {
            if matches!(&value, Value::Dict(other) if other.provenance() == d.provenance()) {
                return Err(Error::at(ErrorCode::Cyclic, pos));
            }
            d.inner_mut().push((key, value));
            Ok(())
        }
        _ => Err(Error::at(ErrorCode::StackUnderflow("SETITEM"), pos)),
    }
}

fn push_into_set(container: &mut Value, item: Value, pos: usize) -> Result<(), Error> {
    match container {
        Value::Set(s) => {
            if matches!(&item, Value::Set(other) if other.provenance() == s.provenance()) {
                return Err(Error::at(ErrorCode::Cyclic, pos));
            }
            s.inner_mut().push(item);
            Ok(())
        }
        _ => Err(Error::at(ErrorCode::StackUnderflow("ADDITEMS"), pos)),
    }
}

fn expect_tuple(v: Value, op: &'static str, pos: usize) -> Result<Vec<Value>, Error> {
    match v {
        Value::Tuple(t) => Ok(t.into_raw_or_cloned()),
        _ => Err(Error::at(ErrorCode::StackUnderflow(op), pos)),
    }
}

fn expect_dict(v: Value, op: &'static str, pos: usize) -> Result<Vec<(Value, Value)>, Error> {
    match v {
        Value::Dict(d) => Ok(d.into_raw_or_cloned()),
        _ => Err(Error::at(ErrorCode::StackUnderflow(op), pos)),
    }
}

fn expect_str(v: Value, op: &'static str, pos: usize) -> Result<std::string::String, Error> {
    match v {
        Value::Str(s) => Ok(s.into_raw_or_cloned()),
        _ => Err(Error::at(ErrorCode::StackUnderflow(op), pos)),
    }
}

fn persistent_ref_from(v: Value, pos: usize) -> Result<PersistentRefData, Error> {
    match v {
        Value::Tuple(t) => {
            let items = t.into_raw_or_cloned();
            if items.len() != 2 {
                return Err(Error::at(ErrorCode::BadRecord("BINPERSID tuple must have 2 elements".into()), pos));
            }
            let mut it = items.into_iter();
            let oid_val = it.next().expect("checked len == 2");
            let hint = it.next().expect("checked len == 2");
            Ok(PersistentRefData {
                oid: value_to_oid_bytes(oid_val, pos)?,
                class_hint: Some(hint),
            })
        }
        other => Ok(PersistentRefData {
            oid: value_to_oid_bytes(other, pos)?,
            class_hint: std::option::Option::None,
        }),
    }
}

fn value_to_oid_bytes(v: Value, pos: usize) -> Result<Vec<u8>, Error> {
    match v {
        Value::Bytes(b) => Ok(b.into_raw_or_cloned()),
        Value::Str(s) => Ok(s.into_raw_or_cloned().into_bytes()),
        Value::Int(i) => Ok(i.to_signed_bytes_be()),
        _ => Err(Error::at(ErrorCode::BadRecord("unsupported persistent id shape".into()), pos)),
    }
}
