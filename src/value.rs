// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! The intermediate value model shared by the decoder, the JSON writer and
//! reader, and the encoder.
//!
//! Pickle's memo preserves aliasing between occurrences of the same `GET n`.
//! `Shared<T>` (`Rc<RefCell<T>>`) and `SharedFrozen<T>` (`Rc<T>`) preserve that
//! sharing in the tree itself: a memoized list or dict can still be mutated by
//! later `APPEND`/`SETITEM` opcodes after being pushed, while tuples, strings
//! and bytes, which pickle never mutates post-construction, are frozen.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;

#[derive(Debug, Eq, PartialOrd, Ord, Clone)]
pub struct Shared<T>(Rc<RefCell<T>>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Shared(Rc::new(RefCell::new(value)))
    }

    pub fn inner(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    pub fn inner_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    pub fn provenance(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Shared::new(value)
    }
}

impl<T> Shared<T>
where
    T: Clone,
{
    pub fn into_raw_or_cloned(self) -> T {
        match Rc::try_unwrap(self.0) {
            Ok(cell) => cell.into_inner(),
            Err(rc) => rc.borrow().clone(),
        }
    }
}

impl<T> std::cmp::PartialEq for Shared<T>
where
    T: std::cmp::PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.borrow().eq(&other.0.borrow())
    }
}

#[derive(Debug, Eq, PartialOrd, Ord, Clone)]
pub struct SharedFrozen<T>(Rc<T>);

impl<T> SharedFrozen<T> {
    pub fn new(value: T) -> Self {
        SharedFrozen(Rc::new(value))
    }

    pub fn inner(&self) -> &T {
        self.0.as_ref()
    }

    pub fn provenance(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl<T> From<T> for SharedFrozen<T> {
    fn from(value: T) -> Self {
        SharedFrozen::new(value)
    }
}

impl<T> SharedFrozen<T>
where
    T: Clone,
{
    pub fn into_raw_or_cloned(self) -> T {
        match Rc::try_unwrap(self.0) {
            Ok(inner) => inner,
            Err(rc) => rc.as_ref().clone(),
        }
    }
}

impl<T> std::cmp::PartialEq for SharedFrozen<T>
where
    T: std::cmp::PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.inner().eq(other.inner())
    }
}

/// `(module, qualname)`, as found in `GLOBAL`/`STACK_GLOBAL` and as the
/// callable half of a `Reduce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRef {
    pub module: String,
    pub name: String,
}

/// The payload of `PERSID`/`BINPERSID`. `class_hint` is present when the
/// persistent id was a 2-tuple `(oid, class_ref_or_tuple)` rather than a bare
/// oid.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentRefData {
    pub oid: Vec<u8>,
    pub class_hint: Option<Value>,
}

/// The generic object-construction triple produced by `REDUCE`/`NEWOBJ`/
/// `NEWOBJ_EX`, augmented by a subsequent `BUILD`/`APPENDS`/`SETITEMS`.
///
/// `kwargs` only ever comes from `NEWOBJ_EX`; plain `REDUCE` and `NEWOBJ`
/// leave it `None`. It is not part of the reserved `@reduce` marker table in
/// the strict sense used for top-level dictionaries — it rides along as an
/// extra `"kw"` key inside the `@reduce` payload object, which is a fixed
/// envelope with its own non-`@` keys already.
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceData {
    pub callable: Value,
    pub args: Vec<Value>,
    pub kwargs: Option<Vec<(Value, Value)>>,
    pub state: Option<Value>,
    pub listitems: Option<Vec<Value>>,
    pub dictitems: Option<Vec<(Value, Value)>>,
}

impl ReduceData {
    pub fn new(callable: Value, args: Vec<Value>) -> Self {
        ReduceData {
            callable,
            args,
            kwargs: None,
            state: None,
            listitems: None,
            dictitems: None,
        }
    }
}

/// How a recognized `datetime`/`time` value carries timezone information.
#[derive(Debug, Clone, PartialEq)]
pub enum DateTimeZone {
    /// No tzinfo at all (a naive datetime/time).
    Naive,
    /// A fixed UTC offset, in seconds (may be negative).
    FixedOffset(i32),
    /// An `ecosystem-A`-style zone carrying a zone `name` (e.g. pytz).
    Named(String),
    /// An `ecosystem-B`-style zone carrying a IANA key (e.g. zoneinfo).
    ZoneInfo(String),
}

/// A `Reduce` rewritten by the Known-Type Recognizer into a compact form.
#[derive(Debug, Clone, PartialEq)]
pub enum KnownValue {
    DateTime {
        naive: chrono::NaiveDateTime,
        micros_present: bool,
        tz: DateTimeZone,
    },
    Date(chrono::NaiveDate),
    Time {
        naive: chrono::NaiveTime,
        micros_present: bool,
        tz: DateTimeZone,
    },
    Timedelta {
        days: i64,
        seconds: i64,
        microseconds: i64,
    },
    Decimal(String),
    Uuid(u128),
}

/// A ZODB database record: the class identity pair plus the object's state.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordData {
    pub cls: (String, String),
    pub state: Value,
}

/// The result of rewriting a BTree/Bucket/TreeSet/Set record's nested-tuple
/// state into its queryable form (spec.md §4.3). Kept as its own shape
/// rather than folded into `KnownValue`, since it is produced by a separate
/// pass (the Flattener) keyed on class-name suffix and top-level shape, not
/// the Recognizer's `(module, classname)` + argument-shape table.
#[derive(Debug, Clone, PartialEq)]
pub enum BTreeShape {
    Kv(Vec<(Value, Value)>),
    Ks(Vec<Value>),
    Children { children: Vec<Value>, first: Box<Value> },
}

/// The language-neutral value tree. See `SPEC_FULL.md` §3.1 for the JSON
/// mapping of each variant.
///
/// Integers are always `BigInt`: pickle's own int/long distinction is a
/// CPython protocol-2 artifact, not a semantic one, and collapsing it avoids
/// threading an `i64`-vs-`BigInt` choice through the recognizer and encoder.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "variantly", derive(variantly::Variantly))]
pub enum Value {
    Null,
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Str(SharedFrozen<String>),
    Bytes(SharedFrozen<Vec<u8>>),
    List(Shared<Vec<Value>>),
    Tuple(SharedFrozen<Vec<Value>>),
    Dict(Shared<Vec<(Value, Value)>>),
    Set(Shared<Vec<Value>>),
    FrozenSet(SharedFrozen<Vec<Value>>),
    Global(SharedFrozen<GlobalRef>),
    PersistentRef(SharedFrozen<PersistentRefData>),
    Reduce(Shared<ReduceData>),
    Known(SharedFrozen<KnownValue>),
    Record(SharedFrozen<RecordData>),
    BTree(SharedFrozen<BTreeShape>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(SharedFrozen::new(s.into()))
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Value {
        Value::Bytes(SharedFrozen::new(b.into()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Shared::new(items))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(SharedFrozen::new(items))
    }

    pub fn dict(items: Vec<(Value, Value)>) -> Value {
        Value::Dict(Shared::new(items))
    }

    pub fn int(i: impl Into<BigInt>) -> Value {
        Value::Int(i.into())
    }

    /// True for the handful of variants the `BUILD`/memo machinery can
    /// still mutate in place after they are pushed onto the value stack.
    pub fn is_mutable_container(&self) -> bool {
        matches!(self, Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Reduce(_))
    }
}

fn write_elements<'a, I, T>(
    f: &mut fmt::Formatter,
    it: I,
    prefix: &'static str,
    suffix: &'static str,
    len: usize,
) -> fmt::Result
where
    I: Iterator<Item = &'a T>,
    T: fmt::Display + 'a,
{
    f.write_str(prefix)?;
    for (i, item) in it.enumerate() {
        if i + 1 < len {
            write!(f, "{item}, ")?;
        } else {
            write!(f, "{item}")?;
        }
    }
    f.write_str(suffix)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{:?}", s.inner()),
            Value::Bytes(b) => write!(f, "b{:?}", b.inner()),
            Value::List(v) => {
                let v = v.inner();
                write_elements(f, v.iter(), "[", "]", v.len())
            }
            Value::Tuple(v) => {
                let v = v.inner();
                write_elements(f, v.iter(), "(", ")", v.len())
            }
            Value::Set(v) => {
                let v = v.inner();
                write_elements(f, v.iter(), "{", "}", v.len())
            }
            Value::FrozenSet(v) => {
                let v = v.inner();
                write_elements(f, v.iter(), "frozenset([", "])", v.len())
            }
            Value::Dict(v) => {
                write!(f, "{{")?;
                let v = v.inner();
                for (i, (k, val)) in v.iter().enumerate() {
                    if i + 1 < v.len() {
                        write!(f, "{k}: {val}, ")?;
                    } else {
                        write!(f, "{k}: {val}")?;
                    }
                }
                write!(f, "}}")
            }
            Value::Global(g) => write!(f, "{}.{}", g.inner().module, g.inner().name),
            Value::PersistentRef(p) => write!(f, "PersistentRef({})", hex_encode(&p.inner().oid)),
            Value::Reduce(r) => {
                let r = r.inner();
                write!(f, "{}(", r.callable)?;
                for (i, a) in r.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Value::Known(k) => write!(f, "{:?}", k.inner()),
            Value::Record(r) => {
                let r = r.inner();
                write!(f, "Record({}.{}, {})", r.cls.0, r.cls.1, r.state)
            }
            Value::BTree(b) => write!(f, "{:?}", b.inner()),
        }
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String cannot fail");
    }
    out
}
