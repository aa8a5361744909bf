// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! ZODB record framing (spec.md §4.6): two back-to-back pickle streams, the
//! first a `(module, classname)` identity tuple, the second the object's
//! state, glued together by the Known-Type Recognizer and BTree Flattener.

use crate::btree;
use crate::decode::decode_with_limits;
use crate::encode::encode;
use crate::error::{Error, ErrorCode};
use crate::limits::Limits;
use crate::recognizer::recognize;
use crate::value::{GlobalRef, RecordData, SharedFrozen, Value};

/// Splits `data` into its class-identity pickle and state pickle, recognizes
/// known types in the state, and flattens BTree/Bucket/TreeSet/Set state.
pub fn decode_record(data: &[u8]) -> Result<Value, Error> {
    decode_record_with_limits(data, Limits::default())
}

pub fn decode_record_with_limits(data: &[u8], limits: Limits) -> Result<Value, Error> {
    let (cls_value, consumed) = decode_with_limits(data, limits)?;
    let cls = expect_class_pair(cls_value)?;
    let (state_value, _) = decode_with_limits(&data[consumed..], limits)?;
    let state = recognize(state_value);
    let record = Value::Record(SharedFrozen::new(RecordData { cls, state }));
    Ok(btree::flatten(record))
}

/// The class identity pickle is ordinarily a bare `GLOBAL`/`STACK_GLOBAL`
/// reference (`decode_record`'s round trip emits it that way; see
/// `encode_record`). A literal `(module, classname)` tuple is also accepted,
/// since that's a valid protocol-3 pickle of the same information and some
/// producers may emit it that way.
fn expect_class_pair(v: Value) -> Result<(String, String), Error> {
    if let Value::Global(g) = v {
        let g = g.into_raw_or_cloned();
        return Ok((g.module, g.name));
    }
    let Value::Tuple(t) = v else {
        return Err(Error::new(ErrorCode::BadRecord("class identity pickle did not yield a global or tuple".into())));
    };
    let items = t.into_raw_or_cloned();
    if items.len() != 2 {
        return Err(Error::new(ErrorCode::BadRecord("class identity tuple must have exactly 2 elements".into())));
    }
    let mut it = items.into_iter();
    let module = it.next().expect("checked len == 2");
    let name = it.next().expect("checked len == 2");
    let (Value::Str(module), Value::Str(name)) = (module, name) else {
        return Err(Error::new(ErrorCode::BadRecord("class identity tuple elements must be strings".into())));
    };
    Ok((module.into_raw_or_cloned(), name.into_raw_or_cloned()))
}

/// Reverses `decode_record`: unflattens BTree state, then emits the class
/// identity pickle followed by the state pickle.
pub fn encode_record(value: Value) -> Result<Vec<u8>, Error> {
    let unflattened = btree::unflatten(value);
    let Value::Record(r) = unflattened else {
        return Err(Error::new(ErrorCode::EncodeFailure("encode_record expects a Record value".into())));
    };
    let data = r.into_raw_or_cloned();
    let (module, name) = data.cls;
    // Class identity must round-trip through the GLOBAL opcode, not a tuple
    // literal, to match what ZODB record consumers expect (spec.md §4.4).
    let cls_global = Value::Global(SharedFrozen::new(GlobalRef { module, name }));
    let mut out = encode(&cls_global)?;
    out.extend_from_slice(&encode(&data.state)?);
    Ok(out)
}
