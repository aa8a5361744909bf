// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Port of `test_zodb_records.py`: the two-pickle record framing itself,
//! independent of any particular state shape. `TestRealZODB`'s fixtures
//! (live `ZODB.DB(None)` storage) have no equivalent in a pure byte-stream
//! codec and are not ported.

mod common;

use zodb_json_codec::value::Value;
use zodb_json_codec::{decode_zodb_record, encode_zodb_record};

#[test]
fn decode_simple_object_state() {
    let state = Value::dict(vec![(Value::str("name"), Value::str("widget")), (Value::str("count"), Value::int(3))]);
    let record = common::make_zodb_record("myapp.models", "Widget", state.clone());
    let decoded = decode_zodb_record(&record).unwrap();
    let Value::Record(r) = &decoded else { panic!("expected a Record") };
    assert_eq!(r.inner().cls, ("myapp.models".to_string(), "Widget".to_string()));
    assert_eq!(r.inner().state, state);
}

#[test]
fn decode_nested_state() {
    let state = Value::dict(vec![(
        Value::str("inner"),
        Value::dict(vec![(Value::str("values"), Value::list(vec![Value::int(1), Value::int(2)]))]),
    )]);
    let record = common::make_zodb_record("myapp.models", "Nested", state.clone());
    let decoded = decode_zodb_record(&record).unwrap();
    let Value::Record(r) = &decoded else { panic!("expected a Record") };
    assert_eq!(r.inner().state, state);
}

#[test]
fn decode_empty_state() {
    let record = common::make_zodb_record("myapp.models", "Empty", Value::Null);
    let decoded = decode_zodb_record(&record).unwrap();
    let Value::Record(r) = &decoded else { panic!("expected a Record") };
    assert_eq!(r.inner().state, Value::Null);
}

#[test]
fn decode_bytes_in_state() {
    let state = Value::dict(vec![(Value::str("blob"), Value::bytes(vec![0, 1, 2, 255]))]);
    let record = common::make_zodb_record("myapp.models", "HasBlob", state.clone());
    let decoded = decode_zodb_record(&record).unwrap();
    let Value::Record(r) = &decoded else { panic!("expected a Record") };
    assert_eq!(r.inner().state, state);
}

#[test]
fn decode_tuple_state_for_datetime_class() {
    // `DateTime.DateTime` (the Zope/DateTime flavor, distinct from stdlib
    // `datetime.datetime`) stores its state as a plain tuple, not a dict —
    // the record decoder must not assume every state is a mapping.
    let state = Value::tuple(vec![Value::int(63_871_200), Value::str("US/Eastern")]);
    let record = common::make_zodb_record("DateTime.DateTime", "DateTime", state.clone());
    let decoded = decode_zodb_record(&record).unwrap();
    let Value::Record(r) = &decoded else { panic!("expected a Record") };
    assert_eq!(r.inner().state, state);
}

#[test]
fn decode_scalar_state_for_length_class() {
    let record = common::make_zodb_record("BTrees.Length", "Length", Value::int(17));
    let decoded = decode_zodb_record(&record).unwrap();
    let Value::Record(r) = &decoded else { panic!("expected a Record") };
    assert_eq!(r.inner().state, Value::int(17));
}

#[test]
fn decode_none_values_inside_state() {
    let state = Value::dict(vec![(Value::str("maybe"), Value::Null)]);
    let record = common::make_zodb_record("myapp.models", "Optional", state.clone());
    let decoded = decode_zodb_record(&record).unwrap();
    let Value::Record(r) = &decoded else { panic!("expected a Record") };
    assert_eq!(r.inner().state, state);
}

#[test]
fn encode_roundtrip() {
    let state = Value::dict(vec![(Value::str("a"), Value::int(1))]);
    let record = common::make_zodb_record("myapp.models", "Widget", state);
    let decoded = decode_zodb_record(&record).unwrap();
    let reencoded = encode_zodb_record(decoded.clone()).unwrap();
    let redecoded = decode_zodb_record(&reencoded).unwrap();
    assert_eq!(redecoded, decoded);
}

#[test]
fn encode_preserves_state_exactly() {
    let state = Value::list(vec![Value::int(1), Value::str("x"), Value::Bool(true), Value::Null]);
    let record = common::make_zodb_record("myapp.models", "Widget", state.clone());
    let decoded = decode_zodb_record(&record).unwrap();
    let reencoded = encode_zodb_record(decoded).unwrap();
    let redecoded = decode_zodb_record(&reencoded).unwrap();
    let Value::Record(r) = &redecoded else { panic!("expected a Record") };
    assert_eq!(r.inner().state, state);
}

#[test]
fn class_pickle_uses_global() {
    // The class identity pickle must be a GLOBAL-opcode reference, not a
    // literal 2-tuple, so downstream ZODB record consumers that only
    // understand the classic framing can still find the class.
    let state = Value::int(1);
    let record = common::make_zodb_record("myapp.models", "Widget", state);
    let decoded = decode_zodb_record(&record).unwrap();
    let reencoded = encode_zodb_record(decoded).unwrap();
    // PROTO opcode + version byte, then GLOBAL ('c').
    assert_eq!(&reencoded[2..3], b"c");
}

#[test]
fn decode_rejects_truncated_class_pickle() {
    let record = common::make_zodb_record("myapp.models", "Widget", Value::int(1));
    let truncated = &record[..3];
    assert!(decode_zodb_record(truncated).is_err());
}

#[test]
fn decode_accepts_literal_tuple_class_identity() {
    // Some producers may emit the class identity as a literal tuple rather
    // than a GLOBAL reference; `decode_record` still accepts it.
    let state = Value::int(5);
    let record = common::make_zodb_record_tuple_class("myapp.models", "Widget", state.clone());
    let decoded = decode_zodb_record(&record).unwrap();
    let Value::Record(r) = &decoded else { panic!("expected a Record") };
    assert_eq!(r.inner().cls, ("myapp.models".to_string(), "Widget".to_string()));
    assert_eq!(r.inner().state, state);
}
