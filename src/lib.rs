// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! A pure, no-I/O bidirectional transcoder between Python pickle streams
//! (including ZODB's two-pickle record framing) and a canonical JSON form.
//!
//! Every public entry point is a total function of its input: it returns a
//! `Value`/`String`/`Vec<u8>` or an [`Error`] classifying the failure, never
//! panics on malformed input, and performs no I/O of its own.

pub mod btree;
pub mod consts;
pub mod decode;
pub mod encode;
pub mod error;
pub mod json_io;
pub mod limits;
pub mod recognizer;
pub mod record;
pub mod value;

pub use error::{Error, ErrorCode};
pub use limits::Limits;
pub use value::Value;

/// Decodes one pickle stream and rewrites recognized `Reduce` forms
/// (datetime, Decimal, UUID, set/frozenset, ...) into their compact `Value`
/// representation.
pub fn pickle_to_dict(data: &[u8]) -> Result<Value, Error> {
    pickle_to_dict_with_limits(data, Limits::default())
}

pub fn pickle_to_dict_with_limits(data: &[u8], limits: Limits) -> Result<Value, Error> {
    let (value, _) = decode::decode_with_limits(data, limits)?;
    Ok(recognizer::recognize(value))
}

/// Encodes a `Value` (in its recognized form) back into a pickle stream.
pub fn dict_to_pickle(value: &Value) -> Result<Vec<u8>, Error> {
    encode::encode(value)
}

/// Decodes a pickle stream and serializes it as canonical JSON text.
pub fn pickle_to_json(data: &[u8]) -> Result<String, Error> {
    pickle_to_json_with_limits(data, Limits::default())
}

pub fn pickle_to_json_with_limits(data: &[u8], limits: Limits) -> Result<String, Error> {
    let value = pickle_to_dict_with_limits(data, limits)?;
    let json = json_io::to_json(&value)?;
    serde_json::to_string(&json).map_err(|e| Error::new(ErrorCode::BadJson(e.to_string())))
}

/// Parses canonical JSON text and encodes the resulting value tree as a
/// pickle stream.
pub fn json_to_pickle(text: &str) -> Result<Vec<u8>, Error> {
    let value = json_io::from_json_str(text)?;
    encode::encode(&value)
}

/// Decodes a ZODB record (class-identity pickle + state pickle) into its
/// canonical `Value` form, recognizing known types and flattening BTree
/// state along the way.
pub fn decode_zodb_record(data: &[u8]) -> Result<Value, Error> {
    record::decode_record(data)
}

pub fn decode_zodb_record_with_limits(data: &[u8], limits: Limits) -> Result<Value, Error> {
    record::decode_record_with_limits(data, limits)
}

/// Reverses `decode_zodb_record`: unflattens BTree state and emits the two
/// concatenated pickle streams a ZODB record is made of.
pub fn encode_zodb_record(value: Value) -> Result<Vec<u8>, Error> {
    record::encode_record(value)
}

#[cfg(test)]
#[path = "../test/arby.rs"]
mod arby;

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    quickcheck! {
        fn pickle_roundtrip(v: Value) -> bool {
            match dict_to_pickle(&v) {
                Ok(bytes) => matches!(pickle_to_dict(&bytes), Ok(rt) if rt == v),
                Err(_) => true,
            }
        }

        fn json_roundtrip(v: Value) -> bool {
            match json_io::to_json(&v) {
                Ok(json) => matches!(json_io::from_json(&json), Ok(rt) if rt == v),
                Err(_) => true,
            }
        }
    }
}
