// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Port of `test_known_types.py`: datetime/date/time/timedelta/Decimal/UUID/
//! set/frozenset all get rewritten by the Known-Type Recognizer into their
//! compact `Known` form, and that form survives both the pickle and the JSON
//! round trip.
//!
//! There is no live `pytz`/`zoneinfo` runtime here, so the `Named`/`ZoneInfo`
//! timezone variants are exercised by hand-building the `Reduce` shape a
//! decoded `pytz.timezone(...)`/`zoneinfo.ZoneInfo(...)` call would produce,
//! per `recognizer::recognize_tz`'s documented rule (spec.md §4.2), rather
//! than by invoking the real libraries.

mod common;

use zodb_json_codec::value::{DateTimeZone, KnownValue, Value};
use zodb_json_codec::{dict_to_pickle, json_to_pickle, pickle_to_dict, pickle_to_json};

fn roundtrip_known(raw: Value, expect: &KnownValue) {
    let pickled = dict_to_pickle(&raw).expect("raw reduce encodes");
    let decoded = pickle_to_dict(&pickled).expect("pickle decodes and recognizes");
    let Value::Known(k) = &decoded else {
        panic!("expected a recognized Known value, got {decoded:?}");
    };
    assert_eq!(k.inner(), expect);

    // The recognized form itself must survive further pickle/JSON round trips.
    let repickled = dict_to_pickle(&decoded).expect("known value re-encodes");
    assert_eq!(&pickle_to_dict(&repickled).unwrap(), &decoded);

    let json = pickle_to_json(&pickled).expect("recognized value converts to json");
    let from_json = json_to_pickle(&json).expect("json converts back to pickle");
    assert_eq!(&pickle_to_dict(&from_json).unwrap(), &decoded);
}

#[test]
fn datetime_naive() {
    let bytes = common::datetime_bytes(2024, 3, 14, 9, 26, 53, 0);
    roundtrip_known(
        common::datetime_value(bytes, None),
        &KnownValue::DateTime {
            naive: common::naive_datetime(2024, 3, 14, 9, 26, 53, 0),
            micros_present: false,
            tz: DateTimeZone::Naive,
        },
    );
}

#[test]
fn datetime_with_microseconds() {
    let bytes = common::datetime_bytes(2024, 3, 14, 9, 26, 53, 589793);
    roundtrip_known(
        common::datetime_value(bytes, None),
        &KnownValue::DateTime {
            naive: common::naive_datetime(2024, 3, 14, 9, 26, 53, 589793),
            micros_present: true,
            tz: DateTimeZone::Naive,
        },
    );
}

#[test]
fn datetime_year_boundaries() {
    for year in [1, 1970, 2038, 9999] {
        let bytes = common::datetime_bytes(year, 1, 1, 0, 0, 0, 0);
        roundtrip_known(
            common::datetime_value(bytes, None),
            &KnownValue::DateTime {
                naive: common::naive_datetime(year as i32, 1, 1, 0, 0, 0, 0),
                micros_present: false,
                tz: DateTimeZone::Naive,
            },
        );
    }
}

#[test]
fn datetime_stdlib_utc() {
    let bytes = common::datetime_bytes(2024, 1, 1, 12, 0, 0, 0);
    roundtrip_known(
        common::datetime_value(bytes, Some(common::fixed_offset_tz(0))),
        &KnownValue::DateTime {
            naive: common::naive_datetime(2024, 1, 1, 12, 0, 0, 0),
            micros_present: false,
            tz: DateTimeZone::FixedOffset(0),
        },
    );
}

#[test]
fn datetime_stdlib_positive_offset() {
    let bytes = common::datetime_bytes(2024, 1, 1, 12, 0, 0, 0);
    let offset = 5 * 3600 + 30 * 60;
    roundtrip_known(
        common::datetime_value(bytes, Some(common::fixed_offset_tz(offset))),
        &KnownValue::DateTime {
            naive: common::naive_datetime(2024, 1, 1, 12, 0, 0, 0),
            micros_present: false,
            tz: DateTimeZone::FixedOffset(offset as i32),
        },
    );
}

#[test]
fn datetime_stdlib_negative_offset() {
    let bytes = common::datetime_bytes(2024, 1, 1, 12, 0, 0, 0);
    let offset = -5 * 3600;
    roundtrip_known(
        common::datetime_value(bytes, Some(common::fixed_offset_tz(offset))),
        &KnownValue::DateTime {
            naive: common::naive_datetime(2024, 1, 1, 12, 0, 0, 0),
            micros_present: false,
            tz: DateTimeZone::FixedOffset(offset as i32),
        },
    );
}

#[test]
fn datetime_pytz_utc() {
    let bytes = common::datetime_bytes(2024, 1, 1, 0, 0, 0, 0);
    roundtrip_known(
        common::datetime_value(bytes, Some(common::pytz_utc_tz())),
        &KnownValue::DateTime {
            naive: common::naive_datetime(2024, 1, 1, 0, 0, 0, 0),
            micros_present: false,
            tz: DateTimeZone::FixedOffset(0),
        },
    );
}

#[test]
fn datetime_pytz_named() {
    let bytes = common::datetime_bytes(2024, 6, 1, 8, 0, 0, 0);
    roundtrip_known(
        common::datetime_value(bytes, Some(common::pytz_named_tz("US/Eastern"))),
        &KnownValue::DateTime {
            naive: common::naive_datetime(2024, 6, 1, 8, 0, 0, 0),
            micros_present: false,
            tz: DateTimeZone::Named("US/Eastern".to_string()),
        },
    );
}

#[test]
fn datetime_zoneinfo_named() {
    let bytes = common::datetime_bytes(2024, 6, 1, 8, 0, 0, 0);
    roundtrip_known(
        common::datetime_value(bytes, Some(common::zoneinfo_tz("US/Eastern"))),
        &KnownValue::DateTime {
            naive: common::naive_datetime(2024, 6, 1, 8, 0, 0, 0),
            micros_present: false,
            tz: DateTimeZone::ZoneInfo("US/Eastern".to_string()),
        },
    );
}

#[test]
fn date_basic_and_roundtrip() {
    let bytes = common::date_bytes(2024, 3, 14);
    roundtrip_known(common::date_value(bytes), &KnownValue::Date(chrono::NaiveDate::from_ymd_opt(2024, 3, 14).unwrap()));
}

#[test]
fn date_year_boundaries() {
    for year in [1u16, 1970, 9999] {
        let bytes = common::date_bytes(year, 12, 31);
        roundtrip_known(common::date_value(bytes), &KnownValue::Date(chrono::NaiveDate::from_ymd_opt(year as i32, 12, 31).unwrap()));
    }
}

#[test]
fn time_basic() {
    let bytes = common::time_bytes(13, 45, 9, 0);
    roundtrip_known(
        common::time_value(bytes, None),
        &KnownValue::Time { naive: chrono::NaiveTime::from_hms_opt(13, 45, 9).unwrap(), micros_present: false, tz: DateTimeZone::Naive },
    );
}

#[test]
fn time_with_microseconds() {
    let bytes = common::time_bytes(13, 45, 9, 123456);
    roundtrip_known(
        common::time_value(bytes, None),
        &KnownValue::Time {
            naive: chrono::NaiveTime::from_hms_micro_opt(13, 45, 9, 123456).unwrap(),
            micros_present: true,
            tz: DateTimeZone::Naive,
        },
    );
}

#[test]
fn time_midnight() {
    let bytes = common::time_bytes(0, 0, 0, 0);
    roundtrip_known(
        common::time_value(bytes, None),
        &KnownValue::Time { naive: chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap(), micros_present: false, tz: DateTimeZone::Naive },
    );
}

#[test]
fn time_with_tz() {
    let bytes = common::time_bytes(13, 45, 9, 0);
    roundtrip_known(
        common::time_value(bytes, Some(common::fixed_offset_tz(3600))),
        &KnownValue::Time { naive: chrono::NaiveTime::from_hms_opt(13, 45, 9).unwrap(), micros_present: false, tz: DateTimeZone::FixedOffset(3600) },
    );
}

#[test]
fn timedelta_basic_and_roundtrip() {
    roundtrip_known(
        common::timedelta_value(1, 3600, 0),
        &KnownValue::Timedelta { days: 1, seconds: 3600, microseconds: 0 },
    );
}

#[test]
fn timedelta_negative() {
    roundtrip_known(
        common::timedelta_value(-1, 0, 0),
        &KnownValue::Timedelta { days: -1, seconds: 0, microseconds: 0 },
    );
}

#[test]
fn timedelta_zero() {
    roundtrip_known(common::timedelta_value(0, 0, 0), &KnownValue::Timedelta { days: 0, seconds: 0, microseconds: 0 });
}

#[test]
fn decimal_format_and_roundtrip() {
    for s in ["0", "-1.5", "3.14159265358979", "1E+10"] {
        roundtrip_known(common::decimal_value(s), &KnownValue::Decimal(s.to_string()));
    }
}

#[test]
fn decimal_nan() {
    roundtrip_known(common::decimal_value("NaN"), &KnownValue::Decimal("NaN".to_string()));
}

#[test]
fn uuid_format_and_roundtrip() {
    let bytes: [u8; 16] = [0x12, 0x3e, 0x45, 0x67, 0xe8, 0x9b, 0x12, 0xd3, 0xa4, 0x56, 0x42, 0x66, 0x14, 0x17, 0x40, 0x00];
    roundtrip_known(common::uuid_value(bytes), &KnownValue::Uuid(u128::from_be_bytes(bytes)));
}

#[test]
fn uuid_nil_and_max() {
    roundtrip_known(common::uuid_value([0u8; 16]), &KnownValue::Uuid(0));
    roundtrip_known(common::uuid_value([0xffu8; 16]), &KnownValue::Uuid(u128::MAX));
}

#[test]
fn set_format_roundtrip_and_empty() {
    let v = Value::Set(zodb_json_codec::value::Shared::new(vec![Value::int(1), Value::int(2), Value::int(3)]));
    let pickled = dict_to_pickle(&v).unwrap();
    assert_eq!(pickle_to_dict(&pickled).unwrap(), v);

    let empty = Value::Set(zodb_json_codec::value::Shared::new(vec![]));
    let pickled = dict_to_pickle(&empty).unwrap();
    assert_eq!(pickle_to_dict(&pickled).unwrap(), empty);
}

#[test]
fn frozenset_format_and_roundtrip() {
    let v = Value::FrozenSet(zodb_json_codec::value::SharedFrozen::new(vec![Value::str("a"), Value::str("b")]));
    let pickled = dict_to_pickle(&v).unwrap();
    assert_eq!(pickle_to_dict(&pickled).unwrap(), v);
}

#[test]
fn set_recognized_from_builtins_reduce() {
    // A real `pickle.dumps({1, 2})` is a `REDUCE` of `builtins.set` over a
    // list, not a dedicated opcode; the recognizer must turn that back into
    // `Value::Set` rather than leaving it as a generic `Reduce`.
    let raw = common::set_value(vec![Value::int(1), Value::int(2)]);
    let pickled = dict_to_pickle(&raw).unwrap();
    let decoded = pickle_to_dict(&pickled).unwrap();
    assert!(matches!(decoded, Value::Set(_)), "expected Value::Set, got {decoded:?}");
}

#[test]
fn frozenset_recognized_from_builtins_reduce() {
    let raw = common::frozenset_value(vec![Value::str("a")]);
    let pickled = dict_to_pickle(&raw).unwrap();
    let decoded = pickle_to_dict(&pickled).unwrap();
    assert!(matches!(decoded, Value::FrozenSet(_)), "expected Value::FrozenSet, got {decoded:?}");
}
