#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = zodb_json_codec::pickle_to_dict(data);
    let _ = zodb_json_codec::decode_zodb_record(data);
});
