#![no_main]

use std::collections::BTreeMap;

use bincode::Options;
use libfuzzer_sys::fuzz_target;
use ophys_tensor::storage::record::decode_subject;
use ophys_tensor::storage::schema::codec;
use ophys_tensor::storage::FieldValue;

// First byte splits the input into a bincode field map and a tensor payload.
fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let split = (split as usize).min(rest.len());
    let (fields, payload) = rest.split_at(split);

    let Ok(fields) = codec().deserialize::<BTreeMap<String, FieldValue>>(fields) else {
        return;
    };
    if let Ok(subject) = decode_subject(fields, payload) {
        assert_eq!(subject.dff().len(), payload.len() / 4);
    }
});
