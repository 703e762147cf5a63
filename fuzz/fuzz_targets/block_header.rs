#![no_main]

use libfuzzer_sys::fuzz_target;
use logstore_storage::{block_header::unmarshal_block_headers, ColumnsHeader, ColumnsHeaderIndex};

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes to the header decoders of every format version.
    // Truncated varints, oversized lengths and unsorted headers must come
    // back as errors.
    for format_version in 0..=1 {
        let mut headers = Vec::new();
        let _ = unmarshal_block_headers(&mut headers, data, format_version);
        let _ = ColumnsHeader::unmarshal(data, format_version);
    }
    let _ = ColumnsHeaderIndex::unmarshal(data);
});
