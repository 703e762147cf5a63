#![no_main]

use libfuzzer_sys::fuzz_target;
use logstore_query::parse_query;

fuzz_target!(|data: &[u8]| {
    // The parser returns Ok or Err for any input, including invalid UTF-8
    // (converted lossily) and deeply nested filters.
    let s = String::from_utf8_lossy(data);
    if let Ok(q) = parse_query(&s) {
        // Canonical text must parse again.
        let _ = parse_query(&q.to_string());
    }
});
