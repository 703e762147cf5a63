#![no_main]

use libfuzzer_sys::fuzz_target;
use logstore_core::DataBlock;

fuzz_target!(|data: &[u8]| {
    // A decoded block must survive a marshal round trip.
    let mut src = data;
    if let Ok(db) = DataBlock::unmarshal(&mut src) {
        let mut buf = Vec::new();
        db.marshal(&mut buf);
        let mut again = buf.as_slice();
        let _ = DataBlock::unmarshal(&mut again);
    }
});
