#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parser must not panic on any input, and whatever it accepts must
    // survive a write/read cycle unchanged.
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(coverage) = linecov::gcov::read(text) {
            let written = linecov::gcov::write(&coverage);
            assert_eq!(linecov::gcov::read(&written).ok(), Some(coverage));
        }
    }
});
