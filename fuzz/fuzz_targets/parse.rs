#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = ember_parser::parse(s);
        let _ = ember_lexer::needs_more_input(s);
    }
});
