#![no_main]

use libfuzzer_sys::fuzz_target;

use forensic_scanner::ForensicPath;

// Any text that parses as a forensic path must print back to a string that
// parses to the same path.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(pos) = text.parse::<ForensicPath>() else {
        return;
    };
    let again: ForensicPath = pos.to_string().parse().expect("printed path must parse");
    assert_eq!(again, pos);
    assert_eq!(again.depth(), pos.depth());
});
