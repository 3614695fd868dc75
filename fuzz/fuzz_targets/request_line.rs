#![no_main]

use libfuzzer_sys::fuzz_target;

use cacheproxy::proxy::request::parse_request_line;
use cacheproxy::proxy::resolver::resolve_target;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = parse_request_line(data) else {
        return;
    };
    assert!(!line.method.is_empty());
    assert!(!line.target.is_empty());
    assert!(!line.version.is_empty());

    if let Ok(resolved) = resolve_target(&line.target) {
        let rewritten = line.origin_form(&resolved.path);
        assert!(rewritten.ends_with("\r\n"));
        assert!(parse_request_line(rewritten.as_bytes()).is_ok());
    }
});
