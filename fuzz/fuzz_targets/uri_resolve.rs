#![no_main]

use libfuzzer_sys::fuzz_target;

use cacheproxy::proxy::resolver::resolve_target;

fuzz_target!(|data: &[u8]| {
    let target = String::from_utf8_lossy(data);
    if let Ok(resolved) = resolve_target(target.as_ref()) {
        assert!(!resolved.port.is_empty());
        assert!(resolved.port.bytes().all(|byte| byte.is_ascii_digit()));
        assert!(resolved.path.starts_with('/'));
        assert!(target.contains(resolved.host.as_str()));
        let _ = resolved.authority();
    }
});
