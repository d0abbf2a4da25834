#![no_main]

use libfuzzer_sys::fuzz_target;
use ratchet_session::PreKeyBundle;

fuzz_target!(|data: &[u8]| {
    // Parsing never verifies; verification must reject garbage without panicking
    if let Ok(bundle) = PreKeyBundle::from_bytes(data) {
        assert_eq!(bundle.to_bytes(), data);
        let _ = bundle.verify_signature();
    }
});
