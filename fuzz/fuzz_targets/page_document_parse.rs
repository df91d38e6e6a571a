//! Fuzz harness for `PageDocument::from_yaml`.
//!
//! Arbitrary UTF-8 input must either parse into a validated document or
//! fail with a `DocumentError`. A document that parses must resolve names,
//! survive an admission and serialize again without panicking.

#![no_main]
use libfuzzer_sys::fuzz_target;
use pagegate_core::{AdmissionRequest, PageDocument, admit};
use rand::SeedableRng;
use rand::rngs::StdRng;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(mut document) = PageDocument::from_yaml(text) else {
        return;
    };

    let names: Vec<String> = document.pages.keys().cloned().collect();
    for name in &names {
        assert_eq!(document.resolve(name), Some(name.as_str()));
    }

    // Drive one admission per page; whatever happens, the result must still
    // serialize and validate.
    let mut rng = StdRng::seed_from_u64(0);
    for name in &names {
        let request = AdmissionRequest::new("192.0.2.1").with_name(name.as_str());
        let _ = admit(&mut document, &request, &mut rng);
    }

    if let Ok(yaml) = document.to_yaml() {
        assert!(PageDocument::from_yaml(&yaml).is_ok());
    }
});
