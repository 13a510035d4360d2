//! Location bootstrap tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use serde_json::json;

use viewlink_core::protocol::bootstrap::{decode_fixture, location_payload, location_with_payload};

#[test]
fn location_roundtrips_payload() {
    let data = json!({ "type": "markdown", "content": "# Hi & bye", "tags": ["a b", "c"] });
    let url = location_with_payload("http://localhost:8000/", "markdown", &data);

    assert!(url.starts_with("http://localhost:8000/markdown/v1#"));
    assert_eq!(location_payload(&url).unwrap(), Some(data));
}

#[test]
fn no_fragment_means_no_payload() {
    assert_eq!(location_payload("/counter/v1").unwrap(), None);
    assert_eq!(location_payload("/counter/v1#").unwrap(), None);
}

#[test]
fn garbage_fragment_is_bad_request() {
    let err = location_payload("/counter/v1#%7Bnot-json").expect_err("must fail");
    assert_eq!(err.code().as_str(), "BAD_REQUEST");
}

#[test]
fn fixture_accepts_base64_then_percent_encoding() {
    // {"type":"counter","value":1}
    let b64 = "eyJ0eXBlIjoiY291bnRlciIsInZhbHVlIjoxfQ==";
    assert_eq!(decode_fixture(b64).unwrap(), json!({ "type": "counter", "value": 1 }));

    let pct = "%7B%22type%22%3A%22counter%22%2C%22value%22%3A2%7D";
    assert_eq!(decode_fixture(pct).unwrap(), json!({ "type": "counter", "value": 2 }));

    assert!(decode_fixture("%%%").is_err());
}
