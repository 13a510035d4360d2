//! Location bootstrap: a payload carried in the view's own location.
//!
//! Format: `<base>/<view>/v1#<percent-encoded JSON>`. The fragment never
//! reaches a server, so a view can be rendered deterministically without any
//! host on the other side.

use base64::Engine;
use serde_json::Value;

use crate::error::{Result, ViewLinkError};

/// Extract the payload embedded in a location fragment.
///
/// Returns `Ok(None)` when there is no fragment or it is empty.
pub fn location_payload(location: &str) -> Result<Option<Value>> {
    let Some((_, fragment)) = location.split_once('#') else {
        return Ok(None);
    };
    if fragment.is_empty() {
        return Ok(None);
    }

    let json = urlencoding::decode(fragment)
        .map_err(|e| ViewLinkError::BadRequest(format!("invalid fragment encoding: {e}")))?;
    let value = serde_json::from_str(&json)
        .map_err(|e| ViewLinkError::BadRequest(format!("invalid fragment json: {e}")))?;
    Ok(Some(value))
}

/// Build a view location carrying `payload` in its fragment.
pub fn location_with_payload(base: &str, view: &str, payload: &Value) -> String {
    let json = payload.to_string();
    format!(
        "{}/{}/v1#{}",
        base.trim_end_matches('/'),
        view,
        urlencoding::encode(&json)
    )
}

/// Decode a fixture given as base64 JSON, falling back to percent-encoded JSON.
pub fn decode_fixture(raw: &str) -> Result<Value> {
    if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(raw) {
        if let Ok(v) = serde_json::from_slice(&bytes) {
            return Ok(v);
        }
    }

    let json = urlencoding::decode(raw)
        .map_err(|e| ViewLinkError::BadRequest(format!("invalid fixture encoding: {e}")))?;
    serde_json::from_str(&json)
        .map_err(|e| ViewLinkError::BadRequest(format!("invalid fixture json: {e}")))
}
