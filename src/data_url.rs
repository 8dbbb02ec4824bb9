//! Converting binary data to a `data:` URL.

use base64::{Engine as _, prelude::BASE64_STANDARD};

/// Convert binary data to a `data:` URL, as embedded in vision request
/// content parts.
pub fn data_url(mime_type: &str, data: &[u8]) -> String {
    let base64_data = BASE64_STANDARD.encode(data);
    // Some sources indicate that the Base64 data should be percent-encoded,
    // but in practice this breaks several vision models.
    format!("data:{};base64,{}", mime_type, base64_data)
}
