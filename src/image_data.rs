use serde::{Deserialize, Serialize};

/// MIME types whose `data:<mime>;base64,` prefix we know how to strip.
/// Anything else is passed through untouched with a JPEG default.
const KNOWN_MIME_TYPES: [&str; 6] = [
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/webp",
    "image/heic",
    "image/heif",
];

pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// An image as it travels through the service: a declared MIME type and
/// base64-encoded bytes. The browser hands us a data URI; the remote
/// API wants the two pieces separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: String,
}

impl ImagePayload {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Splits a data URI into its declared MIME type and base64 payload.
    /// For an unrecognized or missing prefix the input string is kept
    /// as the payload unchanged and the MIME type defaults to JPEG.
    pub fn from_data_uri(uri: &str) -> Self {
        for mime in KNOWN_MIME_TYPES {
            let prefix = format!("data:{mime};base64,");
            if let Some(stripped) = uri.strip_prefix(&prefix) {
                return Self::new(mime, stripped);
            }
        }
        Self::new(DEFAULT_MIME_TYPE, uri)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}
