use bytes::Bytes;
use http::HeaderMap;
use http::header::CONTENT_LENGTH;
use http::header::CONTENT_TYPE;

/// An HTTP payload as it moves through the gateway: headers plus an opaque
/// body. Conversion chains rewrite the body; binary bodies pass through
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct HttpContent {
    pub header: HeaderMap,
    pub body: Bytes,
}

impl HttpContent {
    pub fn new(header: HeaderMap, body: Bytes) -> Self {
        Self { header, body }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut header = HeaderMap::new();
        header.insert(CONTENT_TYPE, http::HeaderValue::from_static("application/json"));
        Self {
            header,
            body: Bytes::from(value.to_string()),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Binary payloads are never run through conversion chains.
    pub fn is_binary(&self) -> bool {
        match self.content_type() {
            Some(ct) => {
                ct.starts_with("application/octet-stream") || ct.starts_with("audio/")
            }
            None => false,
        }
    }

    /// Converted bodies change size, so a stale `Content-Length` must go.
    pub fn remove_content_length(&mut self) {
        self.header.remove(CONTENT_LENGTH);
    }

    pub fn replace_body(&mut self, body: Bytes) {
        self.body = body;
        self.remove_content_length();
    }
}
