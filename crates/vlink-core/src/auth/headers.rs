//! Auth header document cache
//!
//! The auth service expects a pair of headers whose names and values are
//! published as an obfuscated JSON document at a fixed location. The
//! document is fetched at most once per process lifetime, decoded in
//! place, and never invalidated (it is static for the life of the process).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{VlinkError, VlinkResult};

const DOCUMENT_URL: &str =
    "https://api.jsonsilo.com/public/f2deaae1-0228-4b32-b520-fcef31bd8838";

/// Number of base64 layers applied to every obfuscated string.
const DECODE_PASSES: usize = 5;

/// Compute-once cache for the decoded header document.
///
/// Owned by whoever constructs the [`AuthClient`](crate::auth::AuthClient)
/// and shared by `Arc`; there is no ambient global.
pub struct HeaderCache {
    http: reqwest::Client,
    url: String,
    document: OnceCell<Value>,
}

impl HeaderCache {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_url(http, DOCUMENT_URL)
    }

    /// Cache reading the document from a non-default location.
    pub fn with_url(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            document: OnceCell::new(),
        }
    }

    /// The decoded document, fetched on first use.
    pub async fn get(&self) -> VlinkResult<&Value> {
        self.document
            .get_or_try_init(|| self.fetch_and_decode())
            .await
    }

    async fn fetch_and_decode(&self) -> VlinkResult<Value> {
        debug!("request [header document]");
        let response = self
            .http
            .get(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| VlinkError::api(format!("header document request failed: {e}")))?;

        let status = response.status();
        debug!("request [header document] status: {status}");
        if !status.is_success() {
            return Err(VlinkError::api(format!(
                "header document request returned {status}"
            )));
        }

        let mut document: Value = response
            .json()
            .await
            .map_err(|e| VlinkError::api(format!("header document is not valid JSON: {e}")))?;
        decode_document(&mut document)?;
        Ok(document)
    }
}

/// Decode every string stored under a key literally named `key` or `value`,
/// walking nested objects.
fn decode_document(value: &mut Value) -> VlinkResult<()> {
    if let Value::Object(map) = value {
        for (key, entry) in map.iter_mut() {
            if matches!(key.as_str(), "key" | "value") {
                if let Value::String(text) = entry {
                    *entry = Value::String(decode_layers(text, DECODE_PASSES)?);
                    continue;
                }
            }
            decode_document(entry)?;
        }
    }
    Ok(())
}

/// Apply `passes` base64 decodes to an obfuscated string.
///
/// The published values are under-padded, so padding is normalised before
/// each pass instead of trusting the stored length.
pub fn decode_layers(value: &str, passes: usize) -> VlinkResult<String> {
    let mut bytes = value.as_bytes().to_vec();
    for _ in 0..passes {
        let text = std::str::from_utf8(&bytes)
            .map_err(|e| VlinkError::api(format!("obfuscated value is not valid UTF-8: {e}")))?;
        bytes = STANDARD_NO_PAD
            .decode(text.trim_end_matches('='))
            .map_err(|e| VlinkError::api(format!("obfuscated value failed to decode: {e}")))?;
    }
    String::from_utf8(bytes)
        .map_err(|e| VlinkError::api(format!("decoded value is not valid UTF-8: {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use serde_json::json;

    /// Obfuscate a string the way the published document does.
    pub(crate) fn encode_layers(value: &str, passes: usize) -> String {
        let mut text = value.to_string();
        for _ in 0..passes {
            text = STANDARD.encode(text.as_bytes());
        }
        text
    }

    #[test]
    fn decode_reverses_encode() {
        let encoded = encode_layers("authorization", DECODE_PASSES);
        assert_eq!(
            decode_layers(&encoded, DECODE_PASSES).unwrap(),
            "authorization"
        );
    }

    #[test]
    fn decode_tolerates_stripped_padding() {
        let encoded = STANDARD.encode("Basic abc123");
        let stripped = encoded.trim_end_matches('=');
        assert_eq!(decode_layers(stripped, 1).unwrap(), "Basic abc123");
        assert_eq!(
            decode_layers(&format!("{stripped}==="), 1).unwrap(),
            "Basic abc123"
        );
    }

    #[test]
    fn document_walk_decodes_nested_pairs() {
        let mut document = json!({
            "h": {
                "p": {
                    "key": encode_layers("x-client", DECODE_PASSES),
                    "value": encode_layers("mobile-app", DECODE_PASSES)
                }
            },
            "note": "left alone"
        });

        decode_document(&mut document).unwrap();

        assert_eq!(document["h"]["p"]["key"], "x-client");
        assert_eq!(document["h"]["p"]["value"], "mobile-app");
        assert_eq!(document["note"], "left alone");
    }

    #[tokio::test]
    async fn document_is_fetched_once() {
        let mut server = mockito::Server::new_async().await;
        let body = json!({
            "h": { "p": { "key": encode_layers("x-client", DECODE_PASSES),
                           "value": encode_layers("mobile-app", DECODE_PASSES) } }
        });
        let mock = server
            .mock("GET", "/")
            .with_status(200)
            .with_body(body.to_string())
            .expect(1)
            .create_async()
            .await;

        let cache = HeaderCache::with_url(reqwest::Client::new(), server.url());
        let first = cache.get().await.unwrap();
        assert_eq!(first["h"]["p"]["key"], "x-client");
        let second = cache.get().await.unwrap();
        assert_eq!(second["h"]["p"]["value"], "mobile-app");

        mock.assert_async().await;
    }
}
