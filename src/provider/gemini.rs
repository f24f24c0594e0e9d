//! Google Gemini `generateContent`.
//!
//! The key goes in the query string, the model in the path, and the image as
//! an `inline_data` part (raw base64, no `data:` prefix).

use super::transport::{Auth, VendorRequest};
use super::VendorAdapter;
use crate::config::ProviderSettings;
use crate::credentials::ProviderCredential;
use crate::pipeline::encode::EncodedImage;
use serde_json::{json, Value};
use zeroize::Zeroizing;

#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    url: String,
    max_tokens: u32,
}

impl GeminiAdapter {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            url: format!(
                "{}/{}:generateContent",
                settings.endpoint.trim_end_matches('/'),
                settings.model
            ),
            max_tokens: settings.max_tokens,
        }
    }
}

impl VendorAdapter for GeminiAdapter {
    fn build_request(
        &self,
        image: &EncodedImage,
        prompt: &str,
        credential: &ProviderCredential,
    ) -> VendorRequest {
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "inline_data": { "mime_type": image.mime_type, "data": image.data } }
                ]
            }],
            "generationConfig": { "maxOutputTokens": self.max_tokens }
        });
        VendorRequest::new(
            self.url.clone(),
            Auth::QueryKey {
                name: "key",
                value: Zeroizing::new(credential.expose().to_string()),
            },
            body,
        )
    }

    fn extract_text(&self, body: &Value) -> Option<String> {
        body.pointer("/candidates/0/content/parts/0/text")?
            .as_str()
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderKind;

    #[test]
    fn url_model_and_key() {
        let mut settings = ProviderSettings::defaults_for(ProviderKind::Gemini);
        settings.endpoint.push('/');
        let adapter = GeminiAdapter::new(&settings);
        let image = EncodedImage {
            name: "x_page1.png".into(),
            page_index: 1,
            data: "QUJD".into(),
            mime_type: "image/png".into(),
        };
        let req = adapter.build_request(&image, "p", &ProviderCredential::new("AIza"));

        assert_eq!(
            req.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert!(matches!(req.auth, Auth::QueryKey { name: "key", ref value } if value.as_str() == "AIza"));
        assert_eq!(req.body["contents"][0]["parts"][1]["inline_data"]["data"], "QUJD");
        assert_eq!(req.body["generationConfig"]["maxOutputTokens"], 1000);
    }

    #[test]
    fn text_location() {
        let adapter = GeminiAdapter::new(&ProviderSettings::defaults_for(ProviderKind::Gemini));
        let body = json!({"candidates": [{"content": {"parts": [{"text": "[{\"name\":\"A\"}]"}]}}]});
        assert_eq!(adapter.extract_text(&body).as_deref(), Some("[{\"name\":\"A\"}]"));
        assert!(adapter.extract_text(&json!({"promptFeedback": {}})).is_none());
    }
}
