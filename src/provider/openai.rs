//! OpenAI chat completions (gpt-4o).
//!
//! One bearer-authenticated POST; the image travels as a `data:` URL inside an
//! `image_url` content part. The answer is `choices[0].message.content`.

use super::transport::{Auth, VendorRequest};
use super::VendorAdapter;
use crate::config::ProviderSettings;
use crate::credentials::ProviderCredential;
use crate::pipeline::encode::EncodedImage;
use serde_json::{json, Value};
use zeroize::Zeroizing;

#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiAdapter {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        }
    }
}

/// Chat-completions body shared by the OpenAI-compatible vendors.
pub(crate) fn chat_completion_body(
    model: &str,
    max_tokens: u32,
    prompt: &str,
    image: &EncodedImage,
) -> Value {
    json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                { "type": "image_url", "image_url": { "url": image.data_url() } }
            ]
        }],
        "max_tokens": max_tokens
    })
}

impl VendorAdapter for OpenAiAdapter {
    fn build_request(
        &self,
        image: &EncodedImage,
        prompt: &str,
        credential: &ProviderCredential,
    ) -> VendorRequest {
        VendorRequest::new(
            self.endpoint.clone(),
            Auth::Bearer(Zeroizing::new(credential.expose().to_string())),
            chat_completion_body(&self.model, self.max_tokens, prompt, image),
        )
    }

    fn extract_text(&self, body: &Value) -> Option<String> {
        body.pointer("/choices/0/message/content")?
            .as_str()
            .map(str::to_string)
    }
}
