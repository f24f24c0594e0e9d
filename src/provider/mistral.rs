//! Mistral chat completions.
//!
//! Wire format is OpenAI-compatible, with two differences that matter here:
//!
//! * `message.content` may come back as a list of `{type:"text", text}`
//!   chunks instead of a plain string; the chunks are concatenated.
//! * The model likes to wrap its array in prose and fences, so parsing uses
//!   [`parse_lenient`](super::parse::parse_lenient).
//!
//! Mistral is also the vendor that rate limits hardest; its default
//! [`RetryPolicy`](super::retry::RetryPolicy) lives in
//! [`ProviderSettings::defaults_for`].

use super::openai::chat_completion_body;
use super::parse::{self, ParseError};
use super::transport::{Auth, VendorRequest};
use super::VendorAdapter;
use crate::config::ProviderSettings;
use crate::credentials::ProviderCredential;
use crate::pipeline::encode::EncodedImage;
use serde_json::Value;
use zeroize::Zeroizing;

#[derive(Debug, Clone)]
pub struct MistralAdapter {
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl MistralAdapter {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        }
    }
}

impl VendorAdapter for MistralAdapter {
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
        match body.pointer("/choices/0/message/content")? {
            Value::String(s) => Some(s.clone()),
            Value::Array(chunks) => {
                let text: String = chunks
                    .iter()
                    .filter(|c| c.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|c| c.get("text").and_then(Value::as_str))
                    .collect();
                Some(text)
            }
            _ => None,
        }
    }

    fn parse_records(&self, text: &str) -> Result<Vec<Value>, ParseError> {
        parse::parse_lenient(text)
    }
}
