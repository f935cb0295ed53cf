use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::BackendError;
use crate::image_data::ImagePayload;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const TEXT_MODEL: &str = "gemini-2.5-flash";
const IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

/// Roles the remote chat protocol understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One prior turn of an outbound chat history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

/// The three call shapes the service consumes from the remote AI
/// capability. Everything above this trait is testable against a mock.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Structured-output generation: image + instruction + JSON schema,
    /// returning the raw JSON text (None when the response carried no
    /// text part).
    async fn generate_structured(
        &self,
        prompt: &str,
        image: &ImagePayload,
        schema: &Value,
    ) -> Result<Option<String>, BackendError>;

    /// Plain text generation, optionally grounded on an image.
    async fn generate_text(
        &self,
        prompt: &str,
        image: Option<&ImagePayload>,
    ) -> Result<Option<String>, BackendError>;

    /// Image-capable generation with permissive safety thresholds.
    /// Returns the first inline image part, or None when the call
    /// succeeded but produced no image.
    async fn generate_image(
        &self,
        prompt: &str,
        image: Option<&ImagePayload>,
    ) -> Result<Option<ImagePayload>, BackendError>;

    /// One chat turn: fixed system instruction, prior history, new
    /// user message, one reply.
    async fn chat(
        &self,
        system: &str,
        history: &[ChatTurn],
        message: &str,
    ) -> Result<String, BackendError>;
}

/// Gemini REST implementation. Holds one pooled `reqwest::Client` for
/// the lifetime of the process; a missing credential only surfaces
/// when a call is attempted.
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl GeminiBackend {
    pub fn from_env() -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: std::env::var("GEMINI_API_KEY").ok(),
        }
    }

    fn api_key(&self) -> Result<&str, BackendError> {
        self.api_key.as_deref().ok_or(BackendError::MissingApiKey)
    }

    async fn post(&self, model: &str, payload: &Value) -> Result<GenerateResponse, BackendError> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            API_BASE,
            model,
            self.api_key()?
        );

        tracing::debug!(model, "sending generateContent request");
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if !status.is_success() {
            tracing::warn!(model, %status, "generateContent returned an error");
            return Err(BackendError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| BackendError::Malformed(e.to_string()))
    }
}

/// All four harm categories at the most permissive level. Stylization
/// of ordinary art and photography gets refused spuriously otherwise.
fn permissive_safety_settings() -> Value {
    let categories = [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ];
    Value::Array(
        categories
            .into_iter()
            .map(|category| json!({ "category": category, "threshold": "BLOCK_NONE" }))
            .collect(),
    )
}

fn inline_data_part(image: &ImagePayload) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type,
            "data": image.data,
        }
    })
}

fn user_parts(prompt: &str, image: Option<&ImagePayload>) -> Value {
    let mut parts = Vec::new();
    if let Some(image) = image {
        parts.push(inline_data_part(image));
    }
    parts.push(json!({ "text": prompt }));
    Value::Array(parts)
}

#[async_trait]
impl GenerativeBackend for GeminiBackend {
    async fn generate_structured(
        &self,
        prompt: &str,
        image: &ImagePayload,
        schema: &Value,
    ) -> Result<Option<String>, BackendError> {
        let payload = json!({
            "contents": [{ "parts": user_parts(prompt, Some(image)) }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": schema,
            },
        });
        let response = self.post(TEXT_MODEL, &payload).await?;
        Ok(response.first_text())
    }

    async fn generate_text(
        &self,
        prompt: &str,
        image: Option<&ImagePayload>,
    ) -> Result<Option<String>, BackendError> {
        let payload = json!({
            "contents": [{ "parts": user_parts(prompt, image) }],
        });
        let response = self.post(TEXT_MODEL, &payload).await?;
        Ok(response.first_text())
    }

    async fn generate_image(
        &self,
        prompt: &str,
        image: Option<&ImagePayload>,
    ) -> Result<Option<ImagePayload>, BackendError> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": user_parts(prompt, image) }],
            "generationConfig": { "responseModalities": ["IMAGE", "TEXT"] },
            "safetySettings": permissive_safety_settings(),
        });
        let response = self.post(IMAGE_MODEL, &payload).await?;
        Ok(response.first_inline_image())
    }

    async fn chat(
        &self,
        system: &str,
        history: &[ChatTurn],
        message: &str,
    ) -> Result<String, BackendError> {
        let mut contents: Vec<Value> = history
            .iter()
            .map(|turn| {
                json!({
                    "role": turn.role,
                    "parts": [{ "text": turn.text }],
                })
            })
            .collect();
        contents.push(json!({ "role": "user", "parts": [{ "text": message }] }));

        let payload = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": contents,
        });
        let response = self.post(TEXT_MODEL, &payload).await?;
        response
            .first_text()
            .ok_or_else(|| BackendError::Malformed("no text in chat reply".into()))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: String,
}

impl GenerateResponse {
    fn parts(self) -> Vec<Part> {
        self.candidates
            .into_iter()
            .flatten()
            .filter_map(|c| c.content)
            .filter_map(|c| c.parts)
            .flatten()
            .collect()
    }

    fn first_text(self) -> Option<String> {
        self.parts()
            .into_iter()
            .filter_map(|p| p.text)
            .find(|t| !t.is_empty())
    }

    fn first_inline_image(self) -> Option<ImagePayload> {
        self.parts()
            .into_iter()
            .filter_map(|p| p.inline_data)
            .find(|d| !d.data.is_empty())
            .map(|d| {
                ImagePayload::new(
                    d.mime_type
                        .unwrap_or_else(|| crate::image_data::DEFAULT_MIME_TYPE.to_string()),
                    d.data,
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_text_extraction_skips_empty_parts() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":""},{"text":"hello"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(response.first_text().as_deref(), Some("hello"));
    }

    #[test]
    fn response_inline_image_extraction() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[
                {"text":"here you go"},
                {"inlineData":{"mimeType":"image/png","data":"QUJD"}}
            ]}}]}"#,
        )
        .unwrap();
        let image = response.first_inline_image().unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, "QUJD");
    }

    #[test]
    fn missing_candidates_yield_nothing() {
        let response: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(response.first_text().is_none());
    }

    #[test]
    fn safety_settings_cover_all_categories_at_block_none() {
        let settings = permissive_safety_settings();
        let entries = settings.as_array().unwrap();
        assert_eq!(entries.len(), 4);
        for entry in entries {
            assert_eq!(entry["threshold"], "BLOCK_NONE");
        }
    }
}
