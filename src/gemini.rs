use std::future::Future;

use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::GeminiConfig;
use crate::error::LlmError;

/// A file passed inline alongside a prompt.
#[derive(Debug, Clone)]
pub struct InlineFile {
    pub mime_type: String,
    pub data: Vec<u8>,
}

pub trait GenerativeModel: Send + Sync {
    /// Text-only prompt against the chat model.
    fn generate_text(&self, prompt: &str) -> impl Future<Output = Result<String, LlmError>> + Send;

    /// Prompt plus an inline file against the vision model.
    fn generate_with_file(
        &self,
        prompt: &str,
        file: &InlineFile,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: &'a str },
    Inline { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> anyhow::Result<Self> {
        use anyhow::Context as _;

        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        )
    }

    async fn generate(&self, model: &str, parts: Vec<RequestPart<'_>>) -> Result<String, LlmError> {
        let api_key = self.config.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;
        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts,
            }],
        };

        tracing::debug!(%model, "sending generateContent request");
        let response = self
            .http_client
            .post(self.endpoint(model))
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: GenerateResponse = response.json().await?;
        let text = response_text(payload);
        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }
}

impl GenerativeModel for GeminiClient {
    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError> {
        self.generate(&self.config.chat_model, vec![RequestPart::Text { text: prompt }])
            .await
    }

    async fn generate_with_file(&self, prompt: &str, file: &InlineFile) -> Result<String, LlmError> {
        let parts = vec![
            RequestPart::Text { text: prompt },
            RequestPart::Inline {
                inline_data: InlineData {
                    mime_type: file.mime_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(&file.data),
                },
            },
        ];
        self.generate(&self.config.vision_model, parts).await
    }
}

fn response_text(payload: GenerateResponse) -> String {
    payload
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// Remove markdown code fences the model likes to wrap JSON in.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json\n", "")
        .replace("```json", "")
        .replace("```\n", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Strip fences and decode the model's reply as `T`.
pub fn parse_model_json<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let cleaned = strip_code_fences(text);
    Ok(serde_json::from_str(&cleaned)?)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays canned replies in order and records the prompts it saw.
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        pub prompts: Mutex<Vec<String>>,
        pub files: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn replying(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            }
        }

        pub fn failing() -> Self {
            Self::replying(vec![Err(LlmError::MissingApiKey)])
        }

        fn next(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse))
        }
    }

    impl GenerativeModel for ScriptedModel {
        async fn generate_text(&self, prompt: &str) -> Result<String, LlmError> {
            self.next(prompt)
        }

        async fn generate_with_file(&self, prompt: &str, file: &InlineFile) -> Result<String, LlmError> {
            self.files.lock().unwrap().push(file.mime_type.clone());
            self.next(prompt)
        }
    }
}
