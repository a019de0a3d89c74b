use std::time::Duration;

use fusion_types::{Candidate, Element};
use serde_json::{Value, json};

use crate::{
    ApiKey, GEMINI_API_BASE_URL, GenerationError, http_client_with_timeout,
    read_capped_error_body,
    retry::{RetryConfig, RetryOutcome, send_with_retry},
};

const GENERATION_PROMPT: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/generation.md"));
const MODERATION_PROMPT: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/moderation.md"));

const GENERATION_MAX_OUTPUT_TOKENS: u32 = 64;
const GENERATION_TEMPERATURE: f64 = 0.9;
const MODERATION_MAX_OUTPUT_TOKENS: u32 = 8;

/// Characters stripped from both ends of a moderation answer.
const ANSWER_NOISE: &[char] = &[
    ' ', '\'', '"', '[', ']', '.', ',', ';', ':', '!', '?', '\n', '\r', '\t', '`', '*',
];

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: ApiKey,
    pub model: String,
    pub moderation_model: String,
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl GeminiConfig {
    #[must_use]
    pub fn new(api_key: ApiKey, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            api_key,
            moderation_model: model.clone(),
            model,
            base_url: GEMINI_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(20),
            retry: RetryConfig::default(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{model}:generateContent",
            self.base_url.trim_end_matches('/')
        )
    }
}

/// The model's answer to "is this content safe?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationVerdict {
    Safe,
    Unsafe,
    /// Anything other than a bare `safe`/`unsafe`. Carries the normalized answer.
    Inconclusive(String),
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    /// Client over the hardened HTTPS-only transport.
    pub fn new(config: GeminiConfig) -> Result<Self, GenerationError> {
        let client = http_client_with_timeout(config.timeout)
            .map_err(|source| GenerationError::Transport {
                attempts: 0,
                source,
            })?;
        Ok(Self { client, config })
    }

    /// Client over a caller-supplied transport.
    #[must_use]
    pub fn with_client(config: GeminiConfig, client: reqwest::Client) -> Self {
        Self { client, config }
    }

    #[must_use]
    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    /// Ask the model for the element produced by merging `first` and `second`.
    ///
    /// Only the name and emoji come from the model; description and tags are
    /// left empty.
    pub async fn generate(
        &self,
        first: &Element,
        second: &Element,
    ) -> Result<Candidate, GenerationError> {
        let body = request_body(
            &build_generation_prompt(first, second),
            GENERATION_MAX_OUTPUT_TOKENS,
            GENERATION_TEMPERATURE,
        );
        let text = self.generate_content(&self.config.model, &body).await?;

        Candidate::parse(&text).map_err(|err| {
            tracing::warn!(error = %err, response_bytes = text.len(), "Unparsable generation response");
            GenerationError::Malformed(err)
        })
    }

    /// Ask the moderation model to classify a candidate.
    pub async fn moderate(&self, candidate: &Candidate) -> Result<ModerationVerdict, GenerationError> {
        let body = request_body(
            &build_moderation_prompt(candidate),
            MODERATION_MAX_OUTPUT_TOKENS,
            0.0,
        );
        let text = self
            .generate_content(&self.config.moderation_model, &body)
            .await?;
        let verdict = parse_moderation_answer(&text);
        tracing::debug!(?verdict, "Moderation answer");
        Ok(verdict)
    }

    async fn generate_content(&self, model: &str, body: &Value) -> Result<String, GenerationError> {
        let url = self.config.endpoint(model);
        let outcome = send_with_retry(
            || {
                self.client
                    .post(&url)
                    .header("x-goog-api-key", self.config.api_key.expose())
                    .header("content-type", "application/json")
                    .json(body)
            },
            &self.config.retry,
        )
        .await;

        let response = match outcome {
            RetryOutcome::Success(response) => response,
            RetryOutcome::HttpError(response) => {
                let status = response.status().as_u16();
                let body = read_capped_error_body(response).await;
                return Err(GenerationError::Status { status, body });
            }
            RetryOutcome::ConnectionError { attempts, source } => {
                return Err(GenerationError::transport(attempts, source));
            }
        };

        let json: Value = response
            .json()
            .await
            .map_err(|source| GenerationError::transport(1, source))?;
        extract_text(&json).ok_or(GenerationError::MissingText)
    }
}

fn request_body(prompt: &str, max_output_tokens: u32, temperature: f64) -> Value {
    json!({
        "contents": [
            {
                "role": "user",
                "parts": [{ "text": prompt }]
            }
        ],
        "generationConfig": {
            "maxOutputTokens": max_output_tokens,
            "temperature": temperature
        }
    })
}

fn describe(element: &Element) -> String {
    if element.emoji.is_empty() {
        format!("(\"{}\")", element.name)
    } else {
        format!("{} (\"{}\")", element.emoji, element.name)
    }
}

pub(crate) fn build_generation_prompt(first: &Element, second: &Element) -> String {
    GENERATION_PROMPT
        .replace("{first}", &describe(first))
        .replace("{second}", &describe(second))
}

pub(crate) fn build_moderation_prompt(candidate: &Candidate) -> String {
    let content = json!({
        "name": candidate.name.as_str(),
        "description": candidate.description,
        "tags": candidate.tags,
    });
    MODERATION_PROMPT.replace("{candidate}", &content.to_string())
}

/// Text of the first part that carries any, from the first candidate.
pub(crate) fn extract_text(json: &Value) -> Option<String> {
    json["candidates"]
        .as_array()?
        .first()?["content"]["parts"]
        .as_array()?
        .iter()
        .find_map(|part| part["text"].as_str())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

pub(crate) fn parse_moderation_answer(raw: &str) -> ModerationVerdict {
    let answer = raw.trim().to_lowercase();
    let answer = answer.trim_matches(ANSWER_NOISE);
    match answer {
        "safe" => ModerationVerdict::Safe,
        "unsafe" => ModerationVerdict::Unsafe,
        other => ModerationVerdict::Inconclusive(other.to_string()),
    }
}
