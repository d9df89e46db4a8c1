use crate::credentials::ApiKey;
use crate::providers::sse::{SseDecoder, SseEvent};
use crate::traits::{CompletionClient, FragmentStream};
use crate::{ConfigError, GenerationError, GenerationSettings};
use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use url::Url;

/// Streaming client for OpenAI-compatible `/chat/completions` endpoints.
/// The default settings target xAI.
pub struct ChatCompletionsClient {
    endpoint: Url,
    api_key: ApiKey,
    settings: GenerationSettings,
    client: Client,
}

impl ChatCompletionsClient {
    pub fn new(settings: GenerationSettings, api_key: ApiKey) -> Result<Self, ConfigError> {
        let base = Url::parse(&format!("{}/", settings.base_url.trim_end_matches('/')))?;
        let endpoint = base.join("chat/completions")?;
        let client = Client::builder().build()?;

        Ok(Self {
            endpoint,
            api_key,
            settings,
            client,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.settings.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            stream: true,
        }
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionsClient {
    async fn stream(&self, prompt: &str) -> Result<FragmentStream, GenerationError> {
        debug!(
            endpoint = %self.endpoint,
            model = %self.settings.model,
            prompt_bytes = prompt.len(),
            "sending streaming request"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.api_key.expose())
            .header(ACCEPT, "text/event-stream")
            .json(&self.request_body(prompt))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let details = response.text().await.unwrap_or_default();
            return Err(GenerationError::AuthenticationFailed(format!(
                "{status}: {details}"
            )));
        }

        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %details, "provider streaming error");
            return Err(GenerationError::Provider {
                status: status.as_u16(),
                details,
            });
        }

        Ok(decode_fragments(response.bytes_stream()))
    }
}

/// Turns an SSE byte stream into answer fragments. Transport errors and
/// provider `error` payloads end the stream with an `Err` item.
pub fn decode_fragments<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::default();
        let mut done = false;

        'body: while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    yield Err(GenerationError::StreamInterrupted(error.to_string()));
                    return;
                }
            };

            for event in decoder.push(chunk.as_ref()) {
                match event {
                    SseEvent::Done => {
                        done = true;
                        break 'body;
                    }
                    SseEvent::Data(data) => match parse_delta(&data) {
                        Ok(Some(fragment)) => {
                            yield Ok(fragment);
                        }
                        Ok(None) => {}
                        Err(error) => {
                            yield Err(error);
                            return;
                        }
                    },
                }
            }
        }

        if !done {
            if let Some(SseEvent::Data(data)) = decoder.finish() {
                match parse_delta(&data) {
                    Ok(Some(fragment)) => {
                        yield Ok(fragment);
                    }
                    Ok(None) => {}
                    Err(error) => {
                        yield Err(error);
                    }
                }
            }
        }
    })
}

fn parse_delta(data: &str) -> Result<Option<String>, GenerationError> {
    let chunk = match serde_json::from_str::<StreamResponse>(data) {
        Ok(chunk) => chunk,
        Err(error) => {
            trace!(data = %data, error = %error, "ignoring unparseable SSE chunk");
            return Ok(None);
        }
    };

    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(|message| message.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(GenerationError::StreamInterrupted(format!(
            "provider error: {message}"
        )));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
