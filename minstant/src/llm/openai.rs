//! OpenAI-compatible chat completions over server-sent events.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use tracing::debug;

use super::{CompletionProvider, CompletionRequest, Delta, DeltaStream, ModelError};

/// Streaming chat completions client.
pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "stream": true,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        body
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn open(&self, request: &CompletionRequest) -> Result<DeltaStream, ModelError> {
        let url = self.endpoint();
        debug!(
            model = %self.model,
            url = %url,
            messages = request.messages.len(),
            "opening completion stream"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();
        let mut lines = StreamReader::new(bytes).lines();

        let deltas = async_stream::stream! {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_frame(&line) {
                        Ok(Some(Frame::Deltas(deltas))) => {
                            for delta in deltas {
                                yield Ok(delta);
                            }
                        }
                        Ok(Some(Frame::Done)) => break,
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(ModelError::Stream(e.to_string()));
                        break;
                    }
                }
            }
        };

        Ok(deltas.boxed())
    }
}

/// A decoded server-sent event line.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Deltas(Vec<Delta>),
    Done,
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    message: String,
}

/// Parse one line of the event stream.
///
/// Returns `None` for blank lines, comments, non-data fields and payloads
/// without content.
fn parse_frame(line: &str) -> Result<Option<Frame>, ModelError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim_start();

    if data == "[DONE]" {
        return Ok(Some(Frame::Done));
    }

    let payload: ChunkPayload = serde_json::from_str(data)?;
    if let Some(error) = payload.error {
        return Err(ModelError::Provider(error.message));
    }

    let mut deltas = Vec::new();
    for delta in payload.choices.into_iter().filter_map(|c| c.delta) {
        if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
            deltas.push(Delta::Text(text));
        }
        for call in delta.tool_calls.unwrap_or_default() {
            let function = call.function.unwrap_or_default();
            deltas.push(Delta::ToolCall {
                index: call.index,
                id: call.id,
                name: function.name,
                arguments: function.arguments.unwrap_or_default(),
            });
        }
    }

    if deltas.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Frame::Deltas(deltas)))
    }
}
