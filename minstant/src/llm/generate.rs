//! Tool-calling generation loop over a completion provider.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use serde_json::json;
use tracing::{debug, warn};

use super::{
    CompletionProvider, CompletionRequest, Delta, GenerateEvent, GenerateRequest, Model,
    ModelError, ToolCall, WireMessage,
};

/// Drives completion rounds until the model answers without calling tools.
///
/// Every text delta of every round is forwarded as a chunk; the final event
/// carries the concatenation of all of them.
pub struct Generator {
    provider: Arc<dyn CompletionProvider>,
    max_tool_rounds: usize,
}

impl Generator {
    pub fn new(provider: Arc<dyn CompletionProvider>, max_tool_rounds: usize) -> Self {
        Self {
            provider,
            max_tool_rounds,
        }
    }
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Output of one completion round.
#[derive(Debug, Default)]
struct Round {
    text: String,
    calls: BTreeMap<usize, PendingCall>,
}

impl Round {
    fn merge_call(&mut self, index: usize, id: Option<String>, name: Option<String>, arguments: &str) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id {
            call.id = id;
        }
        if let Some(name) = name {
            call.name.push_str(&name);
        }
        call.arguments.push_str(arguments);
    }

    /// Completed calls in index order. Calls without an id get a synthetic one.
    fn into_calls(self) -> (String, Vec<PendingCall>) {
        let calls = self
            .calls
            .into_iter()
            .map(|(index, mut call)| {
                if call.id.is_empty() {
                    call.id = format!("call_{index}");
                }
                call
            })
            .collect();
        (self.text, calls)
    }
}

impl Model for Generator {
    fn generate(
        &self,
        request: GenerateRequest,
    ) -> BoxStream<'static, Result<GenerateEvent, ModelError>> {
        let provider = self.provider.clone();
        let max_tool_rounds = self.max_tool_rounds;

        let events = async_stream::stream! {
            let GenerateRequest { system, messages, tools } = request;

            let mut wire = Vec::with_capacity(messages.len() + 1);
            wire.push(WireMessage::System { content: system });
            wire.extend(messages.iter().map(WireMessage::from));

            let definitions = tools.definitions();
            let mut full_text = String::new();
            let mut tool_rounds = 0;

            loop {
                let completion = CompletionRequest {
                    messages: wire.clone(),
                    tools: definitions.clone(),
                };

                let mut deltas = match provider.open(&completion).await {
                    Ok(deltas) => deltas,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };

                let mut round = Round::default();
                let mut failed = false;
                while let Some(delta) = deltas.next().await {
                    match delta {
                        Ok(Delta::Text(text)) => {
                            round.text.push_str(&text);
                            full_text.push_str(&text);
                            yield Ok(GenerateEvent::Chunk(text));
                        }
                        Ok(Delta::ToolCall { index, id, name, arguments }) => {
                            round.merge_call(index, id, name, &arguments);
                        }
                        Err(e) => {
                            yield Err(e);
                            failed = true;
                            break;
                        }
                    }
                }
                if failed {
                    break;
                }

                if round.calls.is_empty() {
                    yield Ok(GenerateEvent::Done(full_text));
                    break;
                }

                if tool_rounds == max_tool_rounds {
                    yield Err(ModelError::ToolRoundsExceeded(max_tool_rounds));
                    break;
                }
                tool_rounds += 1;

                let (text, calls) = round.into_calls();
                wire.push(WireMessage::Assistant {
                    content: (!text.is_empty()).then_some(text),
                    tool_calls: calls
                        .iter()
                        .map(|c| ToolCall::function(&c.id, &c.name, &c.arguments))
                        .collect(),
                });

                for call in calls {
                    let content = match tools.invoke(&call.name, &call.arguments).await {
                        Ok(output) => {
                            debug!(tool = %call.name, "tool call succeeded");
                            output.to_string()
                        }
                        Err(e) => {
                            warn!(tool = %call.name, error = %e, "tool call failed");
                            json!({ "error": e.to_string() }).to_string()
                        }
                    };
                    wire.push(WireMessage::Tool {
                        tool_call_id: call.id,
                        content,
                    });
                }
            }
        };

        events.boxed()
    }
}
