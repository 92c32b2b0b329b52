//! `POST /chat`: submit a turn and stream the reply as server-sent events.

use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use tracing::debug;

use super::{ApiError, AppState};
use crate::bridge::StreamEvent;
use crate::models::{ChatInput, Identity, ValidationError};

/// Header carrying the caller id set by the authentication gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

/// SSE event names of the terminal frames.
pub const DONE_EVENT: &str = "done";
pub const ERROR_EVENT: &str = "error";

/// Authenticated caller, taken from [`USER_ID_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
            .ok_or_else(|| ApiError::Unauthorized("missing authentication".to_string()))
    }
}

/// Request body of `POST /chat`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub chat_input: String,
    #[serde(default)]
    pub session_id: String,
    pub full_name: Option<String>,
    pub lat: Option<f64>,
    pub long: Option<f64>,
}

impl ChatRequest {
    pub fn into_input(self, caller: CallerId) -> Result<ChatInput, ValidationError> {
        let identity = Identity {
            caller_id: caller.0,
            display_name: self.full_name.filter(|n| !n.trim().is_empty()),
            lat: self.lat,
            long: self.long,
        };
        ChatInput::new(self.session_id, self.chat_input, Some(identity))
    }
}

pub async fn chat(
    State(state): State<AppState>,
    caller: CallerId,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(request) = body.map_err(|e| {
        debug!(error = %e, "rejected chat body");
        ApiError::BadRequest("invalid request body".to_string())
    })?;
    let input = request.into_input(caller)?;

    let mut turn = state.turns.spawn(input);
    let turn_id = turn.id();

    // Dropping the stream on client disconnect drops the handle, which
    // cancels the turn.
    let stream = async_stream::stream! {
        while let Some(event) = turn.next_event().await {
            if let StreamEvent::Done(reply) = &event {
                debug!(turn_id, chars = reply.len(), "reply streamed");
            }
            yield Ok(to_sse(&event));
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Terminal frames carry an event name so a chunk reading `[DONE]` is
/// still just text.
fn to_sse(event: &StreamEvent) -> Event {
    let sse = Event::default();
    let sse = match frame_name(event) {
        Some(name) => sse.event(name),
        None => sse,
    };
    sse.data(frame_data(event))
}

fn frame_name(event: &StreamEvent) -> Option<&'static str> {
    match event {
        StreamEvent::Chunk(_) => None,
        StreamEvent::Done(_) => Some(DONE_EVENT),
        StreamEvent::Error(_) => Some(ERROR_EVENT),
    }
}

/// Payload of the `data:` field for one event.
fn frame_data(event: &StreamEvent) -> String {
    match event {
        StreamEvent::Chunk(text) => sanitize(text),
        StreamEvent::Done(_) => "[DONE]".to_string(),
        StreamEvent::Error(e) => format!("[ERROR] {}", sanitize(&e.to_string())),
    }
}

/// Event data cannot carry carriage returns; normalise them to line feeds.
fn sanitize(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowError;

    #[test]
    fn terminal_frames() {
        assert_eq!(frame_data(&StreamEvent::Done("all".into())), "[DONE]");
        assert_eq!(
            frame_data(&StreamEvent::Error(FlowError::Cancelled)),
            "[ERROR] turn cancelled"
        );
    }

    #[test]
    fn only_terminal_frames_are_named() {
        assert_eq!(frame_name(&StreamEvent::Chunk("[DONE]".into())), None);
        assert_eq!(frame_name(&StreamEvent::Done(String::new())), Some("done"));
        assert_eq!(
            frame_name(&StreamEvent::Error(FlowError::Aborted)),
            Some("error")
        );
    }

    #[test]
    fn chunks_keep_text_but_not_carriage_returns() {
        assert_eq!(frame_data(&StreamEvent::Chunk(" a\r\nb\rc".into())), " a\nb\nc");
    }

    #[test]
    fn request_maps_to_input_with_identity() {
        let request: ChatRequest = serde_json::from_str(
            r#"{"chatInput":"hi","sessionId":"s1","fullName":"Lan","lat":10.5,"long":106.25}"#,
        )
        .unwrap();

        let input = request.into_input(CallerId("u1".into())).unwrap();

        assert_eq!(input.session_id, "s1");
        assert_eq!(input.message, "hi");
        assert_eq!(
            input.identity,
            Some(Identity {
                caller_id: "u1".into(),
                display_name: Some("Lan".into()),
                lat: Some(10.5),
                long: Some(106.25),
            })
        );
    }

    #[test]
    fn missing_fields_fail_validation() {
        let request: ChatRequest = serde_json::from_str(r#"{"sessionId":"s1"}"#).unwrap();
        assert_eq!(
            request.into_input(CallerId("u1".into())),
            Err(ValidationError::MissingMessage)
        );

        let request: ChatRequest = serde_json::from_str(r#"{"chatInput":"hi"}"#).unwrap();
        assert_eq!(
            request.into_input(CallerId("u1".into())),
            Err(ValidationError::MissingSessionId)
        );
    }
}
