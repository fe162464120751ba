use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_util::future::BoxFuture;
use pin_project_lite::pin_project;
use pr_pilot_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    ToolCallRequest,
};

use crate::Error;
use crate::io::Sse;
use crate::proto::{ChatCompletionChunk, ToolCall};

struct PartialState {
    sse: Sse,
    id: Option<String>,
    // Tool calls arrive in fragments (name first, arguments piece by piece),
    // so they are only emitted after the stream ends.
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<ModelFinishReason>,
    ready_tool_calls: Option<VecDeque<ToolCallRequest>>,
    completed: bool,
}

type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_event_fut: Option<BoxFuture<'static, NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            tool_calls: Default::default(),
            finish_reason: None,
            ready_tool_calls: None,
            completed: false,
        };
        Self {
            next_event_fut: Some(Box::pin(next_event(partial_state))),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let polled = ready!(next_event_fut.as_mut().poll(cx));
        let (event, partial_state) = match polled {
            Ok((Some(event), partial_state)) => (event, partial_state),
            Ok((None, _)) => {
                *this.next_event_fut = None;
                return Poll::Ready(Ok(None));
            }
            Err(err) => {
                *this.next_event_fut = None;
                return Poll::Ready(Err(err));
            }
        };

        *this.next_event_fut = Some(Box::pin(next_event(partial_state)));
        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(mut partial_state: PartialState) -> NextEvent {
    loop {
        // The order of events matters: message deltas while streaming, then
        // the assembled tool calls, and finally the finish reason.
        if let Some(ready_tool_calls) = &mut partial_state.ready_tool_calls {
            if let Some(tool_call) = ready_tool_calls.pop_front() {
                let event = ModelResponseEvent::ToolCall(tool_call);
                return Ok((Some(event), partial_state));
            }
            if partial_state.completed {
                return Ok((None, partial_state));
            }
            partial_state.completed = true;
            let reason = partial_state.finish_reason.unwrap_or(
                if partial_state.tool_calls.is_empty() {
                    ModelFinishReason::Stop
                } else {
                    ModelFinishReason::ToolCalls
                },
            );
            let event = ModelResponseEvent::Completed(reason);
            return Ok((Some(event), partial_state));
        }

        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) if event != "[DONE]" => event,
            Ok(_) => {
                partial_state.end_stream();
                continue;
            }
            Err(err) => {
                return Err(Error::new(
                    format!("failed to read the event stream: {err}"),
                    ErrorKind::Transport,
                ));
            }
        };
        trace!("got sse event: {sse_event}");

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| {
                Error::new(
                    format!("malformed completion chunk: {err}"),
                    ErrorKind::InvalidResponse,
                )
            })?;
        if partial_state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id
        {
            return Err(Error::new(
                "chunk id mismatch",
                ErrorKind::InvalidResponse,
            ));
        }

        // Chunks carrying only usage statistics have no choices.
        let Some(choice) = chunk.choices.into_iter().next() else {
            continue;
        };

        for tool_call in choice.delta.tool_calls.into_iter().flatten() {
            merge_tool_call(&mut partial_state.tool_calls, tool_call);
        }
        if let Some(finish_reason) = choice.finish_reason {
            partial_state.finish_reason = Some(match finish_reason.as_str() {
                "tool_calls" => ModelFinishReason::ToolCalls,
                "length" | "model_length" => ModelFinishReason::Length,
                _ => ModelFinishReason::Stop,
            });
        }
        match choice.delta.content {
            Some(content) if !content.is_empty() => {
                let event = ModelResponseEvent::MessageDelta(content);
                return Ok((Some(event), partial_state));
            }
            _ => {}
        }
    }
}

impl PartialState {
    fn end_stream(&mut self) {
        let ready = self
            .tool_calls
            .iter()
            .map(|tool_call| {
                let function = tool_call.function.as_ref();
                ToolCallRequest {
                    id: tool_call.id.clone().unwrap_or_default(),
                    name: function
                        .and_then(|f| f.name.clone())
                        .unwrap_or_default(),
                    arguments: ToolCallRequest::decode_arguments(
                        function
                            .and_then(|f| f.arguments.as_deref())
                            .unwrap_or_default(),
                    ),
                }
            })
            .collect();
        self.ready_tool_calls = Some(ready);
    }
}

/// Patches a streamed tool call fragment into the calls seen so far.
fn merge_tool_call(tool_calls: &mut Vec<ToolCall>, fragment: ToolCall) {
    let existing = tool_calls.iter_mut().find(|t| match fragment.index {
        Some(index) => t.index == Some(index),
        // Providers that omit the index send every call whole.
        None => false,
    });
    let Some(partial) = existing else {
        tool_calls.push(fragment);
        return;
    };

    if let Some(id) = fragment.id {
        partial.id.get_or_insert_default().push_str(&id);
    }
    if let Some(ty) = fragment.r#type {
        partial.r#type = Some(ty);
    }
    let Some(function) = fragment.function else {
        return;
    };
    match &mut partial.function {
        Some(partial_func) => {
            if let Some(name) = function.name {
                partial_func.name.get_or_insert_default().push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                partial_func
                    .arguments
                    .get_or_insert_default()
                    .push_str(&arguments);
            }
        }
        None => partial.function = Some(function),
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::io::Chunks;

    async fn collect(
        chunks: Vec<Bytes>,
    ) -> Result<Vec<ModelResponseEvent>, Error> {
        let sse = Sse::new(Chunks::from_vec_deque(chunks.into()));
        let mut resp = pin!(OpenAIResponse::from_sse(sse));
        let mut events = vec![];
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await?
        {
            events.push(event);
        }
        Ok(events)
    }

    #[tokio::test]
    async fn test_streamed_tool_calls() {
        let events = collect(vec![Bytes::from_static(include_bytes!(
            "../fixtures/test_response.txt"
        ))])
        .await
        .unwrap();

        assert_eq!(
            events,
            vec![
                ModelResponseEvent::MessageDelta("Let me ".to_owned()),
                ModelResponseEvent::MessageDelta("check.".to_owned()),
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call_a".to_owned(),
                    name: "get_pr_details".to_owned(),
                    arguments: json!({ "prId": "42" }),
                }),
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call_b".to_owned(),
                    name: "check_conflicts".to_owned(),
                    arguments: json!({ "prId": "42" }),
                }),
                ModelResponseEvent::Completed(ModelFinishReason::ToolCalls),
            ]
        );
    }

    #[tokio::test]
    async fn test_finish_chunk_carries_whole_calls() {
        // Mistral sends complete calls together with the finish reason.
        let body = concat!(
            "data: {\"id\":\"m1\",\"choices\":[{\"delta\":{\"content\":\"\",\"tool_calls\":[",
            "{\"id\":\"abc123\",\"function\":{\"name\":\"merge_pr\",\"arguments\":\"{\\\"prId\\\": \\\"7\\\"}\"}},",
            "{\"id\":\"def456\",\"function\":{\"name\":\"close_pr\",\"arguments\":\"{\\\"prId\\\": \\\"8\\\"}\"}}",
            "]},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let events = collect(vec![Bytes::from_static(body.as_bytes())])
            .await
            .unwrap();
        let names = events
            .iter()
            .filter_map(|event| match event {
                ModelResponseEvent::ToolCall(call) => Some(call.name.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(names, ["merge_pr", "close_pr"]);
        assert_eq!(
            events.last(),
            Some(&ModelResponseEvent::Completed(ModelFinishReason::ToolCalls))
        );
    }

    #[tokio::test]
    async fn test_plain_text_and_bad_arguments() {
        let body = concat!(
            "data: {\"id\":\"x\",\"choices\":[{\"delta\":{\"content\":\"{\\\"riskLevel\\\":\"}}]}\n\n",
            "data: {\"id\":\"x\",\"choices\":[{\"delta\":{\"content\":\"\\\"low\\\"}\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"id\":\"x\",\"choices\":[],\"usage\":{\"total_tokens\":12}}\n\n",
        );
        let events = collect(vec![Bytes::from_static(body.as_bytes())])
            .await
            .unwrap();
        assert_eq!(
            events,
            vec![
                ModelResponseEvent::MessageDelta("{\"riskLevel\":".to_owned()),
                ModelResponseEvent::MessageDelta("\"low\"}".to_owned()),
                ModelResponseEvent::Completed(ModelFinishReason::Stop),
            ]
        );

        let body = "data: {\"id\":\"y\",\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c\",\"function\":{\"name\":\"merge_pr\",\"arguments\":\"{oops\"}}]}}]}\n\n";
        let events = collect(vec![Bytes::from_static(body.as_bytes())])
            .await
            .unwrap();
        let ModelResponseEvent::ToolCall(call) = &events[0] else {
            panic!("expected a tool call, got {:?}", events[0]);
        };
        assert_eq!(call.arguments, json!("{oops"));
    }

    #[tokio::test]
    async fn test_malformed_chunk() {
        let err = collect(vec![Bytes::from_static(b"data: {nope\n\n")])
            .await
            .unwrap_err();
        assert_eq!(
            pr_pilot_model::ModelProviderError::kind(&err),
            ErrorKind::InvalidResponse
        );
    }
}
