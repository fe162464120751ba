use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::future::{poll_fn, ready};
use std::pin::Pin;
use std::task::{self, Poll};

use pr_pilot_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
    ModelTool, ToolCallRequest,
};
use serde_json::json;

#[derive(Debug)]
struct FakeError(ErrorKind);

impl Display for FakeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for FakeError {}

impl ModelProviderError for FakeError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

struct FakeResponse {
    events: VecDeque<ModelResponseEvent>,
}

impl ModelResponse for FakeResponse {
    type Error = FakeError;

    fn poll_next_event(
        mut self: Pin<&mut Self>,
        _cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        Poll::Ready(Ok(self.events.pop_front()))
    }
}

/// Asks for the first declared tool whenever tools are offered, answers
/// with plain text otherwise.
struct ToolHungryProvider;

impl ModelProvider for ToolHungryProvider {
    type Error = FakeError;
    type Response = FakeResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let result = 'blk: {
            if req.messages.is_empty() {
                break 'blk Err(FakeError(ErrorKind::Rejected));
            }

            let mut events = VecDeque::new();
            match req.tools.first() {
                Some(tool) => {
                    events.push_back(ModelResponseEvent::ToolCall(
                        ToolCallRequest {
                            id: "call_0".to_owned(),
                            name: tool.name.clone(),
                            arguments: ToolCallRequest::decode_arguments(
                                r#"{"prId":"abc"}"#,
                            ),
                        },
                    ));
                    events.push_back(ModelResponseEvent::Completed(
                        ModelFinishReason::ToolCalls,
                    ));
                }
                None => {
                    events.push_back(ModelResponseEvent::MessageDelta(
                        "Nothing to do.".to_owned(),
                    ));
                    events.push_back(ModelResponseEvent::Completed(
                        ModelFinishReason::Stop,
                    ));
                }
            }
            Ok(FakeResponse { events })
        };
        ready(result)
    }
}

async fn collect(mut resp: FakeResponse) -> Vec<ModelResponseEvent> {
    let mut events = vec![];
    while let Some(event) =
        poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx))
            .await
            .unwrap()
    {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_tool_call_round() {
    let provider = ToolHungryProvider;
    let req = ModelRequest {
        messages: vec![ModelMessage::User("Merge abc".to_owned())],
        tools: vec![ModelTool {
            name: "merge_pr".to_owned(),
            description: "Merge a pull request".to_owned(),
            parameters: json!({ "type": "object" }),
        }],
        ..Default::default()
    };
    let events = collect(provider.send_request(&req).await.unwrap()).await;
    assert_eq!(events.len(), 2);
    let ModelResponseEvent::ToolCall(call) = &events[0] else {
        panic!("expected a tool call, got {:?}", events[0]);
    };
    assert_eq!(call.name, "merge_pr");
    assert_eq!(call.arguments, json!({ "prId": "abc" }));
    assert_eq!(
        events[1],
        ModelResponseEvent::Completed(ModelFinishReason::ToolCalls)
    );
}

#[tokio::test]
async fn test_plain_answer() {
    let provider = ToolHungryProvider;
    let req = ModelRequest::with_user_message("Hello");
    let events = collect(provider.send_request(&req).await.unwrap()).await;
    assert_eq!(
        events,
        vec![
            ModelResponseEvent::MessageDelta("Nothing to do.".to_owned()),
            ModelResponseEvent::Completed(ModelFinishReason::Stop),
        ]
    );
}

#[tokio::test]
async fn test_error() {
    let provider = ToolHungryProvider;
    let result = provider.send_request(&ModelRequest::default()).await;
    let Err(err) = result else {
        panic!("expected an error");
    };
    assert_eq!(err.kind(), ErrorKind::Rejected);
}
