use std::future::poll_fn;
use std::pin::pin;

use axum::Router;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::post;
use pr_pilot_model::{
    ErrorKind, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent,
};
use pr_pilot_openai_model::{OpenAIConfigBuilder, OpenAIProvider};

const STREAM_BODY: &str = concat!(
    "data: {\"id\":\"r1\",\"choices\":[{\"delta\":{\"content\":\"Looks good\"}}]}\n\n",
    "data: {\"id\":\"r1\",\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1")
}

fn provider(base_url: String) -> OpenAIProvider {
    let config = OpenAIConfigBuilder::with_api_key("test-key")
        .with_base_url(base_url)
        .build();
    OpenAIProvider::new(config).unwrap()
}

#[tokio::test]
async fn test_streamed_completion() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|headers: HeaderMap| async move {
            let auth = headers.get(header::AUTHORIZATION).unwrap();
            assert_eq!(auth, "Bearer test-key");
            ([(header::CONTENT_TYPE, "text/event-stream")], STREAM_BODY)
        }),
    );
    let provider = provider(serve(app).await);

    let resp = provider
        .send_request(&ModelRequest::with_user_message("Review this"))
        .await
        .unwrap();
    let mut resp = pin!(resp);
    let mut text = String::new();
    while let Some(event) = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
        .await
        .unwrap()
    {
        if let ModelResponseEvent::MessageDelta(delta) = event {
            text.push_str(&delta);
        }
    }
    assert_eq!(text, "Looks good");
}

#[tokio::test]
async fn test_error_statuses() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (StatusCode::UNAUTHORIZED, r#"{"message":"Unauthorized"}"#)
                .into_response()
        }),
    );
    let provider = provider(serve(app).await);
    let err = provider
        .send_request(&ModelRequest::with_user_message("hi"))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Rejected);
    assert!(err.message().contains("Unauthorized"));

    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async { StatusCode::TOO_MANY_REQUESTS }),
    );
    let provider = self::provider(serve(app).await);
    let err = provider
        .send_request(&ModelRequest::with_user_message("hi"))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
}

#[tokio::test]
async fn test_unexpected_content_type() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async { "plain text" }),
    );
    let provider = provider(serve(app).await);
    let err = provider
        .send_request(&ModelRequest::with_user_message("hi"))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidResponse);
}

#[tokio::test]
async fn test_unreachable_api() {
    // Nothing listens on the discard port.
    let provider = provider("http://127.0.0.1:9/v1".to_owned());
    let err = provider
        .send_request(&ModelRequest::with_user_message("hi"))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Transport);
}
