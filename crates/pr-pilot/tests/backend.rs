use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use pr_pilot::session::SessionBuilder;
use pr_pilot::tools::{BackendClient, PrTool, RetryPolicy};
use pr_pilot_core::{ModelClient, Outcome};
use pr_pilot_model::ModelMessage;
use pr_pilot_test_model::{PresetEvent, PresetResponse, TestModelProvider};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq, Eq)]
struct Recorded {
    method: Method,
    path: String,
    body: String,
}

/// A PR backend that records requests and fails the first `failures` ones
/// with a 500.
#[derive(Clone, Default)]
struct FakeBackend {
    log: Arc<Mutex<Vec<Recorded>>>,
    failures: Arc<AtomicUsize>,
}

impl FakeBackend {
    fn failing(failures: usize) -> Self {
        let backend = Self::default();
        backend.failures.store(failures, Ordering::SeqCst);
        backend
    }

    fn requests(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }
}

async fn handle(
    State(backend): State<FakeBackend>,
    method: Method,
    uri: Uri,
    body: String,
) -> (StatusCode, String) {
    let path = uri.path().to_owned();
    backend.log.lock().unwrap().push(Recorded {
        method,
        path: path.clone(),
        body,
    });

    let failed = backend
        .failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failed {
        return (StatusCode::INTERNAL_SERVER_ERROR, "backend down".to_owned());
    }
    (StatusCode::OK, json!({ "ok": true, "path": path }).to_string())
}

async fn serve(backend: FakeBackend) -> BackendClient {
    let app = Router::new().fallback(handle).with_state(backend);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let retry = RetryPolicy {
        initial_interval: Duration::from_millis(10),
        max_elapsed: Duration::from_secs(2),
    };
    BackendClient::new(&format!("http://{addr}/"), retry).unwrap()
}

#[tokio::test]
async fn test_agent_acts_on_the_backend() {
    let fake = FakeBackend::default();
    let client = serve(fake.clone()).await;

    let provider = TestModelProvider::with_script([
        PresetResponse::with_events([
            PresetEvent::tool_call("a", "merge_pr", json!({ "prId": "abc" })),
            PresetEvent::tool_call(
                "b",
                "track_repo",
                json!({ "owner": "o", "name": "n" }),
            ),
        ]),
        PresetResponse::text("Merged abc and started tracking o/n."),
    ]);
    let session = SessionBuilder::with_model_client(
        ModelClient::new(provider.clone()),
        client,
    )
    .build()
    .unwrap();

    let completion = session
        .ask("Merge abc and track o/n", None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        completion.outcome,
        Outcome::Answer("Merged abc and started tracking o/n.".to_owned())
    );

    let mut requests = fake.requests();
    requests.sort_by(|a, b| a.path.cmp(&b.path));
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0],
        Recorded {
            method: Method::POST,
            path: "/api/prs/abc/merge".to_owned(),
            body: String::new(),
        }
    );
    assert_eq!(requests[1].method, Method::POST);
    assert_eq!(requests[1].path, "/api/repos/track");
    let body: serde_json::Value =
        serde_json::from_str(&requests[1].body).unwrap();
    assert_eq!(body, json!({ "owner": "o", "name": "n" }));

    // Backend bodies reach the model verbatim, in call order.
    let requests = provider.requests();
    let results: Vec<_> = requests[1]
        .messages
        .iter()
        .filter_map(|msg| match msg {
            ModelMessage::Tool(result) => Some(result.content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        results,
        [
            r#"{"ok":true,"path":"/api/prs/abc/merge"}"#,
            r#"{"ok":true,"path":"/api/repos/track"}"#,
        ]
    );
}

#[tokio::test]
async fn test_get_is_retried() {
    let fake = FakeBackend::failing(2);
    let client = serve(fake.clone()).await;

    let call = PrTool::GetPrDiff.resolve(json!({ "prId": 7 })).unwrap();
    let resp = client.send(&call).await.unwrap();
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(fake.requests().len(), 3);
    assert!(
        fake.requests()
            .iter()
            .all(|req| req.path == "/api/prs/7/diff")
    );
}

#[tokio::test]
async fn test_post_is_not_retried() {
    let fake = FakeBackend::failing(1);
    let client = serve(fake.clone()).await;

    let call = PrTool::SyncRepo.resolve(json!({ "repoId": "r1" })).unwrap();
    let resp = client.send(&call).await.unwrap();
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.body, "backend down");
    assert_eq!(fake.requests().len(), 1);
}

#[tokio::test]
async fn test_unreachable_backend() {
    let retry = RetryPolicy {
        initial_interval: Duration::from_millis(10),
        max_elapsed: Duration::from_millis(50),
    };
    let client = BackendClient::new("http://127.0.0.1:9", retry).unwrap();
    let call = PrTool::ListTrackedRepos.resolve(json!({})).unwrap();
    assert!(client.send(&call).await.is_err());
}

#[tokio::test]
async fn test_unreachable_backend_reaches_the_model() {
    let retry = RetryPolicy {
        initial_interval: Duration::from_millis(10),
        max_elapsed: Duration::from_millis(50),
    };
    let client = BackendClient::new("http://127.0.0.1:9", retry).unwrap();
    let provider = TestModelProvider::with_script([
        PresetResponse::with_events([PresetEvent::tool_call(
            "a",
            "get_pr_details",
            json!({ "prId": "1" }),
        )]),
        PresetResponse::text("The PR backend is not reachable right now."),
    ]);
    let session = SessionBuilder::with_model_client(
        ModelClient::new(provider.clone()),
        client,
    )
    .build()
    .unwrap();

    let completion = session
        .ask("Show PR 1", None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        completion.outcome,
        Outcome::Answer("The PR backend is not reachable right now.".to_owned())
    );
    assert_eq!(provider.request_count(), 2);

    let requests = provider.requests();
    let results: Vec<_> = requests[1]
        .messages
        .iter()
        .filter_map(|msg| match msg {
            ModelMessage::Tool(result) => Some((&result.id, &result.content)),
            _ => None,
        })
        .collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "a");
    assert!(
        results[0].1.starts_with("Error executing tool: "),
        "{}",
        results[0].1
    );
}
