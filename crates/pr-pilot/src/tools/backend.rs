use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use reqwest::{Client, Method, StatusCode, header};

use super::catalog::ApiCall;

/// Errors talking to the PR backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend answered {}", .0.status)]
    Server(BackendResponse),
}

/// A response from the PR backend. The body is kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Backoff applied to idempotent requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(200),
            max_elapsed: Duration::from_secs(5),
        }
    }
}

/// HTTP client for the PR backend.
///
/// Cloning is cheap, clones share the connection pool.
#[derive(Clone, Debug)]
pub struct BackendClient {
    client: Client,
    base_url: Arc<str>,
    retry: RetryPolicy,
}

impl BackendClient {
    /// Creates a client for the backend at `base_url`. A trailing slash is
    /// ignored.
    pub fn new(
        base_url: &str,
        retry: RetryPolicy,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(BackendError::Client)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').into(),
            retry,
        })
    }

    /// Sends the call and returns the response whatever its status.
    ///
    /// GET requests are retried on transport errors and 5xx statuses. Other
    /// methods are sent once.
    pub async fn send(
        &self,
        call: &ApiCall,
    ) -> Result<BackendResponse, BackendError> {
        let url = format!("{}{}", self.base_url, call.path);
        if call.method != Method::GET {
            return self.send_once(&url, call).await;
        }

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry.initial_interval)
            .with_max_elapsed_time(Some(self.retry.max_elapsed))
            .build();
        let url = url.as_str();
        let result = backoff::future::retry_notify(
            policy,
            move || async move {
                match self.send_once(url, call).await {
                    Ok(resp) if resp.status.is_server_error() => {
                        Err(backoff::Error::transient(BackendError::Server(
                            resp,
                        )))
                    }
                    Ok(resp) => Ok(resp),
                    Err(err) => Err(backoff::Error::transient(err)),
                }
            },
            |err, delay: Duration| {
                warn!("retrying {url} in {delay:?}: {err}");
            },
        )
        .await;

        match result {
            // Out of retries, the last answer still goes to the model.
            Err(BackendError::Server(resp)) => Ok(resp),
            other => other,
        }
    }

    async fn send_once(
        &self,
        url: &str,
        call: &ApiCall,
    ) -> Result<BackendResponse, BackendError> {
        debug!(method = %call.method, %url, "calling the pr backend");
        let mut req = self
            .client
            .request(call.method.clone(), url)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(body) = &call.body {
            req = req.body(body.to_string());
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            warn!(%status, %url, "pr backend returned an error status");
        }
        Ok(BackendResponse { status, body })
    }
}
