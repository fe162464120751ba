use std::error::Error;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// An error raised by a provider or while reading one of its responses.
///
/// Callers decide how to react from [`ModelProviderError::kind`], the
/// concrete type is usually erased behind a `Box`.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Classifies the failure.
    fn kind(&self) -> ErrorKind;
}

/// A hosted chat model.
///
/// A provider is shared by every request the service handles, so it must be
/// safe to use from many tasks at once. Connection pools and other internal
/// state are allowed as long as requests do not observe each other.
pub trait ModelProvider: Send + Sync {
    /// The error type for failed requests.
    type Error: ModelProviderError;

    /// The streamed response of a successful request.
    type Response: ModelResponse<Error = Self::Error>;

    /// Starts a completion for `req`.
    ///
    /// The future resolves once the model starts answering, the answer
    /// itself is read from the response. It must not borrow `self` or
    /// `req`.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}
