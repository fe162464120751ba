//! Tools the model can call during an agent run.

mod error;
mod executor;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, ready};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use error::{Error, ErrorKind};
pub(crate) use executor::Executor;

/// The result of a tool call. The success value is handed to the model as
/// is.
pub type ToolResult = Result<String, Error>;

/// A capability offered to the model.
///
/// One instance serves every run of an agent, possibly at the same time, so
/// a tool keeps no per-call state. Anything a call needs beyond its input,
/// such as an HTTP client or a base URL, is set when the tool is created and
/// cloned into the returned future.
pub trait Tool: Send + Sync + 'static {
    /// The decoded arguments of a call.
    type Input: DeserializeOwned;

    /// Returns the name the model uses to call the tool.
    fn name(&self) -> &str;

    /// Returns the description shown to the model.
    fn description(&self) -> &str;

    /// Returns the JSON schema of the arguments.
    fn parameter_schema(&self) -> &Value;

    /// Executes a call.
    ///
    /// The returned future must not borrow `self`. It may be dropped before
    /// completion when the run is cancelled or the call times out.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static;
}

/// Object-safe form of [`Tool`], taking raw JSON arguments.
pub(crate) trait ToolObject: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameter_schema(&self) -> &Value;

    fn execute(&self, arguments: Value) -> BoxFuture<'static, ToolResult>;
}

pub(crate) struct AnyTool<T: Tool>(pub T);

impl<T: Tool> ToolObject for AnyTool<T> {
    #[inline]
    fn name(&self) -> &str {
        self.0.name()
    }

    #[inline]
    fn description(&self) -> &str {
        self.0.description()
    }

    #[inline]
    fn parameter_schema(&self) -> &Value {
        self.0.parameter_schema()
    }

    fn execute(&self, arguments: Value) -> BoxFuture<'static, ToolResult> {
        match decode_input::<T::Input>(arguments) {
            Ok(input) => self.0.execute(input).boxed(),
            Err(err) => ready(Err(err)).boxed(),
        }
    }
}

fn decode_input<I: DeserializeOwned>(arguments: Value) -> Result<I, Error> {
    // Providers keep undecodable argument text as a plain string.
    if let Value::String(raw) = &arguments {
        return Err(Error::invalid_input(format!(
            "arguments are not valid JSON: {raw}"
        )));
    }
    serde_json::from_value(arguments).map_err(|err| {
        Error::invalid_input(format!("invalid arguments: {err}"))
    })
}
