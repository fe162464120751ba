//! Tools that let the model operate on pull requests through the PR backend.

mod backend;
mod catalog;

use pr_pilot_core::tool::{Error as ToolError, Tool, ToolResult};
use serde_json::Value;

pub use backend::{BackendClient, BackendError, BackendResponse, RetryPolicy};
pub use catalog::{ApiCall, PrTool};

/// A catalog entry bound to a backend client.
pub struct PrApiTool {
    tool: PrTool,
    parameter_schema: Value,
    backend: BackendClient,
}

impl PrApiTool {
    /// Creates the tool for a catalog entry.
    pub fn new(tool: PrTool, backend: BackendClient) -> Self {
        Self {
            tool,
            parameter_schema: tool.parameter_schema(),
            backend,
        }
    }

    /// Creates every tool of the catalog.
    pub fn all(backend: &BackendClient) -> Vec<Self> {
        PrTool::ALL
            .into_iter()
            .map(|tool| Self::new(tool, backend.clone()))
            .collect()
    }
}

impl Tool for PrApiTool {
    type Input = Value;

    fn name(&self) -> &str {
        self.tool.name()
    }

    fn description(&self) -> &str {
        self.tool.description()
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: Value,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let call = self.tool.resolve(input);
        let backend = self.backend.clone();
        async move {
            let call = call.map_err(|err| {
                ToolError::invalid_input(format!("invalid arguments: {err}"))
            })?;
            let resp = backend.send(&call).await.map_err(|err| {
                ToolError::execution_error(err.to_string())
            })?;
            Ok(resp.body)
        }
    }
}
