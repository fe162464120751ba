use std::collections::HashMap;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use pr_pilot_model::{ModelTool, ToolCallRequest, ToolCallResult};
use tracing::Instrument;

use crate::agent::BuildError;
use crate::tool::{Error, ToolObject};

/// An executor that handles tool call requests from the model.
pub struct Executor {
    tools: Vec<Box<dyn ToolObject>>,
    by_name: HashMap<String, usize>,
}

impl Executor {
    pub fn with_tools(
        tools: Vec<Box<dyn ToolObject>>,
    ) -> Result<Self, BuildError> {
        let mut by_name = HashMap::with_capacity(tools.len());
        for (idx, tool) in tools.iter().enumerate() {
            let name = tool.name();
            if by_name.insert(name.to_owned(), idx).is_some() {
                return Err(BuildError::DuplicateTool(name.to_owned()));
            }
        }
        Ok(Self { tools, by_name })
    }

    /// Returns the declarations in registration order.
    #[inline]
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools
            .iter()
            .map(|tool| ModelTool {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.parameter_schema().clone(),
            })
            .collect()
    }

    /// Starts a tool call. The returned future always resolves to a result
    /// for the call: failures are rendered as text for the model.
    pub fn dispatch(
        &self,
        req: ToolCallRequest,
        tool_timeout: Duration,
    ) -> BoxFuture<'static, ToolCallResult> {
        let ToolCallRequest {
            id,
            name,
            arguments,
        } = req;

        let Some(tool) = self.by_name.get(&name).map(|&idx| &self.tools[idx])
        else {
            warn!("tool not found: {name}");
            let content =
                format!("Error: function {name} not supported locally.");
            return std::future::ready(ToolCallResult { id, name, content })
                .boxed();
        };

        trace!("spawning a tool ({id}) with args: {arguments:?}");
        let fut = tool.execute(arguments);
        let span = debug_span!("tool execute", tool = %name, call_id = %id);
        async move {
            let result = match tokio::time::timeout(tool_timeout, fut).await {
                Ok(result) => result,
                Err(_) => Err(Error::timed_out(format!(
                    "timed out after {}s",
                    tool_timeout.as_secs_f32()
                ))),
            };
            let content = match result {
                Ok(body) => body,
                Err(err) => {
                    warn!("tool call failed: {err}");
                    format!("Error executing tool: {err}")
                }
            };
            ToolCallResult { id, name, content }
        }
        .instrument(span)
        .boxed()
    }
}
