use pr_pilot_core::{
    Agent, AgentBuilder, AgentLimits, BuildError, Completion, Conversation,
    Error as AgentError, ModelClient,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::tools::{BackendClient, PrApiTool, PrTool};

const SYSTEM_PROMPT: &str = include_str!("./system_prompt.md");

/// The registered tools do not match the PR catalog.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("tool {0} is not registered")]
    MissingTool(&'static str),
    #[error("tool {0} does not take an object")]
    InvalidSchema(String),
}

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    backend: BackendClient,
}

impl SessionBuilder {
    /// Creates a session builder that shares a model client and talks to
    /// the given PR backend.
    pub fn with_model_client(
        model_client: ModelClient,
        backend: BackendClient,
    ) -> Self {
        let agent_builder = AgentBuilder::with_model_client(model_client);
        Self {
            agent_builder,
            backend,
        }
    }

    /// Sets the bounds of each run.
    #[inline]
    pub fn with_limits(mut self, limits: AgentLimits) -> Self {
        self.agent_builder = self.agent_builder.with_limits(limits);
        self
    }

    /// Registers the PR tools and checks the result against the catalog.
    pub fn build(self) -> Result<Session, SessionError> {
        let agent = PrApiTool::all(&self.backend)
            .into_iter()
            .fold(self.agent_builder, |builder, tool| builder.with_tool(tool))
            .build()?;
        validate_tools(&agent)?;
        Ok(Session { agent })
    }
}

/// The PR management agent behind the `agent` endpoint.
///
/// Each call to [`Session::ask`] starts a fresh conversation, the session
/// keeps nothing between calls.
#[derive(Clone)]
pub struct Session {
    agent: Agent,
}

impl Session {
    /// Runs the agent on a user query.
    ///
    /// `context` is embedded in the system prompt as JSON, an absent context
    /// renders as `{}`.
    pub async fn ask(
        &self,
        query: &str,
        context: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Completion, AgentError> {
        let mut conversation =
            Conversation::with_system_prompt(system_prompt(context));
        conversation.push_user(query);
        self.agent.run(conversation, cancel).await
    }
}

fn system_prompt(context: Option<&Value>) -> String {
    let context = match context {
        Some(context) => context.to_string(),
        None => "{}".to_owned(),
    };
    SYSTEM_PROMPT.trim_end().replace("{{CONTEXT}}", &context)
}

fn validate_tools(agent: &Agent) -> Result<(), SessionError> {
    let definitions = agent.tool_definitions();
    for tool in PrTool::ALL {
        if !definitions.iter().any(|def| def.name == tool.name()) {
            return Err(SessionError::MissingTool(tool.name()));
        }
    }
    for def in definitions {
        if def.parameters.get("type").and_then(Value::as_str) != Some("object")
        {
            return Err(SessionError::InvalidSchema(def.name.clone()));
        }
    }
    debug!(tools = definitions.len(), "pr tools registered");
    Ok(())
}
