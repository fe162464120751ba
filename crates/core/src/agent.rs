mod builder;
mod state;

use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use pr_pilot_model::{ModelProviderError, ModelTool};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::conversation::{self, Conversation};
use crate::model_client::ModelClient;
use crate::tool::Executor as ToolExecutor;
pub use builder::AgentBuilder;
use state::{AgentStage, RunState};

/// Bounds applied to every agent run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AgentLimits {
    /// Maximum number of model requests in one run.
    pub max_iterations: usize,
    /// Wall-clock budget for one run.
    pub timeout: Duration,
    /// Budget for a single tool call.
    pub tool_timeout: Duration,
    /// How many times the same tool may be called with the same arguments
    /// in one run. `0` disables the check.
    pub max_identical_calls: usize,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_iterations: 16,
            timeout: Duration::from_secs(180),
            tool_timeout: Duration::from_secs(30),
            max_identical_calls: 3,
        }
    }
}

/// Why a run stopped without an answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// The model kept requesting tools until the iteration cap.
    IterationLimit,
    /// The run exceeded its wall-clock budget.
    DeadlineExceeded,
    /// The run was cancelled from outside.
    Cancelled,
}

impl StopReason {
    /// Returns a stable identifier for the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::IterationLimit => "iteration_limit",
            StopReason::DeadlineExceeded => "deadline_exceeded",
            StopReason::Cancelled => "cancelled",
        }
    }
}

impl Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The model answered without requesting tools.
    Answer(String),
    /// The run hit one of its bounds first.
    Inconclusive(StopReason),
}

/// The result of a finished run.
#[derive(Clone, Debug)]
pub struct Completion {
    /// How the run ended.
    pub outcome: Outcome,
    /// The conversation including every message added by the run.
    pub conversation: Conversation,
    /// Number of model requests made.
    pub iterations: usize,
}

/// An error that aborts a run.
#[derive(Debug)]
pub enum Error {
    /// The model provider failed.
    Model(Box<dyn ModelProviderError>),
    /// The conversation was not in a state to continue.
    Conversation(conversation::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Model(err) => write!(f, "model request failed: {err}"),
            Error::Conversation(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Model(err) => Some(err.as_ref()),
            Error::Conversation(err) => Some(err),
        }
    }
}

/// An error found while building an [`Agent`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BuildError {
    /// Two tools share a name.
    DuplicateTool(String),
}

impl Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::DuplicateTool(name) => {
                write!(f, "tool {name} is registered more than once")
            }
        }
    }
}

impl std::error::Error for BuildError {}

/// An agent that answers a conversation by alternating between the model
/// and the registered tools.
///
/// The agent itself holds no per-run state. Each call to [`Agent::run`]
/// owns its conversation, so one agent can serve many runs at once.
#[derive(Clone)]
pub struct Agent {
    model_client: ModelClient,
    tool_executor: Arc<ToolExecutor>,
    definitions: Arc<[ModelTool]>,
    limits: AgentLimits,
}

impl Agent {
    fn from_builder(builder: AgentBuilder) -> Result<Self, BuildError> {
        let AgentBuilder {
            model_client,
            tools,
            limits,
        } = builder;

        let tool_executor = ToolExecutor::with_tools(tools)?;
        let definitions = tool_executor.definitions().into();
        Ok(Self {
            model_client,
            tool_executor: Arc::new(tool_executor),
            definitions,
            limits,
        })
    }

    /// Returns the declarations of the registered tools, in registration
    /// order.
    #[inline]
    pub fn tool_definitions(&self) -> &[ModelTool] {
        &self.definitions
    }

    /// Runs the loop until the model answers or a bound is hit.
    ///
    /// If the conversation already ends with an assistant answer, that
    /// answer is returned without contacting the model. Tool failures never
    /// abort the run, they are reported back to the model as results. A
    /// stopped run leaves every tool call answered, so the returned
    /// conversation can be run again.
    pub async fn run(
        &self,
        conversation: Conversation,
        cancel: &CancellationToken,
    ) -> Result<Completion, Error> {
        let mut run = RunState::new(conversation, &self.limits);
        let mut stage = run.initial_stage();

        async move {
            loop {
                stage = match stage {
                    AgentStage::AwaitingModel => {
                        run.request_model(self, cancel).await?
                    }
                    AgentStage::DispatchingTools(calls) => {
                        run.dispatch_tools(self, calls, cancel).await?
                    }
                    AgentStage::Done(answer) => {
                        info!(iterations = run.iterations, "agent answered");
                        return Ok(run.finish(Outcome::Answer(answer)));
                    }
                    AgentStage::Stopped(reason) => {
                        warn!(
                            iterations = run.iterations,
                            %reason,
                            "agent run stopped without an answer"
                        );
                        return Ok(run.finish(Outcome::Inconclusive(reason)));
                    }
                };
            }
        }
        .instrument(info_span!("agent run"))
        .await
    }
}
