use std::collections::HashMap;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::stream::{FuturesUnordered, StreamExt};
use pr_pilot_model::{ToolCallRequest, ToolCallResult};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use super::{Agent, AgentLimits, Completion, Error, Outcome, StopReason};
use crate::conversation::Conversation;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentStage {
    AwaitingModel,
    DispatchingTools(Vec<ToolCallRequest>),
    Done(String),
    Stopped(StopReason),
}

/// State owned by a single run.
pub struct RunState {
    conversation: Conversation,
    pub(super) iterations: usize,
    deadline: Instant,
    // Keyed by tool name and canonical argument text.
    call_counts: HashMap<(String, String), usize>,
}

impl RunState {
    pub fn new(conversation: Conversation, limits: &AgentLimits) -> Self {
        Self {
            conversation,
            iterations: 0,
            deadline: deadline_after(limits.timeout),
            call_counts: HashMap::new(),
        }
    }

    pub fn initial_stage(&self) -> AgentStage {
        match self.conversation.final_answer() {
            Some(answer) => AgentStage::Done(answer.to_owned()),
            None => AgentStage::AwaitingModel,
        }
    }

    pub fn finish(self, outcome: Outcome) -> Completion {
        Completion {
            outcome,
            conversation: self.conversation,
            iterations: self.iterations,
        }
    }

    fn check_bounds(
        &self,
        limits: &AgentLimits,
        cancel: &CancellationToken,
    ) -> Option<StopReason> {
        if cancel.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if Instant::now() >= self.deadline {
            Some(StopReason::DeadlineExceeded)
        } else if self.iterations >= limits.max_iterations {
            Some(StopReason::IterationLimit)
        } else {
            None
        }
    }

    pub async fn request_model(
        &mut self,
        agent: &Agent,
        cancel: &CancellationToken,
    ) -> Result<AgentStage, Error> {
        if let Some(reason) = self.check_bounds(&agent.limits, cancel) {
            return Ok(AgentStage::Stopped(reason));
        }

        let request = self
            .conversation
            .model_request(agent.definitions.to_vec())
            .map_err(Error::Conversation)?;
        self.iterations += 1;
        debug!(iteration = self.iterations, "requesting the model");

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(AgentStage::Stopped(StopReason::Cancelled));
            }
            _ = sleep_until(self.deadline) => {
                return Ok(AgentStage::Stopped(StopReason::DeadlineExceeded));
            }
            resp = agent.model_client.send_request(request) => {
                resp.map_err(Error::Model)?
            }
        };

        let msg = resp.into_assistant_message();
        let tool_calls = msg.tool_calls.clone();
        let answer = msg.content.clone().unwrap_or_default();
        self.conversation.push_assistant(msg);

        if tool_calls.is_empty() {
            return Ok(AgentStage::Done(answer));
        }
        debug!(count = tool_calls.len(), "model requested tools");
        Ok(AgentStage::DispatchingTools(tool_calls))
    }

    pub async fn dispatch_tools(
        &mut self,
        agent: &Agent,
        calls: Vec<ToolCallRequest>,
        cancel: &CancellationToken,
    ) -> Result<AgentStage, Error> {
        let limits = &agent.limits;
        let pending = calls
            .iter()
            .cloned()
            .map(|call| {
                let count = self.record_call(&call);
                if limits.max_identical_calls == 0
                    || count <= limits.max_identical_calls
                {
                    return agent
                        .tool_executor
                        .dispatch(call, limits.tool_timeout);
                }
                warn!(tool = %call.name, count, "refusing a repeated tool call");
                let content = format!(
                    "Error: call to {} with identical arguments was already \
                     made {} times; reuse the earlier result.",
                    call.name, limits.max_identical_calls
                );
                std::future::ready(ToolCallResult {
                    id: call.id,
                    name: call.name,
                    content,
                })
                .boxed()
            })
            .collect::<Vec<_>>();

        // Siblings run concurrently, results keep the request order.
        let mut slots: Vec<Option<ToolCallResult>> =
            calls.iter().map(|_| None).collect();
        let mut running = pending
            .into_iter()
            .enumerate()
            .map(|(idx, fut)| fut.map(move |result| (idx, result)))
            .collect::<FuturesUnordered<_>>();
        let stopped = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Some(StopReason::Cancelled),
                _ = sleep_until(self.deadline) => {
                    break Some(StopReason::DeadlineExceeded);
                }
                next = running.next() => next,
            };
            match next {
                Some((idx, result)) => slots[idx] = Some(result),
                None => break None,
            }
        };
        drop(running);

        // Every call gets an answer so the conversation can be resumed.
        for (slot, call) in slots.into_iter().zip(calls) {
            let result = slot.unwrap_or_else(|| ToolCallResult {
                content: interrupted_content(stopped),
                id: call.id,
                name: call.name,
            });
            self.conversation
                .push_tool_result(result)
                .map_err(Error::Conversation)?;
        }
        Ok(match stopped {
            Some(reason) => {
                debug!(%reason, "run stopped during tool dispatch");
                AgentStage::Stopped(reason)
            }
            None => AgentStage::AwaitingModel,
        })
    }

    fn record_call(&mut self, call: &ToolCallRequest) -> usize {
        let key = (call.name.clone(), call.arguments.to_string());
        let count = self.call_counts.entry(key).or_default();
        *count += 1;
        *count
    }
}

// Far enough ahead to never fire while still fitting in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

fn interrupted_content(stopped: Option<StopReason>) -> String {
    match stopped {
        Some(reason) => format!("Error: run stopped ({reason})."),
        None => "Error: run stopped.".to_owned(),
    }
}
