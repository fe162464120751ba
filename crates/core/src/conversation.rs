//! Conversation-related types.

use std::fmt::{self, Display};

use pr_pilot_model::{
    AssistantMessage, ModelMessage, ModelRequest, ModelTool, ToolCallResult,
    ToolChoice,
};

/// Describes a misuse of the conversation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The model was asked to continue while some tool calls have no result
    /// yet. Carries the ids of those calls.
    UnansweredToolCalls(Vec<String>),
    /// A tool result refers to a call that is not waiting for one.
    UnexpectedToolResult(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnansweredToolCalls(ids) => {
                write!(f, "tool calls without results: {}", ids.join(", "))
            }
            Error::UnexpectedToolResult(id) => {
                write!(f, "no pending tool call with id {id}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Represents a conversation.
///
/// Messages are append-only. The conversation tracks tool calls requested
/// by the assistant and refuses to build a model request until each of them
/// has exactly one result.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<ModelMessage>,
    pending_calls: Vec<String>,
}

impl Conversation {
    /// Creates a conversation starting with the given system prompt.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(prompt: S) -> Self {
        Self {
            messages: vec![ModelMessage::System(prompt.into())],
            pending_calls: vec![],
        }
    }

    /// Appends a user message.
    #[inline]
    pub fn push_user<S: Into<String>>(&mut self, content: S) {
        self.messages.push(ModelMessage::User(content.into()));
    }

    /// Appends an assistant message. Its tool calls become pending.
    pub fn push_assistant(&mut self, msg: AssistantMessage) {
        self.pending_calls
            .extend(msg.tool_calls.iter().map(|call| call.id.clone()));
        self.messages.push(ModelMessage::Assistant(msg));
    }

    /// Appends the result of a pending tool call.
    pub fn push_tool_result(
        &mut self,
        result: ToolCallResult,
    ) -> Result<(), Error> {
        let Some(idx) = self.pending_calls.iter().position(|id| {
            *id == result.id
        }) else {
            return Err(Error::UnexpectedToolResult(result.id));
        };
        self.pending_calls.remove(idx);
        self.messages.push(ModelMessage::Tool(result));
        Ok(())
    }

    /// Returns the messages in order.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    /// Returns the answer text if the conversation ends with an assistant
    /// message that requests no tools.
    pub fn final_answer(&self) -> Option<&str> {
        match self.messages.last()? {
            ModelMessage::Assistant(msg) if msg.tool_calls.is_empty() => {
                Some(msg.content.as_deref().unwrap_or_default())
            }
            _ => None,
        }
    }

    /// Builds the next model request, offering the given tools.
    pub fn model_request(
        &self,
        tools: Vec<ModelTool>,
    ) -> Result<ModelRequest, Error> {
        if !self.pending_calls.is_empty() {
            return Err(Error::UnansweredToolCalls(self.pending_calls.clone()));
        }
        let tool_choice = (!tools.is_empty()).then_some(ToolChoice::Auto);
        Ok(ModelRequest {
            messages: self.messages.clone(),
            tools,
            tool_choice,
            response_format: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use pr_pilot_model::ToolCallRequest;
    use serde_json::json;

    use super::*;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_owned(),
            name: "get_pr_details".to_owned(),
            arguments: json!({ "prId": "1" }),
        }
    }

    fn result(id: &str) -> ToolCallResult {
        ToolCallResult {
            id: id.to_owned(),
            name: "get_pr_details".to_owned(),
            content: "{}".to_owned(),
        }
    }

    #[test]
    fn test_pending_calls_block_requests() {
        let mut conversation = Conversation::with_system_prompt("system");
        conversation.push_user("Show PR 1");
        conversation.push_assistant(AssistantMessage {
            content: None,
            tool_calls: vec![call("a"), call("b")],
        });

        assert_eq!(
            conversation.model_request(vec![]),
            Err(Error::UnansweredToolCalls(vec![
                "a".to_owned(),
                "b".to_owned()
            ]))
        );

        conversation.push_tool_result(result("b")).unwrap();
        assert_eq!(
            conversation.push_tool_result(result("b")),
            Err(Error::UnexpectedToolResult("b".to_owned()))
        );
        conversation.push_tool_result(result("a")).unwrap();

        let request = conversation.model_request(vec![]).unwrap();
        assert_eq!(request.messages.len(), 5);
        assert_eq!(request.tool_choice, None);
        assert_eq!(conversation.final_answer(), None);
    }

    #[test]
    fn test_final_answer() {
        let mut conversation = Conversation::default();
        conversation.push_user("Hi");
        assert_eq!(conversation.final_answer(), None);

        conversation.push_assistant(AssistantMessage::text("Hello!"));
        assert_eq!(conversation.final_answer(), Some("Hello!"));

        conversation.push_assistant(AssistantMessage::default());
        assert_eq!(conversation.final_answer(), Some(""));
    }
}
