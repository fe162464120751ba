//! Single-shot model calls over a pull request diff.

use std::time::Duration;

use pr_pilot_core::ModelClient;
use pr_pilot_model::{ModelProviderError, ModelRequest, ResponseFormat};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const RISK_FALLBACK_REASON: &str = "Failed to parse risk assessment from AI.";
const SECURITY_FALLBACK_FLAG: &str =
    "Failed to parse security assessment from AI.";

/// A model call that produced no text.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("model request failed: {0}")]
    Model(Box<dyn ModelProviderError>),
    #[error("model did not answer within {0:?}")]
    TimedOut(Duration),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Risk classification of a diff, serialized as
/// `{"riskLevel": ..., "reason": ...}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    #[serde(rename = "riskLevel")]
    pub risk_level: RiskLevel,
    /// One sentence from the model, or the fallback text.
    pub reason: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityStatus {
    Clean,
    Flagged,
}

/// Result of the security scan. `flags` is empty when the diff is clean.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAssessment {
    pub status: SecurityStatus,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// Model output that was asked to follow a JSON schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StructuredOutput<T> {
    Parsed(T),
    Malformed { raw: String, error: String },
}

impl<T: DeserializeOwned> StructuredOutput<T> {
    pub fn decode(raw: &str) -> Self {
        match serde_json::from_str(raw.trim()) {
            Ok(value) => Self::Parsed(value),
            Err(err) => Self::Malformed {
                raw: raw.to_owned(),
                error: err.to_string(),
            },
        }
    }
}

impl<T> StructuredOutput<T> {
    /// Returns the parsed value, or the fallback for malformed output.
    pub fn unwrap_or_else<F>(self, fallback: F) -> T
    where
        F: FnOnce(&str, &str) -> T,
    {
        match self {
            Self::Parsed(value) => value,
            Self::Malformed { raw, error } => fallback(&raw, &error),
        }
    }
}

/// Runs the chat, review and assessment calls against the model.
#[derive(Clone)]
pub struct Analyst {
    model_client: ModelClient,
    timeout: Duration,
}

impl Analyst {
    /// Creates an analyst. Each model call is bounded by `timeout`.
    pub fn new(model_client: ModelClient, timeout: Duration) -> Self {
        Self {
            model_client,
            timeout,
        }
    }

    /// Forwards `content` as a single user message.
    pub async fn chat(&self, content: &str) -> Result<String, AnalysisError> {
        self.complete(ModelRequest::with_user_message(content)).await
    }

    /// Asks for a code review of the diff and returns it as plain text.
    pub async fn review(&self, diff: &str) -> Result<String, AnalysisError> {
        self.complete(ModelRequest::with_user_message(review_prompt(diff)))
            .await
    }

    /// Classifies the diff. Malformed model output falls back to a high
    /// risk level.
    pub async fn assess_risk(
        &self,
        diff: &str,
    ) -> Result<RiskAssessment, AnalysisError> {
        let raw = self.complete(json_request(risk_prompt(diff))).await?;
        Ok(StructuredOutput::decode(&raw).unwrap_or_else(|raw, error| {
            warn!(%error, raw, "malformed risk assessment");
            RiskAssessment {
                risk_level: RiskLevel::High,
                reason: RISK_FALLBACK_REASON.to_owned(),
            }
        }))
    }

    /// Looks for vulnerabilities. Malformed model output is reported as
    /// flagged.
    pub async fn detect_security(
        &self,
        diff: &str,
    ) -> Result<SecurityAssessment, AnalysisError> {
        let raw = self.complete(json_request(security_prompt(diff))).await?;
        Ok(StructuredOutput::decode(&raw).unwrap_or_else(|raw, error| {
            warn!(%error, raw, "malformed security assessment");
            SecurityAssessment {
                status: SecurityStatus::Flagged,
                flags: vec![SECURITY_FALLBACK_FLAG.to_owned()],
            }
        }))
    }

    async fn complete(
        &self,
        req: ModelRequest,
    ) -> Result<String, AnalysisError> {
        let resp = tokio::time::timeout(
            self.timeout,
            self.model_client.send_request(req),
        )
        .await
        .map_err(|_| AnalysisError::TimedOut(self.timeout))?
        .map_err(AnalysisError::Model)?;
        Ok(resp.transcript)
    }
}

fn json_request(prompt: String) -> ModelRequest {
    ModelRequest {
        response_format: Some(ResponseFormat::JsonObject),
        ..ModelRequest::with_user_message(prompt)
    }
}

fn review_prompt(diff: &str) -> String {
    format!(
        "You are an expert code reviewer. Analyze the following pull request \
         diff and provide a constructive, concise review. Focus on code \
         quality, potential bugs, and best practices.\n\nDiff:\n{diff}"
    )
}

fn risk_prompt(diff: &str) -> String {
    format!(
        "Analyze the following pull request diff and assess its risk level. \
         Risk level must be exactly one of: \"low\", \"medium\", or \"high\". \
         \nReturn ONLY a valid JSON object matching this schema:\n\
         {{\n  \"riskLevel\": \"low\" | \"medium\" | \"high\",\n  \
         \"reason\": \"Brief explanation of the risk assessment\"\n}}\n\n\
         Diff:\n{diff}"
    )
}

fn security_prompt(diff: &str) -> String {
    format!(
        "Analyze the following pull request diff for security \
         vulnerabilities.\nReturn ONLY a valid JSON object matching this \
         schema:\n{{\n  \"status\": \"clean\" | \"flagged\",\n  \"flags\": \
         [\"list of brief descriptions of vulnerabilities found, if any\"]\n\
         }}\n\nDiff:\n{diff}"
    )
}

#[cfg(test)]
mod tests {
    use pr_pilot_model::{ErrorKind, ModelMessage};
    use pr_pilot_test_model::{PresetResponse, TestModelProvider};

    use super::*;

    fn analyst(provider: &TestModelProvider) -> Analyst {
        Analyst::new(
            ModelClient::new(provider.clone()),
            Duration::from_secs(5),
        )
    }

    fn user_prompt(req: &ModelRequest) -> &str {
        match &req.messages[..] {
            [ModelMessage::User(content)] => content,
            other => panic!("expected one user message, got {other:?}"),
        }
    }

    #[test]
    fn test_decode() {
        let parsed: StructuredOutput<RiskAssessment> = StructuredOutput::decode(
            "\n{\"riskLevel\": \"medium\", \"reason\": \"touches auth\"}\n",
        );
        assert_eq!(
            parsed,
            StructuredOutput::Parsed(RiskAssessment {
                risk_level: RiskLevel::Medium,
                reason: "touches auth".to_owned(),
            })
        );

        let unknown_level: StructuredOutput<RiskAssessment> =
            StructuredOutput::decode(r#"{"riskLevel":"severe","reason":"x"}"#);
        assert!(matches!(unknown_level, StructuredOutput::Malformed { .. }));

        let no_flags: StructuredOutput<SecurityAssessment> =
            StructuredOutput::decode(r#"{"status":"clean"}"#);
        assert_eq!(
            no_flags,
            StructuredOutput::Parsed(SecurityAssessment {
                status: SecurityStatus::Clean,
                flags: vec![],
            })
        );
    }

    #[tokio::test]
    async fn test_review() {
        let provider = TestModelProvider::with_script([PresetResponse::text(
            "Looks good, add a test.",
        )]);
        let review = analyst(&provider).review("+fn a() {}").await.unwrap();
        assert_eq!(review, "Looks good, add a test.");

        let requests = provider.requests();
        let prompt = user_prompt(&requests[0]);
        assert!(prompt.starts_with("You are an expert code reviewer."));
        assert!(prompt.ends_with("\n\nDiff:\n+fn a() {}"));
        assert_eq!(requests[0].response_format, None);
        assert!(requests[0].tools.is_empty());
    }

    #[tokio::test]
    async fn test_chat_forwards_content() {
        let provider =
            TestModelProvider::with_script([PresetResponse::text("Hello!")]);
        let reply = analyst(&provider).chat("Hi there").await.unwrap();
        assert_eq!(reply, "Hello!");
        let requests = provider.requests();
        assert_eq!(user_prompt(&requests[0]), "Hi there");
    }

    #[tokio::test]
    async fn test_assess_risk() {
        let provider = TestModelProvider::with_script([PresetResponse::text(
            r#"{"riskLevel":"low","reason":"docs only"}"#,
        )]);
        let risk = analyst(&provider).assess_risk("+# docs").await.unwrap();
        assert_eq!(risk.risk_level, RiskLevel::Low);
        assert_eq!(risk.reason, "docs only");

        let requests = provider.requests();
        assert_eq!(
            requests[0].response_format,
            Some(ResponseFormat::JsonObject)
        );
        assert!(user_prompt(&requests[0]).contains("\"riskLevel\""));
    }

    #[tokio::test]
    async fn test_risk_fallback() {
        let provider = TestModelProvider::with_script([PresetResponse::text(
            "The risk is probably low.",
        )]);
        let risk = analyst(&provider).assess_risk("+x").await.unwrap();
        assert_eq!(
            serde_json::to_value(&risk).unwrap(),
            serde_json::json!({
                "riskLevel": "high",
                "reason": "Failed to parse risk assessment from AI."
            })
        );
    }

    #[tokio::test]
    async fn test_security_fallback() {
        let provider = TestModelProvider::with_script([PresetResponse::text(
            r#"{"status":"maybe"}"#,
        )]);
        let security = analyst(&provider).detect_security("+x").await.unwrap();
        assert_eq!(
            serde_json::to_value(&security).unwrap(),
            serde_json::json!({
                "status": "flagged",
                "flags": ["Failed to parse security assessment from AI."]
            })
        );
    }

    #[tokio::test]
    async fn test_model_errors() {
        let provider = TestModelProvider::with_script([
            PresetResponse::text("never").with_failures(0),
        ]);
        let err = analyst(&provider).detect_security("+x").await.unwrap_err();
        let AnalysisError::Model(err) = err else {
            panic!("expected a model error, got {err:?}");
        };
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let mut provider =
            TestModelProvider::with_script([PresetResponse::text("late")]);
        provider.set_delay(Duration::from_secs(60));
        let analyst = Analyst::new(
            ModelClient::new(provider),
            Duration::from_secs(10),
        );
        let err = analyst.chat("Hi").await.unwrap_err();
        assert!(matches!(err, AnalysisError::TimedOut(_)));
    }
}
