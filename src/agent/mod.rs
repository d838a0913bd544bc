//! External step agent collaborator
//!
//! Tasks are executed by an external reasoning service, one bounded step at
//! a time. The worker pool drives it through the [`AgentStep`] trait; the
//! production client speaks JSON over HTTP. The reasoning loop itself lives
//! in the external service; this module only transports one step and
//! interprets the reply.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from the agent collaborator
///
/// Always funnelled through the queue's outcome reporting, so retry policy
/// stays centralized there.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The agent service could not be reached
    #[error("Agent unreachable: {0}")]
    Unreachable(String),

    /// The agent service returned a non-success status
    #[error("Agent rejected step ({status}): {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body, for the task's error message
        body: String,
    },

    /// The agent reply could not be interpreted
    #[error("Invalid agent response: {0}")]
    InvalidResponse(String),
}

/// Everything the agent needs to perform one step
#[derive(Debug, Clone, Serialize)]
pub struct StepContext {
    /// Task being executed
    pub task_id: String,
    /// Device the step acts on
    pub device_id: String,
    /// Address of the device's control channel, `host:port`
    pub control_address: String,
    /// The task's natural-language instruction
    pub instruction: String,
    /// Optional hint for the shape of the final result
    pub output_format: Option<String>,
    /// 1-based index of the step about to run
    pub step_index: u32,
}

/// How the agent left the task after one step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// More steps are needed
    Continue,
    /// The task is done; carries the result payload
    Complete(serde_json::Value),
    /// The agent could not proceed
    Failed(String),
}

/// Result of one executed step
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Disposition of the task after this step
    pub outcome: StepOutcome,
    /// Human-readable description of what the step did
    pub summary: String,
    /// Tokens the step consumed
    pub tokens_used: u64,
}

/// One-step-at-a-time execution surface of the agent collaborator
#[async_trait]
pub trait AgentStep: Send + Sync {
    /// Perform exactly one step against the device
    async fn run_step(&self, context: &StepContext) -> Result<StepResult, AgentError>;
}

/// Wire format of the agent's step reply
#[derive(Debug, Deserialize)]
struct StepReply {
    /// "continue", "complete", or "error"
    status: String,
    /// Human-readable step description
    #[serde(default)]
    summary: String,
    /// Result payload, present when status is "complete"
    result: Option<serde_json::Value>,
    /// Error detail, present when status is "error"
    error: Option<String>,
    /// Tokens consumed by the step
    #[serde(default)]
    tokens_used: u64,
}

/// HTTP client for the step agent service
pub struct HttpAgentClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAgentClient {
    /// Create a client against the agent service base URL
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl AgentStep for HttpAgentClient {
    async fn run_step(&self, context: &StepContext) -> Result<StepResult, AgentError> {
        let url = format!("{}/v1/step", self.base_url.trim_end_matches('/'));

        debug!(
            task_id = %context.task_id,
            step_index = context.step_index,
            url = %url,
            "Requesting agent step"
        );

        let response = self
            .client
            .post(&url)
            .json(context)
            .send()
            .await
            .map_err(|e| AgentError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_string());
            return Err(AgentError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let reply: StepReply = response
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;

        let outcome = match reply.status.as_str() {
            "continue" => StepOutcome::Continue,
            "complete" => StepOutcome::Complete(reply.result.unwrap_or(serde_json::Value::Null)),
            "error" => StepOutcome::Failed(
                reply
                    .error
                    .unwrap_or_else(|| "agent reported an unspecified error".to_string()),
            ),
            other => {
                return Err(AgentError::InvalidResponse(format!(
                    "unknown step status '{}'",
                    other
                )))
            }
        };

        Ok(StepResult {
            outcome,
            summary: reply.summary,
            tokens_used: reply.tokens_used,
        })
    }
}
