use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::JobAction;

/// Largest response body kept in an execution log.
const MAX_OUTPUT_CHARS: usize = 16 * 1024;

/// Why an action did not succeed.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The action descriptor cannot be executed as written.
    #[error("invalid action: {0}")]
    Invalid(String),

    /// Transport-level failure (DNS, connect, TLS, body read).
    #[error("request failed: {0}")]
    Transport(String),

    /// The remote answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// No answer within the allowed time.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Performs the externally visible side effect of a job.
///
/// Implementations own any timeout; the engine waits as long as `invoke` does.
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    /// Run `action`, returning the output to record on success.
    async fn invoke(&self, action: &JobAction) -> Result<String, ActionError>;
}

/// Invoker that performs the job's HTTP request.
pub struct HttpInvoker {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpInvoker {
    pub fn new(config: &tickwork_core::config::InvokerConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            client,
            default_timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl ActionInvoker for HttpInvoker {
    async fn invoke(&self, action: &JobAction) -> Result<String, ActionError> {
        let method = reqwest::Method::from_bytes(action.method.to_uppercase().as_bytes())
            .map_err(|_| ActionError::Invalid(format!("unknown method {:?}", action.method)))?;
        let url = reqwest::Url::parse(&action.url)
            .map_err(|e| ActionError::Invalid(format!("url {:?}: {e}", action.url)))?;
        let timeout = action
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let mut req = self.client.request(method, url).timeout(timeout);
        for (name, value) in &action.headers {
            req = req.header(name, value);
        }
        if let Some(ref body) = action.body {
            req = req.body(body.clone());
        }

        debug!(method = %action.method, url = %action.url, "invoking action");

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ActionError::Timeout {
                    secs: timeout.as_secs(),
                }
            } else {
                ActionError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                ActionError::Timeout {
                    secs: timeout.as_secs(),
                }
            } else {
                ActionError::Transport(e.to_string())
            }
        })?;
        let text = truncate(text);

        if !status.is_success() {
            return Err(ActionError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_OUTPUT_CHARS {
        let mut cut = MAX_OUTPUT_CHARS;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("\n[truncated]");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickwork_core::config::InvokerConfig;

    #[tokio::test]
    async fn rejects_unparsable_url() {
        let invoker = HttpInvoker::new(&InvokerConfig::default());
        let err = invoker
            .invoke(&JobAction::get("not a url"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Invalid(_)));
    }

    #[tokio::test]
    async fn rejects_bad_method() {
        let invoker = HttpInvoker::new(&InvokerConfig::default());
        let mut action = JobAction::get("http://127.0.0.1:9/");
        action.method = "NOT A METHOD".to_string();
        let err = invoker.invoke(&action).await.unwrap_err();
        assert!(matches!(err, ActionError::Invalid(_)));
    }

    #[test]
    fn status_error_message_format() {
        let err = ActionError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 502: bad gateway");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "é".repeat(MAX_OUTPUT_CHARS);
        let out = truncate(text);
        assert!(out.ends_with("[truncated]"));
        assert!(out.len() <= MAX_OUTPUT_CHARS + "\n[truncated]".len());
    }
}
