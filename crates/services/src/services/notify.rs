use std::sync::Arc;

use async_trait::async_trait;
use db::models::task::Task;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use super::registry::Project;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("Chat API rejected the message: {0}")]
    Api(String),
    #[error("Disambiguation payload is malformed: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Resumption state carried inside each disambiguation option, so no
/// conversation state lives server-side between prompt and choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSelection {
    pub task_id: Uuid,
    pub project_id: String,
    pub original_description: String,
}

impl PendingSelection {
    pub fn encode(&self) -> Result<String, NotifyError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self, NotifyError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// One selectable option in an interactive prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

/// A rendered outbound message, threaded to the originating
/// conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub channel: String,
    pub thread_id: Option<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
}

/// Transport seam: the HTTP implementation talks to the chat platform;
/// tests record messages instead.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Post a message, returning the platform's message id.
    async fn post(&self, message: &ChatMessage) -> Result<String, NotifyError>;
    /// Replace a previously posted message in place.
    async fn update(&self, message_id: &str, message: &ChatMessage) -> Result<(), NotifyError>;
}

pub struct HttpChatTransport {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpChatTransport {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    fn request(&self, method: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}/{}", self.base_url.trim_end_matches('/'), method));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    fn body(message: &ChatMessage, message_id: Option<&str>) -> serde_json::Value {
        let mut body = json!({
            "channel": message.channel,
            "text": message.text,
        });
        if let Some(thread) = &message.thread_id {
            body["thread_ts"] = json!(thread);
        }
        if let Some(ts) = message_id {
            body["ts"] = json!(ts);
        }
        if !message.options.is_empty() {
            body["blocks"] = json!([{
                "type": "actions",
                "elements": [{
                    "type": "static_select",
                    "action_id": "select_project_for_task",
                    "options": message.options.iter().map(|o| json!({
                        "text": {"type": "plain_text", "text": o.label},
                        "value": o.value,
                    })).collect::<Vec<_>>(),
                }],
            }]);
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct ChatApiResponse {
    ok: bool,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn post(&self, message: &ChatMessage) -> Result<String, NotifyError> {
        let response: ChatApiResponse = self
            .request("chat.postMessage")
            .json(&Self::body(message, None))
            .send()
            .await?
            .json()
            .await?;
        if !response.ok {
            return Err(NotifyError::Api(
                response.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        response
            .ts
            .ok_or_else(|| NotifyError::Api("response carried no message id".to_string()))
    }

    async fn update(&self, message_id: &str, message: &ChatMessage) -> Result<(), NotifyError> {
        let response: ChatApiResponse = self
            .request("chat.update")
            .json(&Self::body(message, Some(message_id)))
            .send()
            .await?
            .json()
            .await?;
        if !response.ok {
            return Err(NotifyError::Api(
                response.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }
}

/// Renders lifecycle messages and keeps them threaded to the requester's
/// conversation. Tasks without a conversation (webhook-triggered) only
/// log; no message leaves the process.
#[derive(Clone)]
pub struct NotificationService {
    transport: Option<Arc<dyn ChatTransport>>,
}

impl NotificationService {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport: Some(transport),
        }
    }

    /// No chat configured: every notification becomes a log line.
    pub fn disabled() -> Self {
        Self { transport: None }
    }

    async fn send(&self, task: &Task, text: String, options: Vec<SelectOption>) -> Result<Option<String>, NotifyError> {
        let (Some(transport), Some(channel)) = (&self.transport, &task.channel_id) else {
            tracing::info!(task_id = %task.id, %text, "notification (no chat configured)");
            return Ok(None);
        };
        let message = ChatMessage {
            channel: channel.clone(),
            thread_id: task.thread_id.clone(),
            text,
            options,
        };
        transport.post(&message).await.map(Some)
    }

    pub async fn acknowledged(&self, task: &Task) -> Result<Option<String>, NotifyError> {
        let project = task.project_id.as_deref().unwrap_or("?");
        self.send(
            task,
            format!(
                "🚀 Task `{}` queued on `{}`\n\n*Task:* {}",
                task.id, project, task.description
            ),
            Vec::new(),
        )
        .await
    }

    /// The disambiguation prompt: every active project is a selectable
    /// option whose payload round-trips the original description.
    pub async fn disambiguation_prompt(
        &self,
        task: &Task,
        raw_identifier: &str,
        candidates: &[Project],
        suggestion: Option<&str>,
    ) -> Result<Option<String>, NotifyError> {
        let mut options = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let payload = PendingSelection {
                task_id: task.id,
                project_id: candidate.id.clone(),
                original_description: task
                    .original_description
                    .clone()
                    .unwrap_or_else(|| task.description.clone()),
            };
            let stack = candidate.stack.as_deref().unwrap_or("unknown");
            options.push(SelectOption {
                label: format!("{} ({}) [P{}]", candidate.name, stack, candidate.priority),
                value: payload.encode()?,
            });
        }

        let mut text = format!("❌ Unknown project: `{raw_identifier}`");
        if let Some(suggestion) = suggestion {
            text.push_str(&format!("\n\nDid you mean `{suggestion}`?"));
        }
        text.push_str("\n\n🎯 *Select the correct project:*");

        self.send(task, text, options).await
    }

    /// Replace the prompt once a choice lands, so stale options do not
    /// linger as clickable elements.
    pub async fn confirm_selection(
        &self,
        task: &Task,
        prompt_message_id: &str,
        project: &Project,
    ) -> Result<(), NotifyError> {
        let (Some(transport), Some(channel)) = (&self.transport, &task.channel_id) else {
            return Ok(());
        };
        let message = ChatMessage {
            channel: channel.clone(),
            thread_id: task.thread_id.clone(),
            text: format!("✅ *Project selected:* `{}`", project.id),
            options: Vec::new(),
        };
        transport.update(prompt_message_id, &message).await
    }

    pub async fn progress(&self, task: &Task, detail: &str) -> Result<Option<String>, NotifyError> {
        self.send(
            task,
            format!("⏳ Task `{}`: {detail}", task.id),
            Vec::new(),
        )
        .await
    }

    pub async fn completed(&self, task: &Task) -> Result<Option<String>, NotifyError> {
        let branch = task.branch.as_deref().unwrap_or("unknown");
        self.send(
            task,
            format!(
                "✅ *Task `{}` completed*\n\n*Branch:* `{branch}`\n\nCheck the branch for changes.",
                task.id
            ),
            Vec::new(),
        )
        .await
    }

    pub async fn errored(&self, task: &Task, error: &str) -> Result<Option<String>, NotifyError> {
        self.send(
            task,
            format!("❌ *Task `{}` failed*\n\n```\n{error}\n```", task.id),
            Vec::new(),
        )
        .await
    }

    pub async fn plain(
        &self,
        channel_id: &str,
        thread_id: Option<&str>,
        text: String,
    ) -> Result<Option<String>, NotifyError> {
        let Some(transport) = &self.transport else {
            tracing::info!(%text, "notification (no chat configured)");
            return Ok(None);
        };
        let message = ChatMessage {
            channel: channel_id.to_string(),
            thread_id: thread_id.map(str::to_string),
            text,
            options: Vec::new(),
        };
        transport.post(&message).await.map(Some)
    }
}
