//! Scriptable in-process executor.
//!
//! Without a script it answers every prompt with `Mock response for: <prompt>`,
//! which is enough to exercise specs end to end. Tests queue replies per
//! task id or prompt to drive retries, timeouts and tool-call graders.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AgentExecutor, ExecutionRequest, ExecutionResponse, ExecutorError, TranscriptEvent};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this response.
    Respond(ExecutionResponse),
    /// Return `ExecutorError::Failed` with this message.
    Fail(String),
    /// Sleep for the duration, then return the response.
    Delayed(Duration, ExecutionResponse),
    /// Never return; the caller's deadline must fire.
    Hang,
}

/// Scriptable mock executor.
///
/// Replies queued for a key are consumed in order; the last one repeats.
#[derive(Debug)]
pub struct MockExecutor {
    name: String,
    model: String,
    scripts: Mutex<HashMap<String, VecDeque<MockReply>>>,
    calls: AtomicUsize,
}

impl MockExecutor {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            name: "mock".to_string(),
            model: model.into(),
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue replies for a task id or a prompt.
    pub async fn script(&self, key: impl Into<String>, replies: Vec<MockReply>) {
        self.scripts
            .lock()
            .await
            .insert(key.into(), replies.into_iter().collect());
    }

    /// Number of `execute` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn next_reply(&self, request: &ExecutionRequest) -> Option<MockReply> {
        let mut scripts = self.scripts.lock().await;
        let queue = if scripts.contains_key(&request.task_id) {
            scripts.get_mut(&request.task_id)
        } else {
            scripts.get_mut(&request.prompt)
        }?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn default_response(&self, request: &ExecutionRequest) -> ExecutionResponse {
        let mut output = format!("Mock response for: {}", request.prompt);
        let files = count_files(&request.workspace_dir);
        if files > 0 {
            output.push_str(&format!("\nAnalyzed {files} file(s)"));
        }
        ExecutionResponse {
            transcript: vec![
                TranscriptEvent::new("user.message", request.prompt.clone()),
                TranscriptEvent::new("assistant.message", output.clone()),
            ],
            final_output: output,
            model_id: self.model.clone(),
            success: true,
            ..ExecutionResponse::default()
        }
    }
}

fn count_files(dir: &std::path::Path) -> usize {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .count()
}

#[async_trait]
impl AgentExecutor for MockExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResponse, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();

        let mut response = match self.next_reply(&request).await {
            None => self.default_response(&request),
            Some(MockReply::Respond(response)) => response,
            Some(MockReply::Fail(message)) => return Err(ExecutorError::Failed(message)),
            Some(MockReply::Delayed(delay, response)) => {
                tokio::time::sleep(delay).await;
                response
            }
            Some(MockReply::Hang) => std::future::pending().await,
        };

        if response.model_id.is_empty() {
            response.model_id = self.model.clone();
        }
        if response.duration_ms == 0 {
            response.duration_ms = start.elapsed().as_millis() as u64;
        }
        Ok(response)
    }
}
