//! Scripted text model for tests.
//!
//! Lets tests drive the whole pipeline without network access. Replies are
//! picked in this order:
//!
//! 1. the first rule whose marker occurs in the prompt,
//! 2. the next reply in the sequential queue,
//! 3. the default reply.
//!
//! A rule with several replies hands them out in order and repeats its last
//! one forever. Every call is recorded.

use crate::service::{GenerationParams, ServiceError, TextModel};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One canned outcome.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(String),
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Reply::Fail(message.into())
    }

    fn into_result(self) -> Result<String, ServiceError> {
        match self {
            Reply::Text(text) => Ok(text),
            Reply::Fail(message) => Err(ServiceError::Transport(message)),
        }
    }
}

/// A call the model received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub max_output_tokens: usize,
    pub temperature: f32,
}

#[derive(Debug)]
struct Rule {
    marker: String,
    replies: VecDeque<Reply>,
}

#[derive(Debug)]
struct Script {
    rules: Vec<Rule>,
    queue: VecDeque<Reply>,
    default: Reply,
    calls: Vec<RecordedCall>,
}

/// Text model that answers from a script. Clones share state, so a test can
/// keep one handle for inspection and give another to the client.
#[derive(Debug, Clone)]
pub struct ScriptedModel {
    script: Arc<Mutex<Script>>,
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedModel {
    /// A model that fails every call until scripted.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                rules: Vec::new(),
                queue: VecDeque::new(),
                default: Reply::fail("no scripted reply"),
                calls: Vec::new(),
            })),
        }
    }

    /// Answer prompts containing `marker` with `reply`. Calling this again
    /// for the same marker queues another reply behind the first.
    pub fn on(self, marker: impl Into<String>, reply: Reply) -> Self {
        {
            let mut script = self.lock();
            let marker = marker.into();
            match script.rules.iter_mut().find(|r| r.marker == marker) {
                Some(rule) => rule.replies.push_back(reply),
                None => script.rules.push(Rule {
                    marker,
                    replies: VecDeque::from([reply]),
                }),
            }
        }
        self
    }

    /// Queue a reply for the next call not matched by a rule.
    pub fn then(self, reply: Reply) -> Self {
        self.lock().queue.push_back(reply);
        self
    }

    pub fn with_default(self, reply: Reply) -> Self {
        self.lock().default = reply;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Number of prompts that contained `marker`.
    pub fn calls_matching(&self, marker: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.prompt.contains(marker))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // A panicking test poisons the lock; the script itself is still usable.
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Script {
    fn next_reply(&mut self, prompt: &str) -> Reply {
        let default = self.default.clone();
        if let Some(rule) = self.rules.iter_mut().find(|r| prompt.contains(&r.marker)) {
            let reply = if rule.replies.len() > 1 {
                rule.replies.pop_front()
            } else {
                rule.replies.front().cloned()
            };
            return reply.unwrap_or(default);
        }
        self.queue.pop_front().unwrap_or(default)
    }
}

#[async_trait]
impl TextModel for ScriptedModel {
    async fn complete(&self, prompt: &str, params: GenerationParams) -> Result<String, ServiceError> {
        let mut script = self.lock();
        script.calls.push(RecordedCall {
            prompt: prompt.to_string(),
            max_output_tokens: params.max_output_tokens,
            temperature: params.temperature,
        });
        script.next_reply(prompt).into_result()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
