//! ui::recording
//!
//! An [`OutputSink`] that records everything, for tests and embedding.
//!
//! Confirmations are answered from a scripted queue. Once the queue is
//! empty the fallback answer is used; without a fallback the sink behaves
//! like a non-interactive terminal.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::output::OutputSink;
use super::prompts::PromptError;

/// Severity of a recorded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Result,
    Debug,
    Prompt,
}

/// One recorded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub level: Level,
    pub text: String,
}

#[derive(Debug, Default)]
struct RecordingInner {
    messages: Vec<Message>,
    answers: VecDeque<bool>,
    fallback: Option<bool>,
}

/// Records messages; answers prompts from a script.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    inner: Arc<Mutex<RecordingInner>>,
}

impl RecordingSink {
    /// A sink that refuses prompts as non-interactive.
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that answers every prompt with `answer`.
    pub fn answering(answer: bool) -> Self {
        let sink = Self::new();
        sink.lock().fallback = Some(answer);
        sink
    }

    /// Queue answers for the next prompts, in order.
    pub fn with_answers(self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.lock().answers.extend(answers);
        self
    }

    /// All recorded messages.
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Text of the messages at one level.
    pub fn texts(&self, level: Level) -> Vec<String> {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.level == level)
            .map(|m| m.text.clone())
            .collect()
    }

    /// Questions asked so far.
    pub fn prompts(&self) -> Vec<String> {
        self.texts(Level::Prompt)
    }

    /// Whether any message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lock().messages.iter().any(|m| m.text.contains(needle))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordingInner> {
        // A poisoned lock only means another test thread panicked mid-record.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, level: Level, text: &str) {
        self.lock().messages.push(Message {
            level,
            text: text.to_string(),
        });
    }
}

impl OutputSink for RecordingSink {
    fn info(&self, message: &str) {
        self.push(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.push(Level::Error, message);
    }

    fn result(&self, message: &str) {
        self.push(Level::Result, message);
    }

    fn debug(&self, message: &str) {
        self.push(Level::Debug, message);
    }

    fn request_response(&self, question: &str) -> Result<(), PromptError> {
        self.push(Level::Prompt, question);
        let mut inner = self.lock();
        let answer = match inner.answers.pop_front() {
            Some(answer) => answer,
            None => inner.fallback.ok_or(PromptError::NotInteractive)?,
        };
        if answer {
            Ok(())
        } else {
            Err(PromptError::Declined)
        }
    }
}
