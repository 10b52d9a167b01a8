//! # Answer Channel
//!
//! Every request gets exactly one answer. The channel enforces that with a
//! single atomic flag; every later send is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::domain::{ErrorCode, RouterError};

/// Error answer as sent to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerError {
    /// Numeric error code.
    pub code: i64,
    /// Message.
    pub ex: String,
    /// `DBProxy` or `database`.
    pub raiser: String,
}

impl AnswerError {
    /// Error answer with an explicit message.
    pub fn new(code: ErrorCode, ex: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            ex: ex.into(),
            raiser: code.raiser().to_string(),
        }
    }

    /// Parsed code, if known.
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }

    /// Wire shape.
    pub fn to_json(&self) -> Value {
        json!({ "code": self.code, "ex": self.ex, "raiser": self.raiser })
    }
}

impl From<&RouterError> for AnswerError {
    fn from(error: &RouterError) -> Self {
        Self::new(error.code(), error.to_string())
    }
}

impl From<RouterError> for AnswerError {
    fn from(error: RouterError) -> Self {
        Self::from(&error)
    }
}

/// Success payload or error.
pub type Answer = Result<Value, AnswerError>;

/// Where answers end up (transport, test probe, ...).
pub trait AnswerSink: Send + Sync {
    /// Deliver the one answer of a request.
    fn deliver(&self, answer: Answer);
}

struct CallbackSink<F>(F);

impl<F> AnswerSink for CallbackSink<F>
where
    F: Fn(Answer) + Send + Sync,
{
    fn deliver(&self, answer: Answer) {
        (self.0)(answer)
    }
}

struct OneshotSink(Mutex<Option<oneshot::Sender<Answer>>>);

impl AnswerSink for OneshotSink {
    fn deliver(&self, answer: Answer) {
        if let Some(sender) = self.0.lock().take() {
            // Receiver gone means the client disconnected.
            let _ = sender.send(answer);
        }
    }
}

/// Send-once answer channel shared by everything working on one request.
pub struct AnswerChannel {
    sent: AtomicBool,
    sink: Box<dyn AnswerSink>,
}

impl AnswerChannel {
    /// Channel delivering into `sink`.
    pub fn new(sink: impl AnswerSink + 'static) -> Arc<Self> {
        Arc::new(Self {
            sent: AtomicBool::new(false),
            sink: Box::new(sink),
        })
    }

    /// Channel invoking `callback` with the answer.
    pub fn with_callback<F>(callback: F) -> Arc<Self>
    where
        F: Fn(Answer) + Send + Sync + 'static,
    {
        Self::new(CallbackSink(callback))
    }

    /// Channel paired with an async receiver.
    pub fn oneshot() -> (Arc<Self>, oneshot::Receiver<Answer>) {
        let (sender, receiver) = oneshot::channel();
        (Self::new(OneshotSink(Mutex::new(Some(sender)))), receiver)
    }

    /// Send `answer` unless something was already sent.
    ///
    /// Returns `true` if this call delivered.
    pub fn send(&self, answer: Answer) -> bool {
        if self.sent.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.sink.deliver(answer);
        true
    }

    /// Send a success payload.
    pub fn send_ok(&self, value: Value) -> bool {
        self.send(Ok(value))
    }

    /// Send an error.
    pub fn send_error(&self, error: &RouterError) -> bool {
        self.send(Err(error.into()))
    }

    /// Whether an answer went out.
    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }
}
