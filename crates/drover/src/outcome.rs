//! Classification of handler outcomes.
//!
//! Every processed command yields an [`Outcome`]. The dispatcher never
//! inspects the command itself; the outcome alone decides between
//! acknowledging, requeueing, and forwarding to the completion and error
//! queues.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The closed set of outcome classifications.
///
/// `Fatal` and `Error` always carry the formatted error text; `TooSoon`
/// may carry one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "error", rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The command was handled; nothing further is owed.
    Success,
    /// The command was handled and the job it belongs to is finished.
    AllDone,
    /// The command reached a worker that cannot act on it yet.
    TooSoon(Option<String>),
    /// The command failed and must not be retried.
    Fatal(String),
    /// The command failed but is worth another attempt.
    Error(String),
    /// The command did not fail but should go back on the queue anyway.
    Requeue,
}

impl OutcomeKind {
    /// Lowercase wire tag, used in headers and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::AllDone => "all_done",
            OutcomeKind::TooSoon(_) => "too_soon",
            OutcomeKind::Fatal(_) => "fatal",
            OutcomeKind::Error(_) => "error",
            OutcomeKind::Requeue => "requeue",
        }
    }
}

/// The result of processing one delivery: a classification plus free-form
/// metadata kept for debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(flatten)]
    kind: OutcomeKind,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    meta: Map<String, Value>,
}

impl Outcome {
    /// The command was handled.
    pub fn success() -> Self {
        Self::from_kind(OutcomeKind::Success)
    }

    /// The command was handled and its whole job is finished; the
    /// completion protocol should follow.
    pub fn all_done() -> Self {
        Self::from_kind(OutcomeKind::AllDone)
    }

    /// A failure that must not be retried. Anything printable serves as
    /// the error.
    pub fn fatal(err: impl fmt::Display) -> Self {
        Self::from_kind(OutcomeKind::Fatal(err.to_string()))
    }

    /// A failure worth another attempt; the dispatcher will requeue the
    /// command.
    pub fn error(err: impl fmt::Display) -> Self {
        Self::from_kind(OutcomeKind::Error(err.to_string()))
    }

    /// No failure, but the command should be re-enqueued.
    pub fn requeue() -> Self {
        Self::from_kind(OutcomeKind::Requeue)
    }

    /// This worker cannot act on the command yet; the dispatcher drops it
    /// and lets broker redelivery try again elsewhere.
    pub fn too_soon() -> Self {
        Self::from_kind(OutcomeKind::TooSoon(None))
    }

    fn from_kind(kind: OutcomeKind) -> Self {
        Self {
            kind,
            meta: Map::new(),
        }
    }

    pub fn kind(&self) -> &OutcomeKind {
        &self.kind
    }

    /// The attached error text, if any.
    pub fn err(&self) -> Option<&str> {
        match &self.kind {
            OutcomeKind::Fatal(e) | OutcomeKind::Error(e) => Some(e),
            OutcomeKind::TooSoon(e) => e.as_deref(),
            OutcomeKind::Success | OutcomeKind::AllDone | OutcomeKind::Requeue => None,
        }
    }

    /// No error is attached. A plain requeue counts as successful.
    pub fn is_success(&self) -> bool {
        self.err().is_none()
    }

    /// Finished for good: the completion protocol should follow.
    pub fn is_all_done(&self) -> bool {
        matches!(self.kind, OutcomeKind::AllDone)
    }

    /// Failed in a way that must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, OutcomeKind::Fatal(_))
    }

    /// The command should go back on the queue: either explicitly tagged
    /// for requeue, or failed without being fatal.
    pub fn is_requeue(&self) -> bool {
        matches!(self.kind, OutcomeKind::Requeue) || (!self.is_success() && !self.is_fatal())
    }

    /// The command is not actionable by this worker right now.
    pub fn is_trap(&self) -> bool {
        matches!(self.kind, OutcomeKind::TooSoon(_))
    }

    /// Shallow-merges `entries` into the metadata, newest value per key
    /// winning, and returns the outcome for chaining.
    pub fn with_meta<I, K>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (key, value) in entries {
            self.meta.insert(key.into(), value);
        }
        self
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }
}
