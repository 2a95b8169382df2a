//! Adapter error taxonomy.
//!
//! Every error that crosses the Mapper boundary carries its kind plus the
//! resource kind, entity id and adapter step it happened at, so a later run
//! can resume from the right place.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Provider throttled the call. Retried with fixed backoff inside the call.
    RateLimited,
    /// Not-yet-visible state or a waiter timeout. Deferred to a later pass.
    Transient,
    /// A referenced resource is not realized in the provider yet. Deferred.
    DependencyNotReady,
    /// Rejected input. Permanent for the entity.
    Validation,
    /// Rate-limit retries used up. Permanent for the entity.
    RetriesExhausted,
    /// Record Store failure.
    Store,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::Transient => "TRANSIENT",
            ErrorKind::DependencyNotReady => "DEPENDENCY_NOT_READY",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::RetriesExhausted => "RETRIES_EXHAUSTED",
            ErrorKind::Store => "STORE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: ErrorKind,
    pub message: String,
    pub resource_kind: Option<String>,
    pub entity_id: Option<String>,
    pub step: Option<String>,
    /// Sub-resources rolled back before this error was raised.
    pub compensated: usize,
}

impl AdapterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            resource_kind: None,
            entity_id: None,
            step: None,
            compensated: 0,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn dependency_not_ready(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyNotReady, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Store, message)
    }

    /// Attach resource kind and entity id. Context already set by an inner
    /// layer is kept.
    pub fn for_entity(mut self, resource_kind: &str, entity_id: &str) -> Self {
        if self.resource_kind.is_none() {
            self.resource_kind = Some(resource_kind.to_string());
        }
        if self.entity_id.is_none() && !entity_id.is_empty() {
            self.entity_id = Some(entity_id.to_string());
        }
        self
    }

    /// Attach the adapter step. The innermost step wins.
    pub fn at_step(mut self, step: &str) -> Self {
        if self.step.is_none() {
            self.step = Some(step.to_string());
        }
        self
    }

    pub fn with_compensated(mut self, n: usize) -> Self {
        self.compensated += n;
        self
    }

    /// Worth another pass: the entity may succeed once something else lands.
    pub fn is_deferrable(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient | ErrorKind::DependencyNotReady)
    }

    /// Worth retrying inside the same call.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::RateLimited
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_deferrable() && !self.is_retryable()
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        match (&self.resource_kind, &self.entity_id) {
            (Some(k), Some(id)) => write!(f, " {k} '{id}'")?,
            (Some(k), None) => write!(f, " {k}")?,
            (None, Some(id)) => write!(f, " '{id}'")?,
            (None, None) => {}
        }
        if let Some(step) = &self.step {
            write!(f, " at step '{step}'")?;
        }
        write!(f, ": {}", self.message)?;
        if self.compensated > 0 {
            write!(f, " ({} step(s) compensated)", self.compensated)?;
        }
        Ok(())
    }
}

impl std::error::Error for AdapterError {}
