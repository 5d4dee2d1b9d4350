//! Errores del motor de threads.
//!
//! Dos familias conviven en `FlowError`:
//! - Errores estructurales (doble claim, listener duplicado, thread
//!   desconocido): son errores del programador y se devuelven de inmediato.
//! - Errores de ejecución (`StepExecution`, `Timeout`, ...): los captura el
//!   `Thread`, lo llevan a `Failed` y terminan en los fail listeners del
//!   `Trigger`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error devuelto por el código de usuario dentro de un step.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum FlowError {
    #[error("trigger '{trigger_type}' was already dispatched")]
    AlreadyDispatched { trigger_type: String },
    #[error("trigger '{trigger_type}' is already claimed by hub '{owner}'")]
    DoubleClaim { trigger_type: String, owner: String },
    #[error("trigger '{trigger_type}' was caught by hub '{hub}' but belongs to hub '{owner}'")]
    CrossHubClaim {
        trigger_type: String,
        owner: String,
        hub: String,
    },
    #[error("duplicate listener: {0}")]
    DuplicateListener(String),
    #[error("invalid factory '{factory}': {reason}")]
    InvalidFactory { factory: String, reason: String },
    #[error("hub '{hub}' caught '{trigger_type}' but has no factory for it")]
    UnregisteredTrigger { trigger_type: String, hub: String },
    #[error("step '{step}' declares '{name}' but nothing resolves it")]
    UnresolvedArgument { step: String, name: String },
    #[error("unknown thread {0}")]
    UnknownThread(String),
    #[error("thread for '{trigger_type}' timed out after {timeout_ms}ms")]
    Timeout { trigger_type: String, timeout_ms: u64 },
    #[error("step '{step}' failed: {message}")]
    StepExecution { step: String, message: String },
    #[error("no listener registered for '{0}'")]
    NotFound(String),
    #[error("factory '{factory}' cannot build: {reason}")]
    AlreadyBound { factory: String, reason: String },
    #[error("'{key}' is not a collection")]
    InvalidCollection { key: String },
    #[error("thread killed: {0}")]
    Killed(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("config: {0}")]
    Config(String),
}

impl FlowError {
    /// Envuelve un error arbitrario de usuario en `StepExecution`.
    pub fn step(step: impl Into<String>, err: &StepError) -> Self {
        Self::StepExecution { step: step.into(),
                              message: err.to_string() }
    }

    /// `true` para errores que rompen la integridad estructural del hub.
    pub fn is_structural(&self) -> bool {
        matches!(self,
                 Self::DoubleClaim { .. }
                 | Self::CrossHubClaim { .. }
                 | Self::DuplicateListener(_)
                 | Self::UnknownThread(_)
                 | Self::InvalidFactory { .. })
    }
}
