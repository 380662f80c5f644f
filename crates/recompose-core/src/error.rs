use std::any::Any;

use crate::{CellId, Phase, ScopeId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A scope read a cell through a handle after its execution ended.
    #[error("stale read of cell {cell:?} by scope {scope:?} after its execution ended")]
    StaleRead { scope: ScopeId, cell: CellId },

    #[error("unknown cell {0:?}")]
    UnknownCell(CellId),

    #[error("unknown scope {0:?}")]
    UnknownScope(ScopeId),

    /// Cascading same-turn invalidation did not settle within the cap.
    #[error("unbounded invalidation loop: still dirty after {iterations} passes ({} cells)", cells.len())]
    UnboundedInvalidation {
        iterations: usize,
        cells: Vec<CellId>,
    },

    #[error(transparent)]
    ScopeExecution(#[from] ScopeFailure),

    /// An effect task wrote after its cancellation was signalled. The write was dropped.
    #[error("effect task owned by {scope:?} wrote to {cell:?} after cancellation")]
    EffectCancellationViolation { scope: ScopeId, cell: CellId },

    #[error("invalid runtime config: {0}")]
    Config(String),
}

/// A panic caught while executing one scope.
#[derive(Clone, Debug, thiserror::Error)]
#[error("scope {scope:?} failed during {phase:?}: {message}")]
pub struct ScopeFailure {
    pub scope: ScopeId,
    pub phase: Phase,
    pub message: String,
}

/// What an error boundary's fallback gets to see.
#[derive(Clone, Debug)]
pub struct ErrorInfo {
    pub message: String,
    /// The scope that failed; may already be torn down.
    pub scope: ScopeId,
}

impl From<&ScopeFailure> for ErrorInfo {
    fn from(f: &ScopeFailure) -> Self {
        ErrorInfo {
            message: f.message.clone(),
            scope: f.scope,
        }
    }
}

pub(crate) fn panic_message(err: Box<dyn Any + Send>) -> String {
    if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    }
}
