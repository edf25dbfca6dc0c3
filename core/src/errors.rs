//! Error types for circuit breaker operations

use crate::config::ConfigError;
use crate::state::CircuitState;
use std::error::Error;

/// A call was rejected because the circuit does not permit it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker '{circuit}' is {state} and does not permit further calls")]
pub struct CallNotPermitted {
    pub circuit: String,
    pub state: CircuitState,
}

/// Errors that can occur during circuit breaker protected calls
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E = Box<dyn Error + Send + Sync>> {
    /// Circuit is open (or out of trial permits), the call was not executed
    #[error(transparent)]
    NotPermitted(#[from] CallNotPermitted),
    /// The wrapped operation failed
    #[error("circuit execution failed: {0}")]
    Execution(E),
}

impl<E> CircuitError<E> {
    pub fn is_not_permitted(&self) -> bool {
        matches!(self, CircuitError::NotPermitted(_))
    }

    /// The error returned by the wrapped operation, if it ran
    pub fn into_execution(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            CircuitError::NotPermitted(_) => None,
        }
    }
}

/// An administrative transition that the state machine does not allow
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker '{circuit}' cannot transition from {from} to {to}")]
pub struct TransitionError {
    pub circuit: String,
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Errors from registry operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("circuit breaker '{0}' not found")]
    NotFound(String),
    #[error("circuit breaker '{0}' is already registered")]
    AlreadyExists(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
