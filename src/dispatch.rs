//! Command dispatcher collaborator contract.
//!
//! The bridge never interprets command names or parameters; it only routes
//! them to an externally supplied [`CommandDispatcher`] and carries the
//! result (or a structured error) back over the wire. Execution time is
//! bounded by the calling transport: it wraps `execute` in the command's
//! timeout and cancels the work by dropping the future.

use async_trait::async_trait;
use serde_json::Value;

/// Errors a dispatcher can return for a routed command.
#[derive(Debug)]
pub enum DispatchError {
    /// The command ran and failed.
    Failed(String),
    /// No handler exists for the command.
    Unavailable(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(msg) => write!(f, "Command failed: {msg}"),
            Self::Unavailable(msg) => write!(f, "Command unavailable: {msg}"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Executes a named command against host state and returns a JSON result.
///
/// Implementations live outside this crate; the transports call `execute`
/// for every inbound command envelope and translate the outcome into the
/// wire reply shape.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// Execute `name` with `params` and return its JSON result.
    async fn execute(&self, name: &str, params: Value) -> Result<Value, DispatchError>;
}

/// Dispatcher used when no host integration is wired in.
///
/// Every command yields a structured "no handler" error, which travels back
/// over the transport like any other failure result.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDispatcher;

#[async_trait]
impl CommandDispatcher for NullDispatcher {
    async fn execute(&self, name: &str, _params: Value) -> Result<Value, DispatchError> {
        Err(DispatchError::Unavailable(format!(
            "no handler registered for command '{name}'"
        )))
    }
}
