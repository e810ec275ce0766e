//! Error taxonomy for the dispatch core.
//!
//! The executor classifies, the retry driver decides, the facade surfaces.

use thiserror::Error;

use crate::node::Redirect;

pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Encoding failed or a null key was passed where one is required.
    /// Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The retry budget was exhausted. `attempts` counts every attempt made,
    /// including the first; `last` describes the failure that ended the run.
    #[error("command timed out after {attempts} attempts; last failure: {last}")]
    Timeout { attempts: u32, last: String },

    /// Socket failure, pool exhaustion, or a server-side idle reject.
    /// Retriable.
    #[error("connection error: {0}")]
    Connection(String),

    /// A MOVED/ASK reply. Followed by the retry driver unless the caller
    /// asked to see redirects (scatter/gather does).
    #[error("redirected to {}", .0.target())]
    Redirect(Redirect),

    /// Any other error reported by the backend, surfaced with its text.
    /// NOSCRIPT travels through this variant and is consumed by the script
    /// cache before it can reach a caller.
    #[error("server error: {0}")]
    Server(String),

    /// The subscription budget elapsed before the subscription completed.
    #[error(
        "subscribe timeout: ({budget_ms}ms); increase 'subscriptions_per_connection' \
         and/or 'subscription_connection_pool_size' parameters"
    )]
    SubscribeTimeout { budget_ms: u64 },

    /// The operation's future was dropped or its promise failed externally.
    #[error("command cancelled")]
    Cancelled,

    /// Misuse of the synchronous bridge, e.g. calling it from a transport
    /// worker thread.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Anything the classifier did not anticipate, with the cause preserved.
    #[error("unexpected error while processing command: {0}")]
    Unexpected(anyhow::Error),
}

impl DispatchError {
    /// Whether the retry driver may reissue the attempt.
    pub fn is_retriable(&self) -> bool {
        matches!(self, DispatchError::Connection(_))
    }

    pub fn as_redirect(&self) -> Option<&Redirect> {
        match self {
            DispatchError::Redirect(redirect) => Some(redirect),
            _ => None,
        }
    }

    /// A NOSCRIPT reply to an EVALSHA attempt.
    pub fn is_noscript(&self) -> bool {
        matches!(self, DispatchError::Server(text) if text.starts_with("NOSCRIPT"))
    }
}
