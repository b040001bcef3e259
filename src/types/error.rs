use thiserror::Error;

/// A remote read or write failed. The message is surfaced to the caller
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
  pub message: String,
}

impl TransportError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// Why a failed optimistic mutation failed. Reported once to the caller
/// after rollback; never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
  #[error("remote write failed: {0}")]
  Transport(#[from] TransportError),
}

/// Why a refetch produced no fresh value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  #[error(transparent)]
  Transport(#[from] TransportError),
  /// The read was superseded or cancelled. Routine, never user-facing.
  #[error("read cancelled")]
  Cancelled,
}
