use thiserror::Error;

pub const NO_BACKEND_MESSAGE: &str = "No service discovered";
pub const UNEXPECTED_RESPONSE_MESSAGE: &str = "Unexpected response from service";
pub const UNPARSABLE_TASK_LIST_MESSAGE: &str = "Failed to parse task list";
pub const MISSING_ID_MESSAGE: &str = "Task is missing an ID";

pub type ConsoleResult<T> = Result<T, ConsoleError>;

/// Failures surfaced to the operator. `Display` is the text shown on screen.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
  #[error("No service discovered")]
  NoBackend,

  #[error("{0}")]
  Transport(String),

  #[error("{0}")]
  UnexpectedResponse(String),

  /// The backend answered a list call with a `{"message": ...}` envelope.
  #[error("{0}")]
  Service(String),

  #[error("Task is missing an ID")]
  MissingId,

  #[error("Failed to bind gossip socket: {0}")]
  Bind(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
  ConfigurationAbsent,
  Transport,
  Protocol,
  Precondition,
  Discovery,
}

impl ConsoleError {
  pub fn category(&self) -> ErrorCategory {
    match self {
      ConsoleError::NoBackend => ErrorCategory::ConfigurationAbsent,
      ConsoleError::Transport(_) => ErrorCategory::Transport,
      ConsoleError::UnexpectedResponse(_) | ConsoleError::Service(_) => ErrorCategory::Protocol,
      ConsoleError::MissingId => ErrorCategory::Precondition,
      ConsoleError::Bind(_) => ErrorCategory::Discovery,
    }
  }

  pub fn unexpected_response() -> Self {
    ConsoleError::UnexpectedResponse(UNEXPECTED_RESPONSE_MESSAGE.into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_is_the_operator_message() {
    assert_eq!(ConsoleError::NoBackend.to_string(), NO_BACKEND_MESSAGE);
    assert_eq!(ConsoleError::MissingId.to_string(), MISSING_ID_MESSAGE);
    assert_eq!(ConsoleError::Service("maintenance".into()).to_string(), "maintenance");
    assert_eq!(ConsoleError::unexpected_response().to_string(), UNEXPECTED_RESPONSE_MESSAGE);
  }

  #[test]
  fn transport_and_contract_failures_are_distinct() {
    assert_eq!(ConsoleError::Transport("refused".into()).category(), ErrorCategory::Transport);
    assert_eq!(ConsoleError::unexpected_response().category(), ErrorCategory::Protocol);
    assert_ne!(
      ConsoleError::Transport("x".into()).category(),
      ConsoleError::UnexpectedResponse("x".into()).category()
    );
  }
}
