use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Errors of the physical broker link.
///
/// None of them are retried by the library; a failed link stays failed
/// until the owner calls `connect()` again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Broker could not be reached.
    #[error("Failed to connect to {address}: {reason}")]
    Unreachable { address: String, reason: String },

    /// AUTH or SELECT was refused by the broker.
    #[error("Broker rejected credentials: {reason}")]
    AuthRejected { reason: String },

    /// The link dropped while a command was in flight or idle.
    #[error("Connection closed: {reason}")]
    Closed { reason: String },

    /// An operation was attempted before `connect()` resolved.
    #[error("Connection is not established")]
    NotConnected,

    /// The owner already stopped this link (or the multiplexer using it).
    #[error("Connection has been stopped")]
    Stopped,

    /// The broker sent something the codec could not make sense of.
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    /// The broker answered a command with an error reply.
    #[error("Broker error reply: {message}")]
    Server { message: String },
}

impl ConnectionError {
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }
}

impl ErrorExt for ConnectionError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unreachable { .. } => StatusCode::ConnectionFailed,
            Self::AuthRejected { .. } => StatusCode::AuthFailed,
            Self::Closed { .. } => StatusCode::ConnectionClosed,
            Self::NotConnected => StatusCode::NotConnected,
            Self::Stopped => StatusCode::Stopped,
            Self::Protocol { .. } => StatusCode::ProtocolError,
            Self::Server { .. } => StatusCode::ServerError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::Unreachable { .. } => "Broker unreachable".to_string(),
            Self::AuthRejected { .. } => "Authentication rejected".to_string(),
            Self::Closed { .. } => "Connection closed".to_string(),
            Self::NotConnected => "Not connected".to_string(),
            Self::Stopped => "Connection stopped".to_string(),
            Self::Protocol { .. } => "Protocol error".to_string(),
            Self::Server { message } => message.clone(),
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "connection".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        if let Self::Unreachable { address, .. } = self {
            tags.push(("address", address.clone()));
        }
        tags
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        ConnectionError::closed(err.to_string())
    }
}
