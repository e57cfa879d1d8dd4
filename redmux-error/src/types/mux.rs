use std::any::Any;

use thiserror::Error;

use crate::{ConnectionError, ErrorExt, StatusCode};

/// Top-level error of every multiplexer operation.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Publish attempted while subscriptions are active on the same link.
    #[error("Link is in subscribe mode ({active} active subscriptions); cannot publish")]
    SubscribeModeConflict { active: usize },

    /// Rejected before any wire interaction.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A callback failed. Only ever reported, never returned by dispatch.
    #[error("Callback {id} failed: {reason}")]
    Callback { id: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MuxError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Returns the connection error if this is one.
    pub fn as_connection(&self) -> Option<&ConnectionError> {
        match self {
            Self::Connection(err) => Some(err),
            _ => None,
        }
    }
}

impl ErrorExt for MuxError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Connection(err) => err.status_code(),
            Self::SubscribeModeConflict { .. } => StatusCode::SubscribeModeConflict,
            Self::InvalidArgument(_) => StatusCode::InvalidArgs,
            Self::Callback { .. } => StatusCode::CallbackFailed,
            Self::Serialization(_) => StatusCode::SerializationFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::Connection(err) => err.client_message(),
            Self::Callback { id, .. } => format!("Callback {id} failed"),
            Self::Serialization(_) => "Payload format error".to_string(),
            _ => self.to_string(),
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Connection(err) => err.metrics_tags(),
            Self::SubscribeModeConflict { active } => vec![
                ("error_type", "mode_conflict".to_string()),
                ("status_code", self.status_code().to_string()),
                ("active_subscriptions", active.to_string()),
            ],
            Self::Callback { id, .. } => vec![
                ("error_type", "callback".to_string()),
                ("status_code", self.status_code().to_string()),
                ("subscription_id", id.clone()),
            ],
            _ => vec![
                ("error_type", self.type_name()),
                ("status_code", self.status_code().to_string()),
            ],
        }
    }
}
