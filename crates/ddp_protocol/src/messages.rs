//! Protocol messages.
//!
//! Every frame is a JSON object whose `msg` field names the message kind.
//! Field names follow the wire format (`randomSeed`, `offendingMessage`).

use ddp_core::{CoreError, DocumentId, Fields};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A message sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Opens a session.
    Connect {
        /// Proposed protocol version.
        version: String,
        /// Every version the client can speak, most preferred first.
        support: Vec<String>,
        /// Previous session to resume.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
    /// Heartbeat request.
    Ping {
        /// Echoed back in the matching `pong`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Heartbeat reply.
    Pong {
        /// ID of the `ping` being answered.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Remote method invocation.
    Method {
        /// Method ID, unique within the connection.
        id: String,
        /// Method name.
        method: String,
        /// Ordered parameters.
        #[serde(default)]
        params: Vec<Value>,
        /// Seed shared with the server so both sides generate the same IDs.
        #[serde(
            rename = "randomSeed",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        random_seed: Option<String>,
    },
    /// Subscription request.
    Sub {
        /// Subscription ID chosen by the client.
        id: String,
        /// Publication name.
        name: String,
        /// Publication parameters.
        #[serde(default)]
        params: Vec<Value>,
    },
    /// Subscription cancellation.
    Unsub {
        /// Subscription ID.
        id: String,
    },
}

impl ClientMessage {
    /// Returns the wire name of the message kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Connect { .. } => "connect",
            ClientMessage::Ping { .. } => "ping",
            ClientMessage::Pong { .. } => "pong",
            ClientMessage::Method { .. } => "method",
            ClientMessage::Sub { .. } => "sub",
            ClientMessage::Unsub { .. } => "unsub",
        }
    }

    /// Returns true for messages that belong to the handshake or heartbeat
    /// and may be sent before the session is established.
    #[must_use]
    pub fn is_session_control(&self) -> bool {
        matches!(
            self,
            ClientMessage::Connect { .. } | ClientMessage::Ping { .. } | ClientMessage::Pong { .. }
        )
    }
}

/// A message sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Session established.
    Connected {
        /// Session ID.
        session: String,
    },
    /// Version negotiation failed.
    Failed {
        /// Version the server would accept.
        version: String,
    },
    /// Heartbeat request.
    Ping {
        /// Echoed back in the `pong`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Heartbeat reply.
    Pong {
        /// ID of the answered `ping`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Method return value or error.
    Result {
        /// Method ID.
        id: String,
        /// Return value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Error raised by the method.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<MethodError>,
    },
    /// All writes of these methods have been sent.
    Updated {
        /// Method IDs.
        methods: Vec<String>,
    },
    /// Initial data for these subscriptions has been sent.
    Ready {
        /// Subscription IDs.
        subs: Vec<String>,
    },
    /// Subscription refused or stopped.
    Nosub {
        /// Subscription ID.
        id: String,
        /// Reason, if the subscription failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<MethodError>,
    },
    /// Document added to a collection.
    Added {
        /// Collection name.
        collection: String,
        /// Document ID.
        id: DocumentId,
        /// Initial fields.
        #[serde(default)]
        fields: Fields,
    },
    /// Fields of a document changed.
    Changed {
        /// Collection name.
        collection: String,
        /// Document ID.
        id: DocumentId,
        /// Fields set to a new value.
        #[serde(default)]
        fields: Fields,
        /// Fields removed from the document.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        cleared: Vec<String>,
    },
    /// Document removed from a collection.
    Removed {
        /// Collection name.
        collection: String,
        /// Document ID.
        id: DocumentId,
    },
    /// The server could not process a client message.
    Error {
        /// Description of the problem.
        reason: String,
        /// The message that caused the error.
        #[serde(
            rename = "offendingMessage",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        offending_message: Option<Value>,
    },
    /// A message kind this client does not handle.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Returns true for `added`, `changed` and `removed`.
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            ServerMessage::Added { .. } | ServerMessage::Changed { .. } | ServerMessage::Removed { .. }
        )
    }
}

/// Error object carried by `result` and `nosub` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodError {
    /// Error code, a string or a number.
    pub error: Value,
    /// Human-readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Additional details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl MethodError {
    /// Creates an error with a code and a reason.
    pub fn new(error: impl Into<Value>, reason: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reason: Some(reason.into()),
            details: None,
        }
    }

    /// Attaches details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Returns the error code as text.
    #[must_use]
    pub fn code(&self) -> String {
        match &self.error {
            Value::String(code) => code.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} [{}]", reason, self.code()),
            None => write!(f, "[{}]", self.code()),
        }
    }
}

impl std::error::Error for MethodError {}

impl From<CoreError> for MethodError {
    fn from(err: CoreError) -> Self {
        let code = match err {
            CoreError::DocumentNotFound { .. } => "not-found",
            CoreError::DocumentExists { .. } => "duplicate-key",
        };
        MethodError::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_error_display() {
        let err = MethodError::new(404, "Not found");
        assert_eq!(err.to_string(), "Not found [404]");
        assert_eq!(err.code(), "404");

        let err = MethodError {
            error: json!("not-authorized"),
            reason: None,
            details: None,
        };
        assert_eq!(err.to_string(), "[not-authorized]");
    }

    #[test]
    fn cache_errors_convert() {
        let key = ddp_core::DocumentKey::new("tasks", "t1");
        let err = MethodError::from(CoreError::exists(&key));
        assert_eq!(err.code(), "duplicate-key");
        assert!(err.reason.unwrap().contains("tasks/t1"));
    }

    #[test]
    fn session_control_kinds() {
        let connect = ClientMessage::Connect {
            version: "1".into(),
            support: vec!["1".into()],
            session: None,
        };
        assert!(connect.is_session_control());
        assert_eq!(connect.kind(), "connect");

        let unsub = ClientMessage::Unsub { id: "s1".into() };
        assert!(!unsub.is_session_control());
    }
}
