//! Frame types for the Parley protocol.
//!
//! Frames are the fundamental unit of communication on a connection.
//! Each frame is serialized using MessagePack for compact binary encoding.

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Error codes carried by [`Frame::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    /// The username broke a validation rule.
    InvalidUsername = 1001,
    /// Another live session already uses the username.
    NameTaken = 1002,
    /// The first frame was not an identification.
    ExpectedIdentify = 1003,
    /// The server could not accept the session.
    Unavailable = 1004,
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        code as u16
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = &'static str;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1001 => Ok(ErrorCode::InvalidUsername),
            1002 => Ok(ErrorCode::NameTaken),
            1003 => Ok(ErrorCode::ExpectedIdentify),
            1004 => Ok(ErrorCode::Unavailable),
            _ => Err("Invalid error code"),
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client identification, always the first frame on a connection.
    #[serde(rename = "identify")]
    Identify {
        /// Requested username.
        username: String,
    },

    /// Identification accepted.
    #[serde(rename = "welcome")]
    Welcome {
        /// Username the session is registered under.
        username: String,
    },

    /// Error response. The server closes the connection after sending one.
    #[serde(rename = "error")]
    Error {
        /// Error code.
        code: ErrorCode,
        /// Human-readable error message.
        message: String,
    },

    /// A directed chat message.
    #[serde(rename = "message")]
    Message(Message),
}

impl Frame {
    /// Short name of the frame variant, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Identify { .. } => "identify",
            Frame::Welcome { .. } => "welcome",
            Frame::Error { .. } => "error",
            Frame::Message(_) => "message",
        }
    }

    /// Create a new Identify frame.
    #[must_use]
    pub fn identify(username: impl Into<String>) -> Self {
        Frame::Identify {
            username: username.into(),
        }
    }

    /// Create a new Welcome frame.
    #[must_use]
    pub fn welcome(username: impl Into<String>) -> Self {
        Frame::Welcome {
            username: username.into(),
        }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a new Message frame.
    #[must_use]
    pub fn message(message: Message) -> Self {
        Frame::Message(message)
    }

    /// Take the chat message out of a Message frame.
    #[must_use]
    pub fn into_message(self) -> Option<Message> {
        match self {
            Frame::Message(message) => Some(message),
            _ => None,
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        Frame::Message(message)
    }
}
